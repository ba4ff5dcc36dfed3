use async_concurrently::{run, BoxError, IterSequence, Operation, RunOptions};
use std::time::Instant;
use tokio::runtime::Builder;
use tracing_subscriber::EnvFilter;


fn main() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let rt = Builder::new_multi_thread()
        .worker_threads(8)
        .enable_all()
        .build()
        .unwrap();

    rt.block_on(async {
        let now = Instant::now();
        let op = Operation::function(|i: u64, _shared, _ctx| async move {
            tokio::task::yield_now().await;
            Ok::<_, BoxError>(i * 2)
        });
        let handle = run(
            op,
            IterSequence::exact(0..1_000_000u64),
            RunOptions::new(()).name("demo").concurrency(16),
        )
        .unwrap();

        let controller = handle.controller();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            controller.set_concurrency(64);
        });

        let results = handle.await.unwrap();
        println!("processed: {}, elapsed: {:?}", results.len(), now.elapsed());
    });
}
