use async_concurrently::{run, BoxError, Config, IterSequence, Operation, ProgressContext, RunOptions, SlotInfo, SlotWorker};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use futures::future::{BoxFuture, FutureExt};
use std::{hint::black_box, sync::Arc};
use tokio::time::Duration;

fn create_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .enable_all()
        .build()
        .unwrap()
}

fn doubling() -> Operation<u64, (), u64> {
    Operation::function(|x: u64, _: Arc<()>, _: ProgressContext<u64>| async move { Ok::<_, BoxError>(black_box(x * 2)) })
}

// Benchmark 1: накладные расходы на элемент при разном concurrency
fn bench_identity_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("identity_throughput");
    group.sample_size(20);

    for items in [1_000u64, 10_000] {
        group.throughput(Throughput::Elements(items));

        for concurrency in [1usize, 4, 16, 64] {
            group.bench_with_input(
                BenchmarkId::new(format!("c{}", concurrency), items),
                &(items, concurrency),
                |b, &(items, concurrency)| {
                    let rt = create_runtime();
                    b.to_async(&rt).iter(|| async move {
                        let handle = run(
                            doubling(),
                            IterSequence::exact(0..items),
                            RunOptions::new(()).concurrency(concurrency),
                        )
                        .unwrap();
                        black_box(handle.await.unwrap());
                    });
                },
            );
        }
    }

    group.finish();
}

// Benchmark 2: I/O-подобная нагрузка, пресеты конфигурации
fn bench_config_comparison(c: &mut Criterion) {
    let mut group = c.benchmark_group("config_comparison");
    group.sample_size(10);
    let rt = create_runtime();

    for (label, config) in [("cpu_bound", Config::cpu_bound()), ("io_bound", Config::io_bound())] {
        group.bench_function(label, |b| {
            b.to_async(&rt).iter(|| {
                let config = config.clone();
                async move {
                    let op = Operation::function(|x: u64, _: Arc<()>, _: ProgressContext<u64>| async move {
                        tokio::time::sleep(Duration::from_micros(100)).await;
                        Ok::<_, BoxError>(x)
                    });
                    let handle = run(op, IterSequence::exact(0..500u64), RunOptions::new(()).config(config)).unwrap();
                    black_box(handle.await.unwrap());
                }
            });
        });
    }

    group.finish();
}

struct Accumulator {
    sum: u64,
}

impl SlotWorker<u64, (), u64> for Accumulator {
    fn run(&mut self, item: u64, _shared: Arc<()>, _ctx: ProgressContext<u64>) -> BoxFuture<'_, Result<u64, BoxError>> {
        async move {
            self.sum += item;
            Ok(self.sum)
        }
        .boxed()
    }
}

// Benchmark 3: фабрика экземпляров против общей функции
fn bench_factory_vs_function(c: &mut Criterion) {
    let mut group = c.benchmark_group("factory_vs_function");
    group.sample_size(20);
    let rt = create_runtime();

    group.bench_function("function", |b| {
        b.to_async(&rt).iter(|| async {
            let handle = run(doubling(), IterSequence::exact(0..5_000u64), RunOptions::new(()).concurrency(16)).unwrap();
            black_box(handle.await.unwrap());
        });
    });

    group.bench_function("factory", |b| {
        b.to_async(&rt).iter(|| async {
            let op = Operation::factory(|_: SlotInfo| Accumulator { sum: 0 });
            let handle = run(op, IterSequence::exact(0..5_000u64), RunOptions::new(()).concurrency(16)).unwrap();
            black_box(handle.await.unwrap());
        });
    });

    group.finish();
}

// Benchmark 4: стоимость resize во время прогона
fn bench_resize_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("resize_churn");
    group.sample_size(10);
    let rt = create_runtime();

    group.bench_function("resize_every_100_items", |b| {
        b.to_async(&rt).iter(|| async {
            let handle = run(doubling(), IterSequence::exact(0..5_000u64), RunOptions::new(()).concurrency(8)).unwrap();
            let ctl = handle.controller();
            let resizer = tokio::spawn(async move {
                while ctl.is_running() {
                    let target = if ctl.done_count() / 100 % 2 == 0 { 32 } else { 2 };
                    ctl.set_concurrency(target);
                    tokio::task::yield_now().await;
                }
            });
            black_box(handle.await.unwrap());
            resizer.await.unwrap();
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_identity_throughput,
    bench_config_comparison,
    bench_factory_vs_function,
    bench_resize_churn,
);

criterion_main!(benches);
