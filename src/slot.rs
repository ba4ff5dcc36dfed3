use super::{
    context::{ProgressContext, SlotInfo},
    errors::{BoxError, HookStage, ItemError, OperationPanicked, PoolError, PoolResult},
    pool::Shared,
};
use futures::FutureExt;
use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};
use tracing::{debug, trace, warn};

enum Pulled<T, R> {
    Item(T, usize, ProgressContext<R>),
    Exhausted,
    Skipped,
}

/// Слот в состоянии Active; `drop` выводит его оттуда на любом пути выхода
struct ActiveSlot<'a, T, A, R>(&'a Shared<T, A, R>);

impl<T, A, R> Drop for ActiveSlot<'_, T, A, R> {
    fn drop(&mut self) {
        self.0.leave();
    }
}

fn panicked(payload: Box<dyn std::any::Any + Send>) -> ItemError {
    Arc::new(OperationPanicked::from_payload(payload))
}

/// Синхронный пользовательский код (фабрика, хуки, адаптер): паника
/// становится ошибкой
fn guarded<X>(f: impl FnOnce() -> X) -> Result<X, ItemError> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(panicked)
}

fn run_hook(f: impl FnOnce() -> Result<(), BoxError>) -> Result<(), ItemError> {
    guarded(f).and_then(|res| res.map_err(Arc::from))
}

/// Цикл одного слота: Starting → Active → (Cancelling | Exhausting) → Stopped.
///
/// Отмена кооперативная: токен проверяется только между pull, начатый вызов
/// операции всегда дорабатывает.
pub(crate) async fn run_slot<T, A, R>(pool: Arc<Shared<T, A, R>>, info: SlotInfo) -> PoolResult<()>
where
    T: Send + 'static,
    A: Send + Sync + 'static,
    R: Clone + Send + 'static,
{
    let mut worker = guarded(|| pool.operation.resolve(&info)).map_err(|err| {
        warn!(error = %err, "factory panicked, slot not started");
        PoolError::Panic(err.to_string())
    })?;

    // Starting: один шаг планировщика, чтобы resize в тот же момент
    // успел сработать до первого pull
    tokio::task::yield_now().await;

    if !pool.enter() {
        trace!("pool already exhausted, slot not started");
        return Ok(());
    }
    let active = ActiveSlot(&*pool);

    if let Err(source) = run_hook(|| pool.operation.init(&info)) {
        warn!(error = %source, "init hook failed");
        if let Err(destroy_err) = run_hook(|| pool.operation.destroy(&info, Some(&source))) {
            warn!(error = %destroy_err, "destroy hook failed after init failure");
        }
        return Err(PoolError::Hook {
            ordinal: info.ordinal,
            stage: HookStage::Init,
            source,
        });
    }
    debug!("slot started");

    let mut discovered = false;

    loop {
        if info.is_cancelled() || pool.is_exhausted() {
            break;
        }

        // pull и выдача позиции идут одним шагом под блокировкой последовательности
        let pulled = {
            let mut source = pool.source.lock().await;
            if info.is_cancelled() || pool.is_exhausted() {
                Pulled::Skipped
            } else {
                let next = source.pull().await;
                match next {
                    Ok(Some(item)) => {
                        let (position, ctx) = pool.assign_position(&info);
                        Pulled::Item(item, position, ctx)
                    }
                    Ok(None) => {
                        pool.mark_exhausted();
                        Pulled::Exhausted
                    }
                    Err(err) => {
                        pool.mark_exhausted();
                        source.close();
                        drop(source);
                        warn!(error = %err, "sequence failed");
                        let cause = match &err {
                            PoolError::Source(cause) => Some(cause.clone()),
                            _ => None,
                        };
                        if let Err(destroy_err) = run_hook(|| pool.operation.destroy(&info, cause.as_ref())) {
                            warn!(error = %destroy_err, "destroy hook failed after sequence failure");
                        }
                        return Err(err);
                    }
                }
            }
        };

        let (item, position, ctx) = match pulled {
            Pulled::Item(item, position, ctx) => (item, position, ctx),
            Pulled::Exhausted => {
                discovered = true;
                break;
            }
            Pulled::Skipped => break,
        };
        trace!(position, "processing item");

        let shared = Arc::clone(&pool.shared);
        let adapted = match &pool.adapter {
            Some(adapt) => guarded(|| adapt(item, shared, ctx)),
            None => Ok((item, shared, ctx)),
        };

        let result: Result<R, ItemError> = match adapted {
            Ok((item, shared, ctx)) => {
                let outcome = AssertUnwindSafe(async { worker.invoke(item, shared, ctx).await })
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(err)) => Err(Arc::from(err)),
                    Err(payload) => Err(panicked(payload)),
                }
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(value) => {
                let done = pool.record_success(position, value);
                trace!(position, done, total = ?pool.total(), "item done");
            }
            Err(error) => {
                warn!(position, error = %error, "operation failed, slot stops");
                pool.record_failure(position, error.clone());
                if let Err(destroy_err) = run_hook(|| pool.operation.destroy(&info, Some(&error))) {
                    warn!(error = %destroy_err, "destroy hook failed after item failure");
                }
                pool.source.lock().await.signal_failure(&error);
                return Err(PoolError::Item {
                    position,
                    source: error,
                });
            }
        }
    }

    if discovered {
        debug!("sequence exhausted");
        pool.source.lock().await.close();
    }
    let destroyed = run_hook(|| pool.operation.destroy(&info, None));
    drop(active);
    debug!("slot stopped");

    destroyed.map_err(|source| PoolError::Hook {
        ordinal: info.ordinal,
        stage: HookStage::Destroy,
        source,
    })
}
