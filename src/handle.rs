use super::{
    errors::{ItemError, PoolError, PoolResult},
    model::PoolMetrics,
    pool::Shared,
};
use std::{
    future::Future,
    ops::Deref,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio::sync::oneshot;


/// Живое управление прогоном: чтение счётчиков и изменение `concurrency`.
///
/// Дешёво клонируется; все чтения идут под той же блокировкой, что и
/// изменения состояния слотами.
pub struct PoolController<T, A, R> {
    pool: Arc<Shared<T, A, R>>,
}

impl<T, A, R> Clone for PoolController<T, A, R> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
        }
    }
}

impl<T, A, R> PoolController<T, A, R>
where
    T: Send + 'static,
    A: Send + Sync + 'static,
    R: Clone + Send + 'static,
{
    pub(crate) fn new(pool: Arc<Shared<T, A, R>>) -> Self {
        Self { pool }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.pool.name
    }

    /// Число живых слотов
    #[inline]
    pub fn concurrency(&self) -> usize {
        self.pool.metrics().concurrency
    }

    /// Меняет число живых слотов. `0` ставит прогон на паузу,
    /// любое значение больше нуля снимает её.
    #[inline]
    pub fn set_concurrency(&self, concurrency: usize) {
        self.pool.resize(concurrency);
    }

    /// Прекращает выдачу новых элементов. Начатые вызовы дорабатывают,
    /// прогон завершается результатами всех вытянутых элементов.
    pub fn stop(&self) {
        self.pool.stop();
    }

    pub fn results_so_far(&self) -> Vec<Option<R>> {
        self.pool.results_so_far()
    }

    /// Ошибки по позициям; разреженный список
    pub fn errors(&self) -> Vec<Option<ItemError>> {
        self.pool.errors()
    }

    #[inline]
    pub fn done_count(&self) -> usize {
        self.pool.metrics().done
    }

    #[inline]
    pub fn active_count(&self) -> usize {
        self.pool.metrics().active
    }

    #[inline]
    pub fn pulled_count(&self) -> usize {
        self.pool.metrics().pulled
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.pool.metrics().running
    }

    /// Ещё не вытянуто; только при известной длине последовательности
    #[inline]
    pub fn waiting(&self) -> Option<usize> {
        self.pool.metrics().waiting
    }

    #[inline]
    pub fn total(&self) -> Option<usize> {
        self.pool.total()
    }

    #[inline]
    pub fn metrics(&self) -> PoolMetrics {
        self.pool.metrics()
    }
}

/// Хэндл прогона: `await` отдаёт упорядоченные результаты, а через
/// `Deref` доступен тот же `PoolController`.
pub struct PoolHandle<T, A, R> {
    controller: PoolController<T, A, R>,
    receiver: oneshot::Receiver<PoolResult<Vec<R>>>,
}

impl<T, A, R> PoolHandle<T, A, R> {
    pub(crate) fn new(
        controller: PoolController<T, A, R>,
        receiver: oneshot::Receiver<PoolResult<Vec<R>>>,
    ) -> Self {
        Self {
            controller,
            receiver,
        }
    }

    /// Отдельный контроллер, например чтобы передать его внутрь операции
    pub fn controller(&self) -> PoolController<T, A, R> {
        self.controller.clone()
    }
}

impl<T, A, R> Deref for PoolHandle<T, A, R> {
    type Target = PoolController<T, A, R>;

    fn deref(&self) -> &Self::Target {
        &self.controller
    }
}

impl<T, A, R> Future for PoolHandle<T, A, R> {
    type Output = PoolResult<Vec<R>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(res) => Poll::Ready(res.unwrap_or(Err(PoolError::ChannelClosed))),
            Poll::Pending => Poll::Pending,
        }
    }
}
