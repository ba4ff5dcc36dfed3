use super::errors::{BoxError, ItemError, PoolError};
use futures::{
    future::{self, BoxFuture, FutureExt},
    stream::{BoxStream, Stream, StreamExt},
};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Контракт последовательности: один `pull` за раз, конечная или бесконечная,
/// синхронная или асинхронная.
///
/// Пул гарантирует, что вызовы `pull` не пересекаются, поэтому реализация
/// не обязана быть потокобезопасной сверх `Send`.
pub trait Sequence<T>: Send {
    /// `Ok(None)` означает, что последовательность исчерпана.
    /// `Err` означает фатальную ошибку источника и прерывает весь прогон.
    fn pull(&mut self) -> BoxFuture<'_, Result<Option<T>, BoxError>>;

    /// Известная заранее длина; включает `remaining`/`total`
    fn len_hint(&self) -> Option<usize> {
        None
    }

    /// Операция упала; генератор может завершиться досрочно
    fn signal_failure(&mut self, _error: &ItemError) {}

    /// Досрочное освобождение ресурсов
    fn close(&mut self) {}
}

impl<T, S> Sequence<T> for Box<S>
where
    S: Sequence<T> + ?Sized,
{
    fn pull(&mut self) -> BoxFuture<'_, Result<Option<T>, BoxError>> {
        (**self).pull()
    }

    fn len_hint(&self) -> Option<usize> {
        (**self).len_hint()
    }

    fn signal_failure(&mut self, error: &ItemError) {
        (**self).signal_failure(error)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Обычная коллекция или итератор. Сигнал об ошибке игнорируется.
pub struct IterSequence<I> {
    iter: Option<I>,
    total: Option<usize>,
}

impl<I: Iterator> IterSequence<I> {
    pub fn new<C>(items: C) -> Self
    where
        C: IntoIterator<IntoIter = I>,
    {
        Self {
            iter: Some(items.into_iter()),
            total: None,
        }
    }

    /// Как `new`, но сообщает длину пулу, если `size_hint` точный
    /// (диапазоны, `Vec`, `map` над ними)
    pub fn exact<C>(items: C) -> Self
    where
        C: IntoIterator<IntoIter = I>,
    {
        let iter = items.into_iter();
        let total = match iter.size_hint() {
            (lower, Some(upper)) if lower == upper => Some(lower),
            _ => None,
        };
        Self {
            iter: Some(iter),
            total,
        }
    }
}

impl<T, I> Sequence<T> for IterSequence<I>
where
    T: Send + 'static,
    I: Iterator<Item = T> + Send,
{
    #[inline]
    fn pull(&mut self) -> BoxFuture<'_, Result<Option<T>, BoxError>> {
        let next = self.iter.as_mut().and_then(Iterator::next);
        future::ready(Ok(next)).boxed()
    }

    fn len_hint(&self) -> Option<usize> {
        self.total
    }

    fn close(&mut self) {
        self.iter = None;
    }
}

/// Асинхронная последовательность поверх `futures::Stream`
pub struct StreamSequence<T> {
    stream: Option<BoxStream<'static, T>>,
    total: Option<usize>,
}

impl<T> StreamSequence<T> {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = T> + Send + 'static,
    {
        Self {
            stream: Some(stream.boxed()),
            total: None,
        }
    }

    pub fn with_len(mut self, total: usize) -> Self {
        self.total = Some(total);
        self
    }
}

impl<T: Send + 'static> Sequence<T> for StreamSequence<T> {
    fn pull(&mut self) -> BoxFuture<'_, Result<Option<T>, BoxError>> {
        Box::pin(async move {
            match self.stream.as_mut() {
                Some(stream) => Ok(stream.next().await),
                None => Ok(None),
            }
        })
    }

    fn len_hint(&self) -> Option<usize> {
        self.total
    }

    fn close(&mut self) {
        self.stream = None;
    }
}

/// Поток `Result<T, E>`: `Err` из потока считается фатальной ошибкой источника
pub struct TryStreamSequence<T> {
    stream: Option<BoxStream<'static, Result<T, BoxError>>>,
    total: Option<usize>,
}

impl<T: Send + 'static> TryStreamSequence<T> {
    pub fn new<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Self {
            stream: Some(stream.map(|res| res.map_err(Into::into)).boxed()),
            total: None,
        }
    }

    pub fn with_len(mut self, total: usize) -> Self {
        self.total = Some(total);
        self
    }
}

impl<T: Send + 'static> Sequence<T> for TryStreamSequence<T> {
    fn pull(&mut self) -> BoxFuture<'_, Result<Option<T>, BoxError>> {
        Box::pin(async move {
            match self.stream.as_mut() {
                Some(stream) => stream.next().await.transpose(),
                None => Ok(None),
            }
        })
    }

    fn len_hint(&self) -> Option<usize> {
        self.total
    }

    fn close(&mut self) {
        self.stream = None;
    }
}

/// Элементы из канала; исчерпана, когда все отправители закрыты.
/// Ошибка операции закрывает канал для отправителей.
pub struct ChannelSequence<T> {
    receiver: mpsc::Receiver<T>,
}

impl<T> ChannelSequence<T> {
    pub fn new(receiver: mpsc::Receiver<T>) -> Self {
        Self { receiver }
    }
}

impl<T: Send + 'static> Sequence<T> for ChannelSequence<T> {
    fn pull(&mut self) -> BoxFuture<'_, Result<Option<T>, BoxError>> {
        Box::pin(async move { Ok(self.receiver.recv().await) })
    }

    fn signal_failure(&mut self, _error: &ItemError) {
        self.receiver.close();
    }

    fn close(&mut self) {
        self.receiver.close();
    }
}

/// Адаптер пула над последовательностью: липкий флаг исчерпания и
/// однократный `close`.
pub(crate) struct SequenceSource<T> {
    inner: Box<dyn Sequence<T>>,
    exhausted: bool,
    closed: bool,
}

impl<T> SequenceSource<T> {
    pub(crate) fn new(inner: Box<dyn Sequence<T>>) -> Self {
        Self {
            inner,
            exhausted: false,
            closed: false,
        }
    }

    pub(crate) fn len_hint(&self) -> Option<usize> {
        self.inner.len_hint()
    }

    #[inline]
    pub(crate) fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub(crate) async fn pull(&mut self) -> Result<Option<T>, PoolError> {
        if self.exhausted {
            return Ok(None);
        }
        match self.inner.pull().await {
            Ok(Some(item)) => Ok(Some(item)),
            Ok(None) => {
                self.exhausted = true;
                Ok(None)
            }
            Err(err) => {
                self.exhausted = true;
                Err(PoolError::Source(Arc::from(err)))
            }
        }
    }

    pub(crate) fn signal_failure(&mut self, error: &ItemError) {
        if !self.closed {
            self.inner.signal_failure(error);
        }
    }

    pub(crate) fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.exhausted = true;
            self.inner.close();
        }
    }
}
