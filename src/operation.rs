use super::{
    context::{ProgressContext, SlotInfo},
    errors::{BoxError, ItemError},
};
use futures::future::{BoxFuture, FutureExt};
use std::{future::Future, sync::Arc};

/// Рабочий экземпляр слота для фабричного варианта операции.
///
/// Экземпляр создаётся один раз на слот и обрабатывает все элементы,
/// которые этот слот вытянет.
pub trait SlotWorker<T, A, R>: Send + 'static {
    fn run(
        &mut self,
        item: T,
        shared: Arc<A>,
        ctx: ProgressContext<R>,
    ) -> BoxFuture<'_, Result<R, BoxError>>;
}

pub(crate) type RunFn<T, A, R> =
    Arc<dyn Fn(T, Arc<A>, ProgressContext<R>) -> BoxFuture<'static, Result<R, BoxError>> + Send + Sync>;
type FactoryFn<T, A, R> = Arc<dyn Fn(SlotInfo) -> Box<dyn SlotWorker<T, A, R>> + Send + Sync>;
type InitHook = Arc<dyn Fn(&SlotInfo) -> Result<(), BoxError> + Send + Sync>;
type DestroyHook = Arc<dyn Fn(&SlotInfo, Option<&ItemError>) -> Result<(), BoxError> + Send + Sync>;

enum OperationKind<T, A, R> {
    Function(RunFn<T, A, R>),
    Factory(FactoryFn<T, A, R>),
}

impl<T, A, R> Clone for OperationKind<T, A, R> {
    fn clone(&self) -> Self {
        match self {
            OperationKind::Function(f) => OperationKind::Function(f.clone()),
            OperationKind::Factory(f) => OperationKind::Factory(f.clone()),
        }
    }
}

/// Операция над элементом: либо общая функция, либо фабрика экземпляров
/// на слот. Хуки `init`/`destroy` вызываются ровно один раз на слот в обоих
/// вариантах.
pub struct Operation<T, A, R> {
    kind: OperationKind<T, A, R>,
    init: Option<InitHook>,
    destroy: Option<DestroyHook>,
}

impl<T, A, R> Clone for Operation<T, A, R> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind.clone(),
            init: self.init.clone(),
            destroy: self.destroy.clone(),
        }
    }
}

impl<T, A, R> Operation<T, A, R>
where
    T: Send + 'static,
    A: Send + Sync + 'static,
    R: Send + 'static,
{
    /// Асинхронная функция, общая для всех слотов
    pub fn function<F, Fut, E>(f: F) -> Self
    where
        F: Fn(T, Arc<A>, ProgressContext<R>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        let f = Arc::new(f);
        let run: RunFn<T, A, R> = Arc::new(move |item: T, shared: Arc<A>, ctx: ProgressContext<R>| {
            let f = Arc::clone(&f);
            // вызов внутри future, чтобы паника ловилась вместе с ожиданием
            async move { f(item, shared, ctx).await.map_err(Into::<BoxError>::into) }.boxed()
        });
        Self::from_kind(OperationKind::Function(run))
    }

    /// Синхронная функция; выполняется на потоке слота
    pub fn sync<F, E>(f: F) -> Self
    where
        F: Fn(T, Arc<A>, ProgressContext<R>) -> Result<R, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        let f = Arc::new(f);
        let run: RunFn<T, A, R> = Arc::new(move |item: T, shared: Arc<A>, ctx: ProgressContext<R>| {
            let f = Arc::clone(&f);
            async move { f(item, shared, ctx).map_err(Into::<BoxError>::into) }.boxed()
        });
        Self::from_kind(OperationKind::Function(run))
    }

    /// Фабрика: один экземпляр `W` на каждый созданный слот
    pub fn factory<F, W>(make: F) -> Self
    where
        F: Fn(SlotInfo) -> W + Send + Sync + 'static,
        W: SlotWorker<T, A, R>,
    {
        let make: FactoryFn<T, A, R> = Arc::new(move |info: SlotInfo| -> Box<dyn SlotWorker<T, A, R>> {
            Box::new(make(info))
        });
        Self::from_kind(OperationKind::Factory(make))
    }

    pub fn on_init<F, E>(mut self, hook: F) -> Self
    where
        F: Fn(&SlotInfo) -> Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        self.init = Some(Arc::new(move |info: &SlotInfo| hook(info).map_err(Into::<BoxError>::into)));
        self
    }

    pub fn on_destroy<F, E>(mut self, hook: F) -> Self
    where
        F: Fn(&SlotInfo, Option<&ItemError>) -> Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        self.destroy = Some(Arc::new(move |info: &SlotInfo, error: Option<&ItemError>| {
            hook(info, error).map_err(Into::<BoxError>::into)
        }));
        self
    }

    #[inline]
    pub fn is_factory(&self) -> bool {
        matches!(self.kind, OperationKind::Factory(_))
    }
}

impl<T, A, R> Operation<T, A, R> {
    fn from_kind(kind: OperationKind<T, A, R>) -> Self {
        Self {
            kind,
            init: None,
            destroy: None,
        }
    }

    /// Разрешение операции для конкретного слота
    pub(crate) fn resolve(&self, info: &SlotInfo) -> ResolvedWorker<T, A, R> {
        match &self.kind {
            OperationKind::Function(run) => ResolvedWorker::Shared(Arc::clone(run)),
            OperationKind::Factory(make) => ResolvedWorker::Owned(make(info.clone())),
        }
    }

    pub(crate) fn init(&self, info: &SlotInfo) -> Result<(), BoxError> {
        match &self.init {
            Some(hook) => hook(info),
            None => Ok(()),
        }
    }

    pub(crate) fn destroy(&self, info: &SlotInfo, error: Option<&ItemError>) -> Result<(), BoxError> {
        match &self.destroy {
            Some(hook) => hook(info, error),
            None => Ok(()),
        }
    }
}

pub(crate) enum ResolvedWorker<T, A, R> {
    Shared(RunFn<T, A, R>),
    Owned(Box<dyn SlotWorker<T, A, R>>),
}

impl<T, A, R> ResolvedWorker<T, A, R>
where
    T: 'static,
    A: 'static,
    R: 'static,
{
    #[inline]
    pub(crate) fn invoke(
        &mut self,
        item: T,
        shared: Arc<A>,
        ctx: ProgressContext<R>,
    ) -> BoxFuture<'_, Result<R, BoxError>> {
        match self {
            ResolvedWorker::Shared(run) => run(item, shared, ctx),
            ResolvedWorker::Owned(worker) => worker.run(item, shared, ctx),
        }
    }
}
