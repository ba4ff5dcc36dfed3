use super::{
    context::{ProgressContext, ResultsView, SlotInfo},
    errors::{ItemError, PoolError, PoolResult},
    handle::{PoolController, PoolHandle},
    model::PoolMetrics,
    operation::Operation,
    sequence::{Sequence, SequenceSource},
    slot,
};
use std::sync::Arc;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use tokio::{
    runtime::Handle,
    sync::{oneshot, Mutex as AsyncMutex, Notify},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};


/// Что делать с остальными слотами, когда операция упала на элементе
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Упавший слот останавливается, остальные работают до исчерпания
    /// последовательности. Ошибка отдаётся после того, как все слоты осели.
    #[default]
    Lenient,
    /// Первая ошибка отменяет все живые слоты (кооперативно)
    FailFast,
}

/// Конфигурация пула
#[derive(Debug, Clone)]
pub struct Config {
    pub concurrency: usize,
    pub name: String,
    pub failure_policy: FailurePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrency: 4,
            name: "SLOT".to_string(),
            failure_policy: FailurePolicy::Lenient,
        }
    }
}

impl Config {
    pub fn cpu_bound() -> Self {
        Self {
            concurrency: num_cpus::get(),
            ..Default::default()
        }
    }

    pub fn io_bound() -> Self {
        Self {
            concurrency: num_cpus::get() * 2,
            ..Default::default()
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }
}

/// Преобразование аргументов перед каждым вызовом операции
pub type ArgumentAdapter<T, A, R> = Arc<
    dyn Fn(T, Arc<A>, ProgressContext<R>) -> (T, Arc<A>, ProgressContext<R>) + Send + Sync,
>;

/// Параметры одного прогона: конфигурация, общий аргумент, адаптер
pub struct RunOptions<T, A, R> {
    pub(crate) config: Config,
    pub(crate) shared: Arc<A>,
    pub(crate) adapter: Option<ArgumentAdapter<T, A, R>>,
}

impl<T, A, R> RunOptions<T, A, R> {
    pub fn new(shared: A) -> Self {
        Self::with_shared(Arc::new(shared))
    }

    pub fn with_shared(shared: Arc<A>) -> Self {
        Self {
            config: Config::default(),
            shared,
            adapter: None,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    pub fn adapter<F>(mut self, adapter: F) -> Self
    where
        F: Fn(T, Arc<A>, ProgressContext<R>) -> (T, Arc<A>, ProgressContext<R>) + Send + Sync + 'static,
    {
        self.adapter = Some(Arc::new(adapter));
        self
    }
}

impl<T, A: Default, R> Default for RunOptions<T, A, R> {
    fn default() -> Self {
        Self::new(A::default())
    }
}

pub(crate) struct SlotEntry {
    token: CancellationToken,
    task: Option<JoinHandle<PoolResult<()>>>,
}

pub(crate) struct PoolState<R> {
    results: Vec<Option<R>>,
    errors: Vec<Option<ItemError>>,
    pulled: usize,
    done: usize,
    failed: usize,
    active: usize,
    exhausted: bool,
    finished: bool,
    live: Vec<SlotEntry>,
    retiring: Vec<SlotEntry>,
    slots_created: usize,
}

fn put_at<V>(slots: &mut Vec<Option<V>>, position: usize, value: V) {
    if slots.len() <= position {
        slots.resize_with(position + 1, || None);
    }
    slots[position] = Some(value);
}

impl<R> PoolState<R> {
    fn new() -> Self {
        Self {
            results: Vec::new(),
            errors: Vec::new(),
            pulled: 0,
            done: 0,
            failed: 0,
            active: 0,
            exhausted: false,
            finished: false,
            live: Vec::new(),
            retiring: Vec::new(),
            slots_created: 0,
        }
    }

    fn take_pending(&mut self) -> Vec<JoinHandle<PoolResult<()>>> {
        self.live
            .iter_mut()
            .chain(self.retiring.iter_mut())
            .filter_map(|slot| slot.task.take())
            .collect()
    }

    fn cancel_live(&self) {
        for slot in &self.live {
            slot.token.cancel();
        }
    }
}

impl<R: Clone> PoolState<R> {
    fn collect_results(&self) -> PoolResult<Vec<R>> {
        let collected: Option<Vec<R>> = (0..self.pulled)
            .map(|position| self.results.get(position).cloned().flatten())
            .collect();
        collected.ok_or_else(|| PoolError::Incomplete {
            pulled: self.pulled,
            missing: (0..self.pulled)
                .filter(|&position| !matches!(self.results.get(position), Some(Some(_))))
                .count(),
        })
    }
}

/// Общее состояние прогона: его делят слоты, драйвер и контроллер
pub(crate) struct Shared<T, A, R> {
    pub(crate) name: String,
    policy: FailurePolicy,
    pub(crate) operation: Operation<T, A, R>,
    pub(crate) shared: Arc<A>,
    pub(crate) adapter: Option<ArgumentAdapter<T, A, R>>,
    /// Однопоточный доступ к последовательности; pull может приостановиться
    pub(crate) source: AsyncMutex<SequenceSource<T>>,
    total: Option<usize>,
    state: Mutex<PoolState<R>>,
    wake: Notify,
    runtime: Handle,
}

enum Step {
    Settle(Vec<JoinHandle<PoolResult<()>>>),
    Pause,
    Finish,
}

impl<T, A, R> Shared<T, A, R>
where
    T: Send + 'static,
    A: Send + Sync + 'static,
    R: Clone + Send + 'static,
{
    /// Новый слот получает порядковый номер, равный длине живого списка
    fn spawn_slot(self: &Arc<Self>, state: &mut PoolState<R>) {
        let ordinal = state.live.len();
        let token = CancellationToken::new();
        let info = SlotInfo {
            ordinal,
            cancellation: token.clone(),
        };
        let span = info_span!("slot", pool = %self.name, ordinal);
        let task = self
            .runtime
            .spawn(slot::run_slot(Arc::clone(self), info).instrument(span));

        state.slots_created += 1;
        state.live.push(SlotEntry {
            token,
            task: Some(task),
        });
    }

    pub(crate) fn resize(self: &Arc<Self>, target: usize) {
        let mut state = self.state.lock();
        if state.finished {
            debug!(pool = %self.name, target, "resize after finish ignored");
            return;
        }

        let current = state.live.len();
        let was_paused = current == 0;

        if target < current {
            info!(pool = %self.name, from = current, to = target, "scaling down");
            while state.live.len() > target {
                if let Some(slot) = state.live.pop() {
                    slot.token.cancel();
                    state.retiring.push(slot);
                }
            }
        } else if target > current {
            info!(pool = %self.name, from = current, to = target, "scaling up");
            for _ in current..target {
                self.spawn_slot(&mut state);
            }
        }

        if was_paused && target > 0 {
            debug!(pool = %self.name, "unpausing");
            self.wake.notify_one();
        }
    }

    /// Больше ничего не тянуть; начатые вызовы дорабатывают
    pub(crate) fn stop(&self) {
        {
            let mut state = self.state.lock();
            if state.finished || state.exhausted {
                return;
            }
            info!(pool = %self.name, pulled = state.pulled, "stopping early");
            state.exhausted = true;
            state.cancel_live();
        }
        self.wake.notify_one();
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.state.lock().exhausted
    }

    pub(crate) fn mark_exhausted(&self) {
        self.state.lock().exhausted = true;
    }

    /// Вход в Active. `false`, если пул уже исчерпан и слот не стартует
    pub(crate) fn enter(&self) -> bool {
        let mut state = self.state.lock();
        if state.exhausted {
            return false;
        }
        state.active += 1;
        true
    }

    /// Выдаёт позицию вытянутому элементу. Вызывается под блокировкой
    /// последовательности, так что позиции не повторяются.
    pub(crate) fn assign_position(self: &Arc<Self>, info: &SlotInfo) -> (usize, ProgressContext<R>) {
        let (position, pulled, completed, active) = {
            let mut state = self.state.lock();
            let position = state.pulled;
            state.pulled += 1;
            (position, state.pulled, state.done, state.active)
        };
        let view: Arc<dyn ResultsView<R>> = Arc::clone(self) as Arc<dyn ResultsView<R>>;
        let ctx = ProgressContext::new(
            pulled,
            completed,
            active,
            info.ordinal,
            info.cancellation.clone(),
            self.total.map(|total| total.saturating_sub(pulled)),
            self.total,
            view,
        );
        (position, ctx)
    }

    pub(crate) fn record_success(&self, position: usize, value: R) -> usize {
        let mut state = self.state.lock();
        put_at(&mut state.results, position, value);
        state.done += 1;
        state.done
    }

    pub(crate) fn record_failure(&self, position: usize, error: ItemError) {
        let mut state = self.state.lock();
        put_at(&mut state.errors, position, error);
        state.failed += 1;
    }

    #[inline]
    pub(crate) fn total(&self) -> Option<usize> {
        self.total
    }

    pub(crate) fn metrics(&self) -> PoolMetrics {
        let state = self.state.lock();
        PoolMetrics {
            pulled: state.pulled,
            done: state.done,
            failed: state.failed,
            active: state.active,
            concurrency: state.live.len(),
            retiring: state.retiring.len(),
            slots_created: state.slots_created,
            running: !state.finished,
            waiting: self.total.map(|total| total.saturating_sub(state.pulled)),
            total: self.total,
        }
    }

    pub(crate) fn results_so_far(&self) -> Vec<Option<R>> {
        self.state.lock().results.clone()
    }

    pub(crate) fn errors(&self) -> Vec<Option<ItemError>> {
        self.state.lock().errors.clone()
    }

    fn next_step(&self, failed: bool) -> Step {
        let mut state = self.state.lock();
        let pending = state.take_pending();
        if !pending.is_empty() {
            return Step::Settle(pending);
        }
        state.retiring.clear();
        if state.exhausted || failed {
            Step::Finish
        } else {
            Step::Pause
        }
    }

    fn on_slot_failure(&self, error: &PoolError) {
        let halt = matches!(error, PoolError::Source(_))
            || self.policy == FailurePolicy::FailFast;
        if halt {
            let mut state = self.state.lock();
            state.exhausted = true;
            state.cancel_live();
        }
    }

    /// Помечает прогон завершённым; результаты собираются, только если
    /// хэндл ещё ждёт ответа
    fn finish(&self, collect: bool) -> Option<PoolResult<Vec<R>>> {
        let mut state = self.state.lock();
        state.finished = true;
        info!(
            pool = %self.name,
            done = state.done,
            failed = state.failed,
            slots = state.slots_created,
            "jobs finished"
        );
        collect.then(|| state.collect_results())
    }

    /// Ждёт, пока осядут все слоты (живые и уходящие), и повторяет, пока
    /// последовательность не исчерпана. Без живых слотов засыпает до `resize`.
    ///
    /// Первая ошибка слота сразу уходит в хэндл; остальные слоты дорабатывают
    /// в фоне, их `destroy` всё равно выполняется.
    async fn drive(self: Arc<Self>, reply: oneshot::Sender<PoolResult<Vec<R>>>) {
        let mut reply = Some(reply);

        loop {
            match self.next_step(reply.is_none()) {
                Step::Settle(pending) => {
                    debug!(pool = %self.name, slots = pending.len(), "awaiting slots to settle");
                    let mut settling: FuturesUnordered<_> = pending.into_iter().collect();
                    while let Some(joined) = settling.next().await {
                        let outcome = joined.unwrap_or_else(|join_err| {
                            if join_err.is_panic() {
                                Err(PoolError::Panic(format!("{:?}", join_err)))
                            } else {
                                Err(PoolError::JoinFailed(join_err.to_string()))
                            }
                        });
                        if let Err(err) = outcome {
                            self.on_slot_failure(&err);
                            match reply.take() {
                                Some(tx) => {
                                    warn!(pool = %self.name, error = %err, "run failed, remaining slots settle in background");
                                    let _ = tx.send(Err(err));
                                }
                                None => warn!(pool = %self.name, error = %err, "additional slot failure"),
                            }
                        }
                    }
                }
                Step::Pause => {
                    debug!(pool = %self.name, "paused, waiting for concurrency > 0");
                    self.wake.notified().await;
                }
                Step::Finish => break,
            }
        }

        let outcome = self.finish(reply.is_some());
        self.source.lock().await.close();
        if let (Some(tx), Some(outcome)) = (reply, outcome) {
            let _ = tx.send(outcome);
        }
    }
}

impl<T, A, R> Shared<T, A, R> {
    /// Выход из Active; вызывается из guard-а слота
    pub(crate) fn leave(&self) {
        let mut state = self.state.lock();
        state.active = state.active.saturating_sub(1);
    }
}

impl<T, A, R> ResultsView<R> for Shared<T, A, R>
where
    T: Send + 'static,
    A: Send + Sync + 'static,
    R: Clone + Send + 'static,
{
    fn results_so_far(&self) -> Vec<Option<R>> {
        self.state.lock().results.clone()
    }
}

/// Запускает прогон: `operation` над каждым элементом `sequence`, не более
/// `concurrency` одновременно. Возвращает хэндл сразу; работа идёт в фоне.
///
/// Должна вызываться внутри tokio runtime.
pub fn run<T, A, R, S>(
    operation: Operation<T, A, R>,
    sequence: S,
    options: RunOptions<T, A, R>,
) -> PoolResult<PoolHandle<T, A, R>>
where
    T: Send + 'static,
    A: Send + Sync + 'static,
    R: Clone + Send + 'static,
    S: Sequence<T> + 'static,
{
    let RunOptions {
        config,
        shared,
        adapter,
    } = options;

    if config.concurrency == 0 {
        return Err(PoolError::InvalidConcurrency(config.concurrency));
    }
    let runtime = Handle::try_current().map_err(|_| PoolError::NoRuntime)?;

    let source = SequenceSource::new(Box::new(sequence));
    let total = source.len_hint();

    let pool = Arc::new(Shared {
        name: config.name,
        policy: config.failure_policy,
        operation,
        shared,
        adapter,
        source: AsyncMutex::new(source),
        total,
        state: Mutex::new(PoolState::new()),
        wake: Notify::new(),
        runtime: runtime.clone(),
    });

    {
        let mut state = pool.state.lock();
        for _ in 0..config.concurrency {
            pool.spawn_slot(&mut state);
        }
    }
    info!(pool = %pool.name, concurrency = config.concurrency, total = ?total, "awaiting slots to finish");

    let (tx, rx) = oneshot::channel();
    let driver = Arc::clone(&pool);
    runtime.spawn(driver.drive(tx));

    Ok(PoolHandle::new(PoolController::new(pool), rx))
}
