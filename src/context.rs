use std::{fmt, sync::Arc};
use tokio_util::sync::CancellationToken;

/// Идентичность слота: передаётся фабрике и хукам `init`/`destroy`
#[derive(Debug, Clone)]
pub struct SlotInfo {
    pub ordinal: usize,
    pub cancellation: CancellationToken,
}

impl SlotInfo {
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Источник результатов для `ProgressContext::results`
pub(crate) trait ResultsView<R>: Send + Sync {
    fn results_so_far(&self) -> Vec<Option<R>>;
}

/// Снимок прогресса, который получает операция на каждом вызове.
///
/// Счётчики собираются под блокировкой состояния сразу после выдачи
/// позиции и дальше не меняются. Результаты копируются только по запросу.
#[derive(Clone)]
pub struct ProgressContext<R> {
    /// Порядковый номер элемента при выдаче, начиная с 1
    pub position: usize,
    pub completed: usize,
    pub active: usize,
    pub ordinal: usize,
    pub cancellation: CancellationToken,
    /// Есть только если последовательность сообщила свою длину
    pub remaining: Option<usize>,
    pub total: Option<usize>,
    view: Arc<dyn ResultsView<R>>,
}

impl<R> ProgressContext<R> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        position: usize,
        completed: usize,
        active: usize,
        ordinal: usize,
        cancellation: CancellationToken,
        remaining: Option<usize>,
        total: Option<usize>,
        view: Arc<dyn ResultsView<R>>,
    ) -> Self {
        Self {
            position,
            completed,
            active,
            ordinal,
            cancellation,
            remaining,
            total,
            view,
        }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Индекс элемента в итоговом векторе
    #[inline]
    pub fn index(&self) -> usize {
        self.position - 1
    }

    /// Копия результатов на момент вызова; незаписанные позиции равны `None`
    pub fn results(&self) -> Vec<Option<R>> {
        self.view.results_so_far()
    }
}

impl<R> fmt::Debug for ProgressContext<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressContext")
            .field("position", &self.position)
            .field("completed", &self.completed)
            .field("active", &self.active)
            .field("ordinal", &self.ordinal)
            .field("remaining", &self.remaining)
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}
