use std::{error::Error, fmt, sync::Arc};
use thiserror::Error;

/// Ошибка, которую возвращает пользовательская операция или последовательность
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Ошибка элемента: разделяется между списком `errors` и итоговым `PoolError`
pub type ItemError = Arc<dyn Error + Send + Sync + 'static>;

pub type PoolResult<T> = Result<T, PoolError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    Init,
    Destroy,
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookStage::Init => f.write_str("init"),
            HookStage::Destroy => f.write_str("destroy"),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum PoolError {
    #[error("'concurrency' must be > 0, found {0}")]
    InvalidConcurrency(usize),

    #[error("run() must be called from within a tokio runtime")]
    NoRuntime,

    /// Операция упала на элементе с позицией `position` (с нуля)
    #[error("operation failed on item #{position}: {source}")]
    Item {
        position: usize,
        #[source]
        source: ItemError,
    },

    /// Сама последовательность не смогла отдать следующий элемент
    #[error("sequence failed: {0}")]
    Source(ItemError),

    #[error("{stage} hook failed on slot {ordinal}: {source}")]
    Hook {
        ordinal: usize,
        stage: HookStage,
        #[source]
        source: ItemError,
    },

    #[error("slot panicked: {0}")]
    Panic(String),

    #[error("slot join failed: {0}")]
    JoinFailed(String),

    #[error("pool driver dropped before reporting")]
    ChannelClosed,

    #[error("{missing} of {pulled} pulled items have no result")]
    Incomplete { pulled: usize, missing: usize },
}

impl PoolError {
    /// Ошибка конфигурации: поднимается синхронно, до старта слотов
    pub fn is_configuration(&self) -> bool {
        matches!(self, PoolError::InvalidConcurrency(_) | PoolError::NoRuntime)
    }

    /// Позиция элемента, если это ошибка операции
    pub fn position(&self) -> Option<usize> {
        match self {
            PoolError::Item { position, .. } => Some(*position),
            _ => None,
        }
    }
}

/// Паника внутри операции, перехваченная и записанная как ошибка элемента
#[derive(Debug, Clone, Error)]
#[error("operation panicked: {message}")]
pub struct OperationPanicked {
    pub message: String,
}

impl OperationPanicked {
    pub(crate) fn from_payload(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self { message }
    }
}
