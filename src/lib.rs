//! Пул с ограниченным параллелизмом поверх tokio
//!
//! Берёт последовательность (конечную или бесконечную, синхронную или
//! асинхронную), применяет операцию к каждому элементу не более чем в
//! `concurrency` слотах и собирает результаты в исходном порядке.
//!
//! # Features
//! - Изменение числа слотов во время прогона, включая паузу (`0`) и возобновление
//! - Кооперативная отмена слотов между элементами
//! - Функция, общая для всех слотов, или фабрика экземпляров на слот с хуками `init`/`destroy`
//! - Снимок прогресса на каждый вызов и живые метрики через контроллер
//! - Ошибки элементов по позициям; паника операции тоже считается ошибкой элемента
//!
//! ```no_run
//! use async_concurrently::{run, BoxError, IterSequence, Operation, RunOptions};
//!
//! # async fn demo() -> Result<(), async_concurrently::PoolError> {
//! let op = Operation::function(|x: u64, _shared, _ctx| async move { Ok::<_, BoxError>(x * 2) });
//! let handle = run(op, IterSequence::exact(0..100u64), RunOptions::new(()).concurrency(8))?;
//! handle.set_concurrency(2);
//! let doubled = handle.await?;
//! assert_eq!(doubled[10], 20);
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod errors;
pub mod handle;
pub mod model;
pub mod operation;
pub mod pool;
pub mod sequence;
mod slot;

pub use context::{ProgressContext, SlotInfo};
pub use errors::{BoxError, HookStage, ItemError, OperationPanicked, PoolError, PoolResult};
pub use handle::{PoolController, PoolHandle};
pub use model::PoolMetrics;
pub use operation::{Operation, SlotWorker};
pub use pool::{run, ArgumentAdapter, Config, FailurePolicy, RunOptions};
pub use sequence::{ChannelSequence, IterSequence, Sequence, StreamSequence, TryStreamSequence};
