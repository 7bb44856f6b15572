//! Deferred work: generating tasks from recipe timing and consuming them when due.

pub mod dispatcher;
pub mod memory_guard;
pub mod scheduler;

pub use dispatcher::{DispatchOutcome, DispatchSummary, TaskDispatcher};
pub use memory_guard::MemoryGuard;
pub use scheduler::{plan_batch_tasks, StageSchedule, TaskScheduler};
