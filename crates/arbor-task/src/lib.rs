//! Cancellable, pausable background tasks and the bounded pool that runs them.

pub mod config;
pub mod pool;
pub mod task;

pub use config::{OverflowPolicy, PoolConfig};
pub use pool::ControllableThreadPool;
pub use task::{ControllableTask, Progress, TaskContext, TaskInfo, TaskValue};
