#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Task id must not be empty")]
    EmptyTaskId,

    #[error("Duplicate task id '{0}'")]
    DuplicateTaskId(String),

    #[error("Task '{0}' has already been started")]
    TaskAlreadyStarted(String),

    #[error("Task was cancelled")]
    Cancelled,

    #[error("Thread pool is shut down")]
    PoolShutdown,

    #[error("Work queue is full ({capacity} queued tasks)")]
    QueueFull { capacity: usize },

    #[error("Invalid pool configuration: {0}")]
    InvalidPoolConfig(String),

    #[error("Timer interval must be greater than zero")]
    InvalidInterval,

    #[error("Invalid delay range: min {min_ms} ms, max {max_ms} ms")]
    InvalidDelayRange { min_ms: u64, max_ms: u64 },

    #[error("Scheduler is stopped")]
    SchedulerStopped,

    #[error("Node {0} is already loading")]
    AlreadyLoading(u64),

    #[error("Node {0} is not a directory")]
    NotADirectory(u64),
}

impl AppError {
    /// Whether this error reports an observed cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
