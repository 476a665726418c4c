use serde::{Deserialize, Serialize};
use std::time::Duration;

use arbor_core::AppError;

/// What to do with a submission when every worker is busy and the queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Run the task synchronously on the submitting thread.
    #[default]
    CallerRuns,
    /// Refuse the task with [`AppError::QueueFull`].
    Reject,
}

/// `[pool]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Async dispatcher threads (default: logical CPU count).
    ///
    /// Task bodies run on separate blocking threads, at most `max_size` of
    /// them. Those are spawned on demand and every one is reaped after
    /// `idle_timeout_ms` without work, so no task thread is kept warm.
    #[serde(default = "default_core_size")]
    pub core_size: usize,
    /// Maximum tasks executing at once (default: 2 x logical CPU count).
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    /// Idle worker keep-alive in milliseconds.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Tasks allowed to wait for a free slot before the overflow policy applies.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub overflow: OverflowPolicy,
    /// Period of each task's cancel/pause watchdog.
    #[serde(default = "default_watchdog_interval_ms")]
    pub watchdog_interval_ms: u64,
    /// Cancelled ids remembered so `state()` can still report them.
    #[serde(default = "default_cancelled_history")]
    pub cancelled_history: usize,
    /// How long `shutdown` waits for workers before abandoning them.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

fn cpu_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_core_size() -> usize {
    cpu_count()
}

fn default_max_size() -> usize {
    cpu_count() * 2
}

fn default_idle_timeout_ms() -> u64 {
    60_000
}

fn default_queue_capacity() -> usize {
    100
}

fn default_watchdog_interval_ms() -> u64 {
    100
}

fn default_cancelled_history() -> usize {
    1024
}

fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

fn default_thread_name() -> String {
    "controllable-pool".to_string()
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            core_size: default_core_size(),
            max_size: default_max_size(),
            idle_timeout_ms: default_idle_timeout_ms(),
            queue_capacity: default_queue_capacity(),
            overflow: OverflowPolicy::default(),
            watchdog_interval_ms: default_watchdog_interval_ms(),
            cancelled_history: default_cancelled_history(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            thread_name: default_thread_name(),
        }
    }
}

impl PoolConfig {
    /// Pool sized explicitly; everything else default.
    pub fn sized(core_size: usize, max_size: usize, queue_capacity: usize) -> Self {
        Self {
            core_size,
            max_size,
            queue_capacity,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.max_size == 0 {
            return Err(AppError::InvalidPoolConfig(
                "max_size must be greater than 0".into(),
            ));
        }
        if self.max_size < self.core_size {
            return Err(AppError::InvalidPoolConfig(format!(
                "max_size ({}) must not be smaller than core_size ({})",
                self.max_size, self.core_size
            )));
        }
        if self.watchdog_interval_ms == 0 {
            return Err(AppError::InvalidPoolConfig(
                "watchdog_interval_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
