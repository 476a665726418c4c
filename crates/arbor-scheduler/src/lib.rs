//! Shared timer service: fixed-rate, fixed-delay and load-adaptive timers
//! driven by one dedicated thread.

pub mod action;
pub mod config;
pub mod scheduler;

pub use action::{TimerAction, panic_message, run_guarded};
pub use config::SchedulerConfig;
pub use scheduler::{Scheduler, TimerMode};
