use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use dashmap::DashMap;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use arbor_core::AppError;
use arbor_resource::{BusyLevelEstimator, DelayCurve};

use crate::action::{TimerAction, run_guarded};
use crate::config::SchedulerConfig;

/// How a timer computes its next firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TimerMode {
    /// Start-to-start period; late ticks are skipped instead of bursting.
    FixedRate { interval: Duration },
    /// Pause measured from the end of one run to the start of the next.
    FixedDelay { delay: Duration },
    /// Pause chosen from the busy level after every run.
    Dynamic { min: Duration, max: Duration },
}

struct TimerEntry {
    mode: TimerMode,
    abort: AbortHandle,
}

/// Timer service shared by every repeating job in the process.
///
/// All timers run on one dedicated thread driving a current-thread tokio
/// runtime, so actions must be short; long work belongs in the task pool.
pub struct Scheduler {
    handle: Handle,
    timers: DashMap<String, TimerEntry>,
    estimator: Arc<BusyLevelEstimator>,
    curve: DelayCurve,
    shutdown: CancellationToken,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl Scheduler {
    /// Start the timer thread.
    pub fn new(estimator: Arc<BusyLevelEstimator>, config: &SchedulerConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .context("Failed to build timer runtime")?;
        let handle = runtime.handle().clone();
        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();
        let thread = std::thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || {
                runtime.block_on(stop.cancelled());
                debug!("timer thread exiting");
            })
            .context("Failed to spawn timer thread")?;

        Ok(Self {
            handle,
            timers: DashMap::new(),
            estimator,
            curve: DelayCurve::new(config.busy_strength),
            shutdown,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Scheduler sampling the real system load with default settings.
    pub fn with_defaults() -> Result<Self> {
        Self::new(
            Arc::new(BusyLevelEstimator::system()),
            &SchedulerConfig::default(),
        )
    }

    /// Run `action` every `interval`, first firing immediately.
    pub fn start_fixed_rate<F>(&self, interval: Duration, action: F) -> Result<String, AppError>
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.start_fixed_rate_after(Duration::ZERO, interval, action)
    }

    /// Run `action` every `interval` after an initial delay.
    pub fn start_fixed_rate_after<F>(
        &self,
        initial: Duration,
        interval: Duration,
        action: F,
    ) -> Result<String, AppError>
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if interval.is_zero() {
            warn!("refusing fixed-rate timer with zero interval");
            return Err(AppError::InvalidInterval);
        }
        let action: TimerAction = Arc::new(action);
        self.spawn_timer(TimerMode::FixedRate { interval }, move |id| async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + initial, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                run_guarded(&id, &action);
            }
        })
    }

    /// Run `action`, wait `delay` after it returns, repeat.
    pub fn start_fixed_delay<F>(&self, delay: Duration, action: F) -> Result<String, AppError>
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if delay.is_zero() {
            warn!("refusing fixed-delay timer with zero delay");
            return Err(AppError::InvalidInterval);
        }
        let action: TimerAction = Arc::new(action);
        self.spawn_timer(TimerMode::FixedDelay { delay }, move |id| async move {
            loop {
                run_guarded(&id, &action);
                tokio::time::sleep(delay).await;
            }
        })
    }

    /// Run `action` after `min`, then keep rescheduling it with a delay in
    /// `[min, max]` that grows exponentially with the system busy level.
    pub fn start_dynamic_delay<F>(
        &self,
        min: Duration,
        max: Duration,
        action: F,
    ) -> Result<String, AppError>
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if min > max {
            warn!(
                min_ms = min.as_millis() as u64,
                max_ms = max.as_millis() as u64,
                "refusing dynamic-delay timer with inverted range"
            );
            return Err(AppError::InvalidDelayRange {
                min_ms: min.as_millis() as u64,
                max_ms: max.as_millis() as u64,
            });
        }
        let action: TimerAction = Arc::new(action);
        let estimator = Arc::clone(&self.estimator);
        let curve = self.curve;
        let id = self.spawn_timer(TimerMode::Dynamic { min, max }, move |id| async move {
            tokio::time::sleep(min).await;
            loop {
                run_guarded(&id, &action);
                let delay = curve.delay(min, max, estimator.busy_level());
                tokio::time::sleep(delay).await;
            }
        })?;
        info!(
            timer_id = %id,
            min_ms = min.as_millis() as u64,
            max_ms = max.as_millis() as u64,
            "dynamic-delay timer started"
        );
        Ok(id)
    }

    fn spawn_timer<M, Fut>(&self, mode: TimerMode, make: M) -> Result<String, AppError>
    where
        M: FnOnce(String) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            return Err(AppError::SchedulerStopped);
        }
        let id = ulid::Ulid::new().to_string();
        let join = self.handle.spawn(make(id.clone()));
        self.timers.insert(
            id.clone(),
            TimerEntry {
                mode,
                abort: join.abort_handle(),
            },
        );
        debug!(timer_id = %id, ?mode, "timer registered");
        Ok(id)
    }

    /// Cancel a timer. A firing already in progress finishes normally.
    ///
    /// Returns `false` when the id is unknown or was already stopped.
    pub fn stop_task(&self, id: &str) -> bool {
        match self.timers.remove(id) {
            Some((_, entry)) => {
                entry.abort.abort();
                debug!(timer_id = %id, "timer stopped");
                true
            }
            None => {
                warn!(timer_id = %id, "stop requested for unknown or stopped timer");
                false
            }
        }
    }

    /// Cancel every timer. Returns how many were stopped.
    pub fn stop_all(&self) -> usize {
        let ids: Vec<String> = self.timers.iter().map(|e| e.key().clone()).collect();
        let stopped = ids.iter().filter(|id| self.stop_task(id)).count();
        if stopped > 0 {
            info!(count = stopped, "all timers stopped");
        }
        stopped
    }

    /// Number of registered timers.
    pub fn active_count(&self) -> usize {
        self.timers.len()
    }

    /// Mode of a registered timer.
    pub fn mode(&self, id: &str) -> Option<TimerMode> {
        self.timers.get(id).map(|e| e.mode)
    }

    /// Stop all timers and join the timer thread.
    ///
    /// Further `start_*` calls fail with [`AppError::SchedulerStopped`].
    pub fn shutdown(&self) {
        self.stop_all();
        self.shutdown.cancel();
        let thread = self.thread.lock().ok().and_then(|mut t| t.take());
        if let Some(thread) = thread {
            if thread.thread().id() == std::thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                warn!("timer thread panicked during shutdown");
            }
        }
        info!("scheduler shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for entry in self.timers.iter() {
            entry.abort.abort();
        }
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("timers", &self.timers.len())
            .field("shut_down", &self.shutdown.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
