use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use arbor_core::{AppError, TaskState};
use arbor_scheduler::{Scheduler, panic_message};

/// Type-erased task output.
pub type TaskValue = Arc<dyn Any + Send + Sync>;

type BoxedWork = Box<dyn FnOnce(&TaskContext) -> anyhow::Result<TaskValue> + Send>;

struct Inner {
    state: TaskState,
    /// Closed by the watchdog once it sees a pause request; workers park on it.
    gate_closed: bool,
    result: Option<TaskValue>,
    error: Option<Arc<anyhow::Error>>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    progress: Option<Progress>,
}

/// Units of work done out of the units known so far.
///
/// `total` may grow while the task discovers more work; it never falls
/// below `done`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub done: u64,
    pub total: u64,
}

/// State shared between the task, its worker and its watchdog.
struct Control {
    inner: Mutex<Inner>,
    wake: Condvar,
    cancel_requested: AtomicBool,
    pause_requested: AtomicBool,
    interrupt: CancellationToken,
}

impl Control {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn watchdog_tick(&self) {
        if self.cancel_requested.load(Ordering::Acquire) {
            self.interrupt.cancel();
            self.wake.notify_all();
        } else if self.pause_requested.load(Ordering::Acquire) {
            let mut inner = self.lock();
            if !inner.gate_closed && inner.state == TaskState::Paused {
                inner.gate_closed = true;
            }
        }
    }
}

/// Handle given to the work closure.
///
/// Work cooperates by calling [`checkpoint`](Self::checkpoint) at loop
/// boundaries: it returns `Err(AppError::Cancelled)` once a cancel was
/// requested and blocks without spinning while the task is paused.
#[derive(Clone)]
pub struct TaskContext {
    task_id: Arc<str>,
    control: Arc<Control>,
}

impl TaskContext {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.cancel_requested.load(Ordering::Acquire)
    }

    /// Token cancelled when the task is interrupted, for work that awaits.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.control.interrupt.clone()
    }

    pub fn checkpoint(&self) -> Result<(), AppError> {
        let mut inner = self.control.lock();
        loop {
            if self.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            if !inner.gate_closed {
                return Ok(());
            }
            inner = self
                .control
                .wake
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Report `done` of `total` units.
    pub fn set_progress(&self, done: u64, total: u64) {
        self.control.lock().progress = Some(Progress {
            done,
            total: total.max(done),
        });
    }

    /// Add finished units and newly discovered ones to the reported progress.
    pub fn advance_progress(&self, done: u64, discovered: u64) {
        let mut inner = self.control.lock();
        let progress = inner.progress.get_or_insert_with(Progress::default);
        progress.done += done;
        progress.total = (progress.total + discovered).max(progress.done);
    }

    pub fn progress(&self) -> Option<Progress> {
        self.control.lock().progress
    }

    /// Sleep that wakes early on cancel, then passes a checkpoint.
    pub fn sleep(&self, duration: Duration) -> Result<(), AppError> {
        let deadline = Instant::now() + duration;
        let mut inner = self.control.lock();
        loop {
            if self.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _) = self
                .control
                .wake
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            inner = guard;
        }
        drop(inner);
        self.checkpoint()
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_id", &self.task_id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Serializable view of a task for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub id: String,
    pub state: TaskState,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Last progress the work reported, if it reports any.
    pub progress: Option<Progress>,
    pub error: Option<String>,
}

/// One cancellable, pausable unit of work.
///
/// Created `Pending`; [`run`](Self::run) executes the work once on the
/// calling thread. A watchdog timer registered with the [`Scheduler`] turns
/// pause requests into a closed gate and re-delivers cancellation until the
/// task reaches a terminal state.
pub struct ControllableTask {
    id: Arc<str>,
    submitted_at: DateTime<Utc>,
    control: Arc<Control>,
    work: Mutex<Option<BoxedWork>>,
    scheduler: Arc<Scheduler>,
    watchdog: Mutex<Option<String>>,
}

impl ControllableTask {
    pub fn new<T, F>(
        id: impl Into<String>,
        work: F,
        scheduler: Arc<Scheduler>,
        watchdog_interval: Duration,
    ) -> Result<Self, AppError>
    where
        T: Any + Send + Sync,
        F: FnOnce(&TaskContext) -> anyhow::Result<T> + Send + 'static,
    {
        let id: Arc<str> = Arc::from(id.into());
        let control = Arc::new(Control {
            inner: Mutex::new(Inner {
                state: TaskState::Pending,
                gate_closed: false,
                result: None,
                error: None,
                started_at: None,
                finished_at: None,
                progress: None,
            }),
            wake: Condvar::new(),
            cancel_requested: AtomicBool::new(false),
            pause_requested: AtomicBool::new(false),
            interrupt: CancellationToken::new(),
        });

        let weak: Weak<Control> = Arc::downgrade(&control);
        let watchdog = scheduler.start_fixed_rate(watchdog_interval, move || {
            if let Some(control) = weak.upgrade() {
                control.watchdog_tick();
            }
            Ok(())
        })?;

        let boxed: BoxedWork = Box::new(move |ctx| work(ctx).map(|v| Arc::new(v) as TaskValue));
        Ok(Self {
            id,
            submitted_at: Utc::now(),
            control,
            work: Mutex::new(Some(boxed)),
            scheduler,
            watchdog: Mutex::new(Some(watchdog)),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> TaskState {
        self.control.lock().state
    }

    /// Cancelled together with the task; lets a queued dispatch stop waiting.
    pub(crate) fn interrupt_token(&self) -> CancellationToken {
        self.control.interrupt.clone()
    }

    /// Execute the work on the current thread.
    ///
    /// A task cancelled while pending finishes without running its work.
    /// Errors and panics from the work are captured, not returned.
    pub fn run(&self) -> Result<(), AppError> {
        let work = self
            .work
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| AppError::TaskAlreadyStarted(self.id.to_string()))?;

        {
            let mut inner = self.control.lock();
            if self.control.cancel_requested.load(Ordering::Acquire) {
                drop(inner);
                debug!(task_id = %self.id, "task cancelled before start");
                self.stop_watchdog();
                return Ok(());
            }
            inner.state = TaskState::Running;
            inner.started_at = Some(Utc::now());
        }

        let ctx = TaskContext {
            task_id: Arc::clone(&self.id),
            control: Arc::clone(&self.control),
        };
        let outcome = catch_unwind(AssertUnwindSafe(|| work(&ctx)));
        self.finish(outcome);
        Ok(())
    }

    fn finish(&self, outcome: std::thread::Result<anyhow::Result<TaskValue>>) {
        {
            let mut inner = self.control.lock();
            inner.gate_closed = false;
            self.control.pause_requested.store(false, Ordering::Release);
            if self.control.cancel_requested.load(Ordering::Acquire) {
                inner.state = TaskState::Cancelled;
                debug!(task_id = %self.id, "worker observed cancellation");
            } else {
                match outcome {
                    Ok(Ok(value)) => {
                        inner.result = Some(value);
                        inner.state = TaskState::Completed;
                    }
                    Ok(Err(e)) => {
                        warn!(task_id = %self.id, "task failed: {e:#}");
                        inner.error = Some(Arc::new(e));
                        inner.state = TaskState::Failed;
                    }
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        warn!(task_id = %self.id, "task panicked: {message}");
                        inner.error = Some(Arc::new(anyhow::anyhow!("task panicked: {message}")));
                        inner.state = TaskState::Failed;
                    }
                }
            }
            if inner.finished_at.is_none() {
                inner.finished_at = Some(Utc::now());
            }
        }
        self.control.wake.notify_all();
        self.stop_watchdog();
    }

    fn stop_watchdog(&self) {
        let id = self
            .watchdog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(id) = id {
            self.scheduler.stop_task(&id);
        }
    }

    /// Request a pause. Legal only while running.
    pub fn pause(&self) -> bool {
        let mut inner = self.control.lock();
        if inner.state != TaskState::Running {
            warn!(task_id = %self.id, state = %inner.state, "cannot pause task");
            return false;
        }
        self.control.pause_requested.store(true, Ordering::Release);
        inner.state = TaskState::Paused;
        info!(task_id = %self.id, "task paused");
        true
    }

    /// Resume a paused task and wake its worker.
    pub fn resume(&self) -> bool {
        {
            let mut inner = self.control.lock();
            if inner.state != TaskState::Paused {
                warn!(task_id = %self.id, state = %inner.state, "cannot resume task");
                return false;
            }
            self.control.pause_requested.store(false, Ordering::Release);
            inner.gate_closed = false;
            inner.state = TaskState::Running;
        }
        self.control.wake.notify_all();
        info!(task_id = %self.id, "task resumed");
        true
    }

    /// Request cancellation. Returns `false` if the task already ended.
    pub fn cancel(&self) -> bool {
        let was_pending = {
            let mut inner = self.control.lock();
            if inner.state.is_terminal() {
                warn!(task_id = %self.id, state = %inner.state, "cannot cancel task");
                return false;
            }
            let was_pending = inner.state == TaskState::Pending;
            self.control.cancel_requested.store(true, Ordering::Release);
            inner.state = TaskState::Cancelled;
            inner.gate_closed = false;
            inner.finished_at = Some(Utc::now());
            was_pending
        };
        self.control.interrupt.cancel();
        self.control.wake.notify_all();
        if was_pending {
            // never reaches a worker that would stop it
            self.stop_watchdog();
        }
        info!(task_id = %self.id, "task cancelled");
        true
    }

    /// Block until the task reaches a terminal state or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> TaskState {
        let deadline = Instant::now() + timeout;
        let mut inner = self.control.lock();
        while !inner.state.is_terminal() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _) = self
                .control
                .wake
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            inner = guard;
        }
        inner.state
    }

    /// The captured value, only once completed.
    pub fn result<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let inner = self.control.lock();
        if inner.state != TaskState::Completed {
            return None;
        }
        inner.result.clone()?.downcast::<T>().ok()
    }

    pub fn error(&self) -> Option<Arc<anyhow::Error>> {
        self.control.lock().error.clone()
    }

    pub fn info(&self) -> TaskInfo {
        let inner = self.control.lock();
        TaskInfo {
            id: self.id.to_string(),
            state: inner.state,
            submitted_at: self.submitted_at,
            started_at: inner.started_at,
            finished_at: inner.finished_at,
            progress: inner.progress,
            error: inner.error.as_ref().map(|e| format!("{e:#}")),
        }
    }
}

impl Drop for ControllableTask {
    fn drop(&mut self) {
        self.stop_watchdog();
    }
}

impl std::fmt::Debug for ControllableTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllableTask")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
