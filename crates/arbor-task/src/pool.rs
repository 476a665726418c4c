use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use arbor_core::{AppError, TaskState};
use arbor_scheduler::Scheduler;

use crate::config::{OverflowPolicy, PoolConfig};
use crate::task::{ControllableTask, TaskContext, TaskInfo};

/// How a submission gets a worker slot.
enum Admission {
    Slot(OwnedSemaphorePermit),
    Queued,
    CallerRuns,
}

/// Registry and bounded executor for [`ControllableTask`]s.
///
/// At most `max_size` tasks execute at once; up to `queue_capacity` more wait
/// for a slot. Beyond that the [`OverflowPolicy`] decides. Each task runs on a
/// blocking worker thread of the pool's own runtime.
///
/// Cancelled tasks leave the registry immediately but their ids are
/// remembered (bounded by `cancelled_history`) so [`state`](Self::state)
/// keeps reporting [`TaskState::Cancelled`] and a second cancel returns
/// `false`. Completed and failed tasks stay until [`prune_finished`](Self::prune_finished).
pub struct ControllableThreadPool {
    config: PoolConfig,
    scheduler: Arc<Scheduler>,
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    permits: Arc<Semaphore>,
    waiting: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    tasks: DashMap<String, Arc<ControllableTask>>,
    cancelled: Mutex<VecDeque<String>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl ControllableThreadPool {
    pub fn new(config: PoolConfig, scheduler: Arc<Scheduler>) -> Result<Self> {
        config.validate()?;
        // Task bodies run on blocking threads; core_size only sizes the
        // async threads that dispatch them.
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.core_size.max(1))
            .max_blocking_threads(config.max_size)
            .thread_keep_alive(config.idle_timeout())
            .thread_name(config.thread_name.clone())
            .enable_all()
            .build()
            .context("Failed to build worker pool runtime")?;
        let handle = runtime.handle().clone();
        info!(
            core = config.core_size,
            max = config.max_size,
            queue = config.queue_capacity,
            overflow = ?config.overflow,
            "worker pool started"
        );
        Ok(Self {
            permits: Arc::new(Semaphore::new(config.max_size)),
            config,
            scheduler,
            runtime: Mutex::new(Some(runtime)),
            handle,
            waiting: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            tasks: DashMap::new(),
            cancelled: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Submit work under a generated `task-N` id.
    pub fn submit<T, F>(&self, work: F) -> Result<String, AppError>
    where
        T: Any + Send + Sync,
        F: FnOnce(&TaskContext) -> anyhow::Result<T> + Send + 'static,
    {
        let id = loop {
            let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
            let candidate = format!("task-{n}");
            if !self.tasks.contains_key(&candidate) {
                break candidate;
            }
        };
        self.submit_with_id(id, work)
    }

    /// Submit work under a caller-chosen id.
    pub fn submit_with_id<T, F>(&self, id: impl Into<String>, work: F) -> Result<String, AppError>
    where
        T: Any + Send + Sync,
        F: FnOnce(&TaskContext) -> anyhow::Result<T> + Send + 'static,
    {
        let id = id.into();
        if id.is_empty() {
            warn!("refusing task with empty id");
            return Err(AppError::EmptyTaskId);
        }
        if self.closed.load(Ordering::Acquire) {
            warn!(task_id = %id, "refusing task: pool is shut down");
            return Err(AppError::PoolShutdown);
        }

        let (task, admission) = match self.tasks.entry(id.clone()) {
            Entry::Occupied(_) => {
                warn!(task_id = %id, "refusing task with duplicate id");
                return Err(AppError::DuplicateTaskId(id));
            }
            Entry::Vacant(slot) => {
                let task = Arc::new(ControllableTask::new(
                    id.clone(),
                    work,
                    Arc::clone(&self.scheduler),
                    self.config.watchdog_interval(),
                )?);
                let admission = self.admit(&id)?;
                slot.insert(Arc::clone(&task));
                (task, admission)
            }
        };
        self.forget_cancelled(&id);
        debug!(task_id = %id, "task submitted");

        match admission {
            Admission::Slot(permit) => self.dispatch(task, Some(permit)),
            Admission::Queued => self.dispatch(task, None),
            Admission::CallerRuns => {
                debug!(task_id = %id, "queue full, running on the submitting thread");
                task.run()?;
            }
        }
        Ok(id)
    }

    fn admit(&self, id: &str) -> Result<Admission, AppError> {
        if let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() {
            return Ok(Admission::Slot(permit));
        }
        let capacity = self.config.queue_capacity;
        let reserved = self
            .waiting
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| {
                (w < capacity).then_some(w + 1)
            })
            .is_ok();
        if reserved {
            return Ok(Admission::Queued);
        }
        match self.config.overflow {
            OverflowPolicy::CallerRuns => Ok(Admission::CallerRuns),
            OverflowPolicy::Reject => {
                warn!(task_id = %id, capacity, "refusing task: queue is full");
                Err(AppError::QueueFull { capacity })
            }
        }
    }

    fn dispatch(&self, task: Arc<ControllableTask>, permit: Option<OwnedSemaphorePermit>) {
        let permits = Arc::clone(&self.permits);
        let waiting = Arc::clone(&self.waiting);
        let in_flight = Arc::clone(&self.in_flight);
        in_flight.fetch_add(1, Ordering::AcqRel);

        self.handle.spawn(async move {
            let _permit = match permit {
                Some(permit) => permit,
                None => {
                    let interrupted = task.interrupt_token();
                    let acquired = tokio::select! {
                        res = permits.acquire_owned() => res.ok(),
                        _ = interrupted.cancelled() => None,
                    };
                    waiting.fetch_sub(1, Ordering::AcqRel);
                    match acquired {
                        Some(permit) => permit,
                        None => {
                            // cancelled while queued, or the pool closed
                            if !task.state().is_terminal() {
                                task.cancel();
                            }
                            let _ = task.run();
                            in_flight.fetch_sub(1, Ordering::AcqRel);
                            return;
                        }
                    }
                }
            };

            let task_id = task.id().to_string();
            match tokio::task::spawn_blocking(move || task.run()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(task_id = %task_id, "task not run: {e}"),
                Err(e) => error!(task_id = %task_id, "worker thread failed: {e}"),
            }
            in_flight.fetch_sub(1, Ordering::AcqRel);
        });
    }

    fn get(&self, id: &str) -> Option<Arc<ControllableTask>> {
        self.tasks.get(id).map(|t| Arc::clone(t.value()))
    }

    fn all(&self) -> Vec<Arc<ControllableTask>> {
        self.tasks.iter().map(|t| Arc::clone(t.value())).collect()
    }

    fn is_tombstoned(&self, id: &str) -> bool {
        self.cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|c| c == id)
    }

    fn remember_cancelled(&self, id: &str) {
        let mut cancelled = self.cancelled.lock().unwrap_or_else(PoisonError::into_inner);
        cancelled.push_back(id.to_string());
        while cancelled.len() > self.config.cancelled_history {
            cancelled.pop_front();
        }
    }

    fn forget_cancelled(&self, id: &str) {
        self.cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|c| c != id);
    }

    pub fn pause(&self, id: &str) -> bool {
        match self.get(id) {
            Some(task) => task.pause(),
            None => {
                warn!(task_id = %id, "pause requested for unknown task");
                false
            }
        }
    }

    pub fn resume(&self, id: &str) -> bool {
        match self.get(id) {
            Some(task) => task.resume(),
            None => {
                warn!(task_id = %id, "resume requested for unknown task");
                false
            }
        }
    }

    /// Cancel a task and drop it from the registry.
    pub fn cancel(&self, id: &str) -> bool {
        let Some(task) = self.get(id) else {
            warn!(task_id = %id, "cancel requested for unknown or cancelled task");
            return false;
        };
        if !task.cancel() {
            return false;
        }
        self.tasks.remove(id);
        self.remember_cancelled(id);
        true
    }

    /// Pause every running task. Returns the ids that were paused.
    pub fn pause_all(&self) -> Vec<String> {
        self.all()
            .into_iter()
            .filter(|t| t.state() == TaskState::Running && t.pause())
            .map(|t| t.id().to_string())
            .collect()
    }

    pub fn resume_all(&self) -> Vec<String> {
        self.all()
            .into_iter()
            .filter(|t| t.state() == TaskState::Paused && t.resume())
            .map(|t| t.id().to_string())
            .collect()
    }

    /// Cancel every task that has not finished. Returns the cancelled ids.
    pub fn cancel_all(&self) -> Vec<String> {
        let ids: Vec<String> = self
            .all()
            .into_iter()
            .filter(|t| !t.state().is_terminal())
            .map(|t| t.id().to_string())
            .filter(|id| self.cancel(id))
            .collect();
        if !ids.is_empty() {
            info!(count = ids.len(), "cancelled all tasks");
        }
        ids
    }

    /// `None` for ids never submitted, pruned, or forgotten.
    pub fn state(&self, id: &str) -> Option<TaskState> {
        match self.get(id) {
            Some(task) => Some(task.state()),
            None if self.is_tombstoned(id) => Some(TaskState::Cancelled),
            None => None,
        }
    }

    /// The captured value, `None` unless the task completed.
    pub fn result<T: Any + Send + Sync>(&self, id: &str) -> Option<Arc<T>> {
        self.get(id)?.result::<T>()
    }

    pub fn error(&self, id: &str) -> Option<Arc<anyhow::Error>> {
        self.get(id)?.error()
    }

    pub fn task_info(&self, id: &str) -> Option<TaskInfo> {
        self.get(id).map(|t| t.info())
    }

    /// Every registered task, oldest first.
    pub fn snapshot(&self) -> Vec<TaskInfo> {
        let mut infos: Vec<TaskInfo> = self.all().iter().map(|t| t.info()).collect();
        infos.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then(a.id.cmp(&b.id)));
        infos
    }

    /// Block until the task finishes or `timeout` elapses.
    pub fn wait(&self, id: &str, timeout: Duration) -> Option<TaskState> {
        match self.get(id) {
            Some(task) => Some(task.wait(timeout)),
            None => self.state(id),
        }
    }

    /// Drop finished tasks from the registry. Returns how many were removed.
    pub fn prune_finished(&self) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, task| !task.state().is_terminal());
        let pruned = before.saturating_sub(self.tasks.len());
        if pruned > 0 {
            debug!(count = pruned, "pruned finished tasks");
        }
        pruned
    }

    /// Drop one task from the registry if it has finished.
    pub fn remove_finished(&self, id: &str) -> bool {
        self.tasks
            .remove_if(id, |_, task| task.state().is_terminal())
            .is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn running_count(&self) -> usize {
        self.all()
            .iter()
            .filter(|t| t.state() == TaskState::Running)
            .count()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Refuse new work, cancel everything, wait up to `timeout` for workers.
    ///
    /// Must not be called from inside an async context. Workers still busy
    /// after the timeout are abandoned. Returns `true` when all workers ended
    /// in time.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return true;
        }
        self.cancel_all();
        self.permits.close();

        let deadline = Instant::now() + timeout;
        while self.in_flight.load(Ordering::Acquire) > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let stragglers = self.in_flight.load(Ordering::Acquire);

        let runtime = self
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(runtime) = runtime {
            runtime.shutdown_timeout(deadline.saturating_duration_since(Instant::now()));
        }
        if stragglers > 0 {
            warn!(count = stragglers, "abandoning workers that ignored cancellation");
            false
        } else {
            info!("worker pool shut down");
            true
        }
    }
}

impl Drop for ControllableThreadPool {
    fn drop(&mut self) {
        let runtime = self
            .runtime
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(runtime) = runtime {
            self.closed.store(true, Ordering::Release);
            for task in self.tasks.iter() {
                if !task.state().is_terminal() {
                    task.cancel();
                }
            }
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for ControllableThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllableThreadPool")
            .field("tasks", &self.tasks.len())
            .field("waiting", &self.waiting.load(Ordering::Relaxed))
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
