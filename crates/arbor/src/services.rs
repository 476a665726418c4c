use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{debug, warn};

use arbor_config::BrowserConfig;
use arbor_core::TaskState;
use arbor_resource::BusyLevelEstimator;
use arbor_scheduler::Scheduler;
use arbor_task::ControllableThreadPool;
use arbor_tree::{
    AllVisible, FsListing, ModelSink, NodeId, TreeOptions, TreeSyncEngine, UiQueue, ui_channel,
};

use crate::cli::SortArgs;

/// Upper bound on a single load task in the one-shot commands.
const TASK_TIMEOUT: Duration = Duration::from_secs(120);

/// Scheduler, pool and engine wired together, plus the UI side of the queue.
///
/// The thread that owns this value is the UI thread: only it applies batches.
pub(crate) struct Services {
    pub scheduler: Arc<Scheduler>,
    pub engine: TreeSyncEngine,
    queue: UiQueue,
    sink: ModelSink,
    shutdown_timeout: Duration,
}

impl Services {
    pub fn start(config: &BrowserConfig, options: TreeOptions) -> Result<Self> {
        let estimator = Arc::new(BusyLevelEstimator::system());
        let scheduler = Arc::new(Scheduler::new(estimator, &config.scheduler)?);
        let pool = ControllableThreadPool::new(config.pool.clone(), Arc::clone(&scheduler))
            .context("Failed to start worker pool")?;
        let (poster, queue) = ui_channel();
        let engine = TreeSyncEngine::new(
            Arc::new(pool),
            Arc::new(FsListing),
            Arc::new(AllVisible),
            poster,
            options,
        );
        Ok(Self {
            scheduler,
            engine,
            queue,
            sink: ModelSink::new(),
            shutdown_timeout: config.pool.shutdown_timeout(),
        })
    }

    /// Apply every posted batch; returns the nodes whose children changed.
    pub fn apply_pending(&mut self) -> Vec<NodeId> {
        let applied = self.queue.drain(&mut self.sink);
        if applied > 0 {
            debug!(batches = applied, "applied tree updates");
        }
        self.sink.take_changed()
    }

    /// Block until `task_id` finishes, then apply what it posted.
    pub fn finish(&mut self, task_id: &str) -> Result<()> {
        let pool = Arc::clone(self.engine.pool());
        match pool.wait(task_id, TASK_TIMEOUT) {
            Some(TaskState::Completed) => {}
            Some(TaskState::Failed) => {
                let reason = pool
                    .error(task_id)
                    .map(|e| format!("{e:#}"))
                    .unwrap_or_else(|| "unknown error".to_string());
                bail!("Task {task_id} failed: {reason}");
            }
            Some(TaskState::Cancelled) => bail!("Task {task_id} was cancelled"),
            Some(state) => bail!(
                "Task {task_id} still {state} after {}s",
                TASK_TIMEOUT.as_secs()
            ),
            None => bail!("Task {task_id} is unknown to the pool"),
        }
        self.apply_pending();
        Ok(())
    }

    /// Stop timers and workers.
    pub fn shutdown(self) {
        self.scheduler.stop_all();
        if !self.engine.pool().shutdown(self.shutdown_timeout) {
            warn!(
                timeout_ms = self.shutdown_timeout.as_millis() as u64,
                "workers still busy at shutdown, abandoned"
            );
        }
        self.scheduler.shutdown();
    }
}

/// Tree options with command-line sort flags applied.
pub(crate) fn tree_options(config: &BrowserConfig, sort: SortArgs) -> TreeOptions {
    let mut options = config.tree.clone();
    if let Some(criterion) = sort.sort {
        options.sort = criterion;
    }
    if sort.mixed {
        options.folders_first = false;
    }
    options
}
