use std::cmp::Ordering;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use arbor_core::{AppError, SortSpec};
use arbor_scheduler::Scheduler;
use arbor_task::{ControllableThreadPool, TaskContext};

use crate::diff::diff_children;
use crate::entry::{DirEntry, ListingProvider};
use crate::natural::{compare_entries, sort_entries};
use crate::node::{LoadState, NodeId, TreeNode};
use crate::options::TreeOptions;
use crate::ui::{MutationBatch, TreeOp, UiPoster, Viewport};

/// Result of a `load_children` or `load_all` task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub node: NodeId,
    /// Entries listed across every directory the task read.
    pub entries: usize,
    /// Single-directory levels opened by the chained expand.
    pub auto_expanded: usize,
    /// Status shown instead of entries, if any.
    pub status: Option<String>,
}

impl LoadReport {
    fn new(node: NodeId) -> Self {
        Self {
            node,
            entries: 0,
            auto_expanded: 0,
            status: None,
        }
    }
}

/// Result of a `refresh` task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub node: NodeId,
    /// Directories diffed, the refreshed node included.
    pub visited: usize,
    pub kept: usize,
    pub added: usize,
    pub removed: usize,
    /// Visible subdirectories skipped because another task was loading them.
    pub skipped_busy: usize,
}

impl RefreshReport {
    fn new(node: NodeId) -> Self {
        Self {
            node,
            visited: 0,
            kept: 0,
            added: 0,
            removed: 0,
            skipped_busy: 0,
        }
    }
}

/// Nodes a task holds in `Loading`.
///
/// Committing hands them to the UI thread to settle with the batch; dropping
/// an uncommitted ticket (failure, cancellation, refused submission) restores
/// their previous state.
struct LoadTicket {
    held: Vec<(Arc<TreeNode>, LoadState)>,
    committed: bool,
}

impl LoadTicket {
    fn acquire(node: &Arc<TreeNode>) -> Result<Self, AppError> {
        let previous = node.begin_load().inspect_err(|_| {
            warn!(node = %node.id(), "load already in progress");
        })?;
        Ok(Self {
            held: vec![(Arc::clone(node), previous)],
            committed: false,
        })
    }

    fn try_add(&mut self, node: &Arc<TreeNode>) -> bool {
        match node.begin_load() {
            Ok(previous) => {
                self.held.push((Arc::clone(node), previous));
                true
            }
            Err(_) => false,
        }
    }

    /// Post `batch`, settling held nodes as loaded or back to where they were.
    fn commit(mut self, poster: &UiPoster, mut batch: MutationBatch, loaded: bool) -> bool {
        for (node, previous) in &self.held {
            let state = if loaded { LoadState::Loaded } else { *previous };
            batch.settle(Arc::clone(node), state);
        }
        self.committed = poster.post(batch);
        self.committed
    }
}

impl Drop for LoadTicket {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for (node, previous) in &self.held {
            node.set_load_state(*previous);
        }
    }
}

/// Keeps a lazily loaded directory tree in sync with the filesystem.
///
/// Listings and diffs run as tasks on the shared pool. Their structural
/// effects are posted as [`MutationBatch`]es for the UI thread to apply, so
/// workers never write to an attached node. Cloning is cheap and shares the
/// same pool and queue.
#[derive(Clone)]
pub struct TreeSyncEngine {
    pool: Arc<ControllableThreadPool>,
    listing: Arc<dyn ListingProvider>,
    viewport: Arc<dyn Viewport>,
    poster: UiPoster,
    options: Arc<TreeOptions>,
}

impl TreeSyncEngine {
    pub fn new(
        pool: Arc<ControllableThreadPool>,
        listing: Arc<dyn ListingProvider>,
        viewport: Arc<dyn Viewport>,
        poster: UiPoster,
        options: TreeOptions,
    ) -> Self {
        Self {
            pool,
            listing,
            viewport,
            poster,
            options: Arc::new(options),
        }
    }

    pub fn pool(&self) -> &Arc<ControllableThreadPool> {
        &self.pool
    }

    pub fn options(&self) -> &TreeOptions {
        &self.options
    }

    fn directory_path(&self, node: &TreeNode) -> Result<PathBuf, AppError> {
        match node.entry() {
            Some(entry) if entry.is_dir => Ok(entry.path),
            _ => {
                warn!(node = %node.id(), label = %node.label(), "not a directory");
                Err(AppError::NotADirectory(node.id().get()))
            }
        }
    }

    fn spec_for(&self, node: &TreeNode) -> SortSpec {
        node.sort_override()
            .unwrap_or_else(|| self.options.sort_spec())
    }

    /// List an unloaded directory and replace its placeholder.
    ///
    /// An empty directory gets one "empty" status child and an unreadable one
    /// a "load failed" status. When the only entry is a directory it is
    /// loaded and expanded too, down to `auto_expand_depth` levels. A node
    /// that is already loaded is refreshed instead.
    pub fn load_children(&self, node: &Arc<TreeNode>) -> Result<String, AppError> {
        self.directory_path(node)?;
        if node.load_state() == LoadState::Loaded {
            return self.refresh(node);
        }
        let ticket = LoadTicket::acquire(node)?;
        let engine = self.clone();
        let target = Arc::clone(node);
        let task_id = self
            .pool
            .submit(move |ctx: &TaskContext| engine.run_load(ctx, target, ticket))?;
        debug!(node = %node.id(), task_id = %task_id, "load submitted");
        Ok(task_id)
    }

    fn run_load(
        &self,
        ctx: &TaskContext,
        node: Arc<TreeNode>,
        ticket: LoadTicket,
    ) -> anyhow::Result<LoadReport> {
        let mut report = LoadReport::new(node.id());
        let children = self.list_as_nodes(ctx, &node, &mut report)?;
        let chain_start = single_directory(&children);

        let mut batch = MutationBatch::new();
        replace_children(&mut batch, &node, children);
        if let Some(first) = chain_start {
            self.expand_chain(ctx, first, &mut batch, &mut report)?;
        }
        ticket.commit(&self.poster, batch, true);
        info!(
            node = %node.id(),
            entries = report.entries,
            auto_expanded = report.auto_expanded,
            "directory loaded"
        );
        Ok(report)
    }

    /// Listing of `node` as fresh detached nodes, sorted.
    fn list_as_nodes(
        &self,
        ctx: &TaskContext,
        node: &TreeNode,
        report: &mut LoadReport,
    ) -> Result<Vec<Arc<TreeNode>>, AppError> {
        let path = self.directory_path(node)?;
        let listed = self.listing.list_children_once(&path);
        ctx.checkpoint()?;
        Ok(self.entries_to_nodes(listed, self.spec_for(node), &path, report))
    }

    fn entries_to_nodes(
        &self,
        listed: io::Result<Vec<DirEntry>>,
        spec: SortSpec,
        path: &std::path::Path,
        report: &mut LoadReport,
    ) -> Vec<Arc<TreeNode>> {
        match listed {
            Ok(entries) if entries.is_empty() => {
                report.status = Some(self.options.empty_text.clone());
                vec![TreeNode::status(self.options.empty_text.as_str())]
            }
            Ok(mut entries) => {
                report.entries += entries.len();
                sort_entries(&mut entries, spec);
                entries.into_iter().map(TreeNode::from_entry).collect()
            }
            Err(e) => {
                warn!(path = %path.display(), "listing failed: {e}");
                let text = self.options.failure_text(&e);
                report.status = Some(text.clone());
                vec![TreeNode::status(text)]
            }
        }
    }

    /// Load a chain of single-directory levels below a fresh node.
    fn expand_chain(
        &self,
        ctx: &TaskContext,
        first: Arc<TreeNode>,
        batch: &mut MutationBatch,
        report: &mut LoadReport,
    ) -> Result<(), AppError> {
        let mut current = first;
        for _ in 0..self.options.auto_expand_depth {
            let mut level = LoadReport::new(current.id());
            let children = self.list_as_nodes(ctx, &current, &mut level)?;
            report.entries += level.entries;
            report.auto_expanded += 1;
            let next = single_directory(&children);
            current.attach_detached(children);
            batch.push(TreeOp::Expand(Arc::clone(&current)));
            match next {
                Some(next) => current = next,
                None => return Ok(()),
            }
        }
        debug!(
            depth = self.options.auto_expand_depth,
            "auto-expand chain stopped at depth limit"
        );
        Ok(())
    }

    /// Reconcile a loaded directory with a fresh listing.
    ///
    /// Children still present keep their identity. Vanished ones are
    /// removed and new ones inserted at their sorted position. Kept
    /// subdirectories that are loaded and visible are refreshed the same way
    /// within the same task. An unloaded node is loaded instead.
    pub fn refresh(&self, node: &Arc<TreeNode>) -> Result<String, AppError> {
        self.directory_path(node)?;
        if node.load_state() == LoadState::Unloaded {
            return self.load_children(node);
        }
        let ticket = LoadTicket::acquire(node)?;
        let engine = self.clone();
        let target = Arc::clone(node);
        let task_id = self
            .pool
            .submit(move |ctx: &TaskContext| engine.run_refresh(ctx, target, ticket))?;
        debug!(node = %node.id(), task_id = %task_id, "refresh submitted");
        Ok(task_id)
    }

    fn run_refresh(
        &self,
        ctx: &TaskContext,
        node: Arc<TreeNode>,
        mut ticket: LoadTicket,
    ) -> anyhow::Result<RefreshReport> {
        let mut report = RefreshReport::new(node.id());
        let mut batch = MutationBatch::new();
        self.refresh_node(ctx, &node, &mut ticket, &mut batch, &mut report)?;
        ticket.commit(&self.poster, batch, true);
        debug!(
            node = %node.id(),
            visited = report.visited,
            added = report.added,
            removed = report.removed,
            "refresh finished"
        );
        Ok(report)
    }

    fn refresh_node(
        &self,
        ctx: &TaskContext,
        node: &Arc<TreeNode>,
        ticket: &mut LoadTicket,
        batch: &mut MutationBatch,
        report: &mut RefreshReport,
    ) -> Result<(), AppError> {
        ctx.checkpoint()?;
        report.visited += 1;
        let path = self.directory_path(node)?;
        let spec = self.spec_for(node);
        let current = node.children();

        let listed = self.listing.list_children_once(&path);
        ctx.checkpoint()?;
        let entries = match listed {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %path.display(), "listing failed: {e}");
                let text = self.options.failure_text(&e);
                self.show_status(batch, node, &current, text, report);
                return Ok(());
            }
        };
        if entries.is_empty() {
            let text = self.options.empty_text.clone();
            self.show_status(batch, node, &current, text, report);
            return Ok(());
        }

        let diff = diff_children(&current, entries);
        let mut changed = !diff.is_unchanged();
        ctx.advance_progress(0, (diff.keep.len() + diff.add.len()) as u64);
        for child in diff.remove {
            batch.push(TreeOp::Remove {
                parent: Arc::clone(node),
                child,
            });
            report.removed += 1;
        }
        changed |= self.update_kept(node, &diff.keep, spec, batch);
        for (child, _) in &diff.keep {
            report.kept += 1;
            if child.is_directory()
                && child.load_state() == LoadState::Loaded
                && self.viewport.is_visible(child)
            {
                if ticket.try_add(child) {
                    self.refresh_node(ctx, child, ticket, batch, report)?;
                } else {
                    debug!(node = %child.id(), "subdirectory busy, skipped");
                    report.skipped_busy += 1;
                }
            }
            ctx.advance_progress(1, 0);
        }
        let mut added = diff.add;
        sort_entries(&mut added, spec);
        for entry in added {
            ctx.checkpoint()?;
            batch.push(TreeOp::InsertSorted {
                parent: Arc::clone(node),
                child: TreeNode::from_entry(entry),
                spec,
            });
            report.added += 1;
            ctx.advance_progress(1, 0);
        }
        if changed {
            batch.push(TreeOp::StructureChanged(Arc::clone(node)));
        }
        Ok(())
    }

    /// Queue the fresh metadata of kept children. When timestamps moved, the
    /// kept children are re-sorted by the new values. Returns whether the
    /// order changed.
    fn update_kept(
        &self,
        node: &Arc<TreeNode>,
        keep: &[(Arc<TreeNode>, DirEntry)],
        spec: SortSpec,
        batch: &mut MutationBatch,
    ) -> bool {
        let mut stale = false;
        for (child, fresh) in keep {
            let same_times = child
                .entry()
                .is_some_and(|e| e.created == fresh.created && e.modified == fresh.modified);
            if same_times {
                continue;
            }
            stale = true;
            batch.push(TreeOp::UpdateEntry {
                node: Arc::clone(child),
                entry: fresh.clone(),
            });
        }
        if !stale {
            return false;
        }
        let mut order: Vec<&(Arc<TreeNode>, DirEntry)> = keep.iter().collect();
        order.sort_by(|(_, a), (_, b)| compare_entries(a, b, spec));
        if order.iter().zip(keep).all(|((a, _), (b, _))| Arc::ptr_eq(a, b)) {
            return false;
        }
        batch.push(TreeOp::Reorder {
            parent: Arc::clone(node),
            order: order.into_iter().map(|(child, _)| Arc::clone(child)).collect(),
        });
        true
    }

    /// Replace the children with one status row unless it is already shown.
    fn show_status(
        &self,
        batch: &mut MutationBatch,
        node: &Arc<TreeNode>,
        current: &[Arc<TreeNode>],
        text: String,
        report: &mut RefreshReport,
    ) {
        if matches!(current, [only] if only.status_text().as_deref() == Some(text.as_str())) {
            return;
        }
        report.removed += current.len();
        replace_children(batch, node, vec![TreeNode::status(text)]);
    }

    /// Insert one entry into a loaded directory without a full refresh.
    ///
    /// Siblings keep their identity. Returns `None` when the parent has not
    /// been loaded yet (the entry appears with its first load) or no UI is
    /// listening.
    pub fn insert_sorted(
        &self,
        parent: &Arc<TreeNode>,
        entry: DirEntry,
    ) -> Result<Option<Arc<TreeNode>>, AppError> {
        self.directory_path(parent)?;
        if parent.load_state() == LoadState::Unloaded {
            debug!(node = %parent.id(), name = %entry.name, "parent unloaded, insert skipped");
            return Ok(None);
        }
        let child = TreeNode::from_entry(entry);
        let mut batch = MutationBatch::new();
        batch.push(TreeOp::InsertSorted {
            parent: Arc::clone(parent),
            child: Arc::clone(&child),
            spec: self.spec_for(parent),
        });
        batch.push(TreeOp::StructureChanged(Arc::clone(parent)));
        Ok(self.poster.post(batch).then_some(child))
    }

    /// Load the whole subtree below `node`, `max_depth` levels deep, in one
    /// task. Existing children are replaced.
    pub fn load_all(&self, node: &Arc<TreeNode>, max_depth: usize) -> Result<String, AppError> {
        self.directory_path(node)?;
        let ticket = LoadTicket::acquire(node)?;
        let engine = self.clone();
        let target = Arc::clone(node);
        let depth = max_depth.max(1);
        let task_id = self.pool.submit(move |ctx: &TaskContext| {
            let mut report = LoadReport::new(target.id());
            let children = engine.build_subtree(ctx, &target, depth, &mut report)?;
            let mut batch = MutationBatch::new();
            replace_children(&mut batch, &target, children);
            ticket.commit(&engine.poster, batch, true);
            info!(node = %target.id(), entries = report.entries, "subtree loaded");
            anyhow::Ok(report)
        })?;
        info!(node = %node.id(), task_id = %task_id, depth, "full load submitted");
        Ok(task_id)
    }

    fn build_subtree(
        &self,
        ctx: &TaskContext,
        node: &Arc<TreeNode>,
        depth: usize,
        report: &mut LoadReport,
    ) -> Result<Vec<Arc<TreeNode>>, AppError> {
        let mut level = LoadReport::new(node.id());
        let children = self.list_as_nodes(ctx, node, &mut level)?;
        report.entries += level.entries;
        ctx.advance_progress(0, level.entries as u64);
        for child in children.iter().filter(|c| c.is_entry()) {
            if depth > 1 && child.is_directory() {
                ctx.checkpoint()?;
                let grandchildren = self.build_subtree(ctx, child, depth - 1, report)?;
                child.attach_detached(grandchildren);
            }
            ctx.advance_progress(1, 0);
        }
        Ok(children)
    }

    /// Re-sort a node and its loaded descendants, keeping every node.
    ///
    /// `spec` sticks to the re-sorted nodes and orders later inserts.
    /// The task's value is the number of nodes whose order changed.
    pub fn sort_children(&self, node: &Arc<TreeNode>, spec: SortSpec) -> Result<String, AppError> {
        self.directory_path(node)?;
        let ticket = LoadTicket::acquire(node)?;
        let engine = self.clone();
        let target = Arc::clone(node);
        let task_id = self.pool.submit(move |ctx: &TaskContext| {
            let mut ticket = ticket;
            let mut batch = MutationBatch::new();
            let reordered = engine.reorder_node(ctx, &target, spec, &mut ticket, &mut batch)?;
            ticket.commit(&engine.poster, batch, false);
            anyhow::Ok(reordered)
        })?;
        debug!(node = %node.id(), task_id = %task_id, ?spec, "sort submitted");
        Ok(task_id)
    }

    fn reorder_node(
        &self,
        ctx: &TaskContext,
        node: &Arc<TreeNode>,
        spec: SortSpec,
        ticket: &mut LoadTicket,
        batch: &mut MutationBatch,
    ) -> Result<usize, AppError> {
        ctx.checkpoint()?;
        node.set_sort_override(spec);
        let current = node.children();
        let mut keyed: Vec<(Arc<TreeNode>, Option<DirEntry>)> =
            current.iter().map(|c| (Arc::clone(c), c.entry())).collect();
        keyed.sort_by(|(_, a), (_, b)| match (a, b) {
            (Some(x), Some(y)) => compare_entries(x, y, spec),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
        let order: Vec<Arc<TreeNode>> = keyed.into_iter().map(|(child, _)| child).collect();

        let mut reordered = 0;
        if order.iter().zip(&current).any(|(a, b)| !Arc::ptr_eq(a, b)) {
            batch.push(TreeOp::Reorder {
                parent: Arc::clone(node),
                order: order.clone(),
            });
            batch.push(TreeOp::StructureChanged(Arc::clone(node)));
            reordered += 1;
        }
        for child in &order {
            if child.is_directory()
                && child.load_state() == LoadState::Loaded
                && ticket.try_add(child)
            {
                reordered += self.reorder_node(ctx, child, spec, ticket, batch)?;
            }
        }
        Ok(reordered)
    }

    /// Refresh `node` on a load-adaptive timer: every `min` on an idle
    /// system, backing off towards `max` as it gets busy.
    ///
    /// Ticks that find the previous refresh still running are skipped.
    /// Each tick drops the refresh tasks earlier ticks left finished in the
    /// pool, so a long watch does not grow the registry.
    pub fn watch(
        &self,
        node: &Arc<TreeNode>,
        scheduler: &Scheduler,
        min: Duration,
        max: Duration,
    ) -> Result<String, AppError> {
        self.directory_path(node)?;
        let engine = self.clone();
        let target = Arc::clone(node);
        let submitted: Mutex<Vec<String>> = Mutex::new(Vec::new());
        let timer_id = scheduler.start_dynamic_delay(min, max, move || {
            let mut submitted = submitted.lock().unwrap_or_else(PoisonError::into_inner);
            submitted.retain(|id| !engine.pool.remove_finished(id) && engine.pool.contains(id));
            match engine.refresh(&target) {
                Ok(task_id) => {
                    debug!(node = %target.id(), task_id = %task_id, "periodic refresh");
                    submitted.push(task_id);
                    Ok(())
                }
                Err(AppError::AlreadyLoading(_)) => Ok(()),
                Err(e) => Err(e.into()),
            }
        })?;
        info!(node = %node.id(), timer_id = %timer_id, "watching directory");
        Ok(timer_id)
    }
}

impl std::fmt::Debug for TreeSyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeSyncEngine")
            .field("pool", &self.pool)
            .field("options", &self.options)
            .finish()
    }
}

fn single_directory(children: &[Arc<TreeNode>]) -> Option<Arc<TreeNode>> {
    match children {
        [only] if only.is_directory() => Some(Arc::clone(only)),
        _ => None,
    }
}

fn replace_children(batch: &mut MutationBatch, node: &Arc<TreeNode>, children: Vec<Arc<TreeNode>>) {
    for old in node.children() {
        batch.push(TreeOp::Remove {
            parent: Arc::clone(node),
            child: old,
        });
    }
    for (index, child) in children.into_iter().enumerate() {
        batch.push(TreeOp::InsertAt {
            parent: Arc::clone(node),
            child,
            index,
        });
    }
    batch.push(TreeOp::StructureChanged(Arc::clone(node)));
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
