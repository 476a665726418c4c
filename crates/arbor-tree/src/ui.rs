//! Hand-off of structural changes to the thread that owns the tree.

use std::cmp::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use arbor_core::SortSpec;

use crate::entry::DirEntry;
use crate::natural::compare_entries;
use crate::node::{LoadState, NodeId, TreeNode};

/// Receiver of structural changes, called only on the UI thread.
pub trait UiSink {
    fn insert_child(&mut self, parent: &Arc<TreeNode>, child: Arc<TreeNode>, index: usize);
    fn remove_child(&mut self, parent: &Arc<TreeNode>, child: &Arc<TreeNode>);
    fn notify_structure_changed(&mut self, node: &Arc<TreeNode>);
    /// Open a node after a chained single-directory load.
    fn expand(&mut self, _node: &Arc<TreeNode>) {}
}

/// Sink that edits the in-memory [`TreeNode`] model and records which nodes
/// changed. View layers wrap it and forward the notifications.
#[derive(Debug, Default)]
pub struct ModelSink {
    changed: Vec<NodeId>,
}

impl ModelSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nodes reported changed since the last call.
    pub fn take_changed(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.changed)
    }
}

impl UiSink for ModelSink {
    fn insert_child(&mut self, parent: &Arc<TreeNode>, child: Arc<TreeNode>, index: usize) {
        parent.insert_child_at(index, child);
    }

    fn remove_child(&mut self, parent: &Arc<TreeNode>, child: &Arc<TreeNode>) {
        if !parent.remove_child(child) {
            debug!(parent = %parent.id(), child = %child.id(), "child already detached");
        }
    }

    fn notify_structure_changed(&mut self, node: &Arc<TreeNode>) {
        if !self.changed.contains(&node.id()) {
            self.changed.push(node.id());
        }
    }

    fn expand(&mut self, node: &Arc<TreeNode>) {
        node.set_expanded(true);
    }
}

/// One structural change.
#[derive(Debug, Clone)]
pub enum TreeOp {
    InsertAt {
        parent: Arc<TreeNode>,
        child: Arc<TreeNode>,
        index: usize,
    },
    /// Insert at the sorted position found when the op is applied.
    InsertSorted {
        parent: Arc<TreeNode>,
        child: Arc<TreeNode>,
        spec: SortSpec,
    },
    Remove {
        parent: Arc<TreeNode>,
        child: Arc<TreeNode>,
    },
    /// Swap in newer metadata for a kept entry.
    UpdateEntry {
        node: Arc<TreeNode>,
        entry: DirEntry,
    },
    /// Rearrange existing children without replacing them.
    Reorder {
        parent: Arc<TreeNode>,
        order: Vec<Arc<TreeNode>>,
    },
    StructureChanged(Arc<TreeNode>),
    Expand(Arc<TreeNode>),
}

/// Immutable list of changes computed off the UI thread and applied in one go.
///
/// Settled nodes leave the `Loading` state only once the batch is applied, so
/// a later diff never runs against children the UI has not seen yet.
#[derive(Debug, Default)]
pub struct MutationBatch {
    ops: Vec<TreeOp>,
    settle: Vec<(Arc<TreeNode>, LoadState)>,
}

impl MutationBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: TreeOp) {
        self.ops.push(op);
    }

    /// Put `node` into `state` after the ops are applied.
    pub fn settle(&mut self, node: Arc<TreeNode>, state: LoadState) {
        self.settle.push((node, state));
    }

    pub fn ops(&self) -> &[TreeOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Apply every op through `sink`, then settle the nodes.
    pub fn apply(self, sink: &mut dyn UiSink) {
        for op in self.ops {
            match op {
                TreeOp::InsertAt {
                    parent,
                    child,
                    index,
                } => sink.insert_child(&parent, child, index),
                TreeOp::InsertSorted {
                    parent,
                    child,
                    spec,
                } => insert_sorted(sink, &parent, child, spec),
                TreeOp::Remove { parent, child } => sink.remove_child(&parent, &child),
                TreeOp::UpdateEntry { node, entry } => {
                    if !node.refresh_entry(entry) {
                        debug!(node = %node.id(), "entry update no longer matches node");
                    }
                }
                TreeOp::Reorder { parent, order } => reorder(sink, &parent, order),
                TreeOp::StructureChanged(node) => sink.notify_structure_changed(&node),
                TreeOp::Expand(node) => sink.expand(&node),
            }
        }
        for (node, state) in self.settle {
            node.set_load_state(state);
        }
    }
}

fn insert_sorted(sink: &mut dyn UiSink, parent: &Arc<TreeNode>, child: Arc<TreeNode>, spec: SortSpec) {
    let Some(entry) = child.entry() else {
        return;
    };
    let children = parent.children();
    if children.iter().any(|c| c.is_placeholder()) {
        debug!(parent = %parent.id(), "parent not loaded, insert deferred to its first load");
        return;
    }
    if children
        .iter()
        .any(|c| c.entry().is_some_and(|e| e.key() == entry.key()))
    {
        debug!(parent = %parent.id(), name = %entry.name, "entry already present");
        return;
    }
    for status in children.iter().filter(|c| c.status_text().is_some()) {
        sink.remove_child(parent, status);
    }
    let index = parent.children().partition_point(|c| {
        c.entry()
            .is_none_or(|e| compare_entries(&e, &entry, spec) != Ordering::Greater)
    });
    sink.insert_child(parent, child, index);
}

fn reorder(sink: &mut dyn UiSink, parent: &Arc<TreeNode>, order: Vec<Arc<TreeNode>>) {
    let current = parent.children();
    let mut order: Vec<Arc<TreeNode>> = order
        .into_iter()
        .filter(|n| current.iter().any(|c| Arc::ptr_eq(c, n)))
        .collect();
    for child in &current {
        if !order.iter().any(|n| Arc::ptr_eq(n, child)) {
            order.push(Arc::clone(child));
        }
    }
    for child in &current {
        sink.remove_child(parent, child);
    }
    for (index, child) in order.into_iter().enumerate() {
        sink.insert_child(parent, child, index);
    }
}

/// Worker-side handle for posting batches to the UI thread.
#[derive(Debug, Clone)]
pub struct UiPoster {
    tx: mpsc::UnboundedSender<MutationBatch>,
}

impl UiPoster {
    /// Queue a batch. `false` when the UI side is gone.
    pub fn post(&self, batch: MutationBatch) -> bool {
        if self.tx.send(batch).is_err() {
            warn!("UI queue closed, dropping tree mutations");
            return false;
        }
        true
    }
}

/// UI-side end of the batch channel.
#[derive(Debug)]
pub struct UiQueue {
    rx: mpsc::UnboundedReceiver<MutationBatch>,
}

impl UiQueue {
    /// Apply every batch queued so far. Returns how many were applied.
    pub fn drain(&mut self, sink: &mut dyn UiSink) -> usize {
        let mut applied = 0;
        while let Ok(batch) = self.rx.try_recv() {
            batch.apply(sink);
            applied += 1;
        }
        applied
    }
}

pub fn ui_channel() -> (UiPoster, UiQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (UiPoster { tx }, UiQueue { rx })
}

/// Whether a node is currently on screen; refresh skips hidden subtrees.
pub trait Viewport: Send + Sync {
    fn is_visible(&self, node: &TreeNode) -> bool;
}

/// Treats every node as visible.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllVisible;

impl Viewport for AllVisible {
    fn is_visible(&self, _node: &TreeNode) -> bool {
        true
    }
}

/// Visible when the node and all its ancestors are expanded.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpandedOnly;

impl Viewport for ExpandedOnly {
    fn is_visible(&self, node: &TreeNode) -> bool {
        if !node.is_expanded() {
            return false;
        }
        let mut parent = node.parent();
        while let Some(p) = parent {
            if !p.is_expanded() {
                return false;
            }
            parent = p.parent();
        }
        true
    }
}
