use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, Weak};

use serde::Serialize;

use arbor_core::{AppError, SortSpec};

use crate::entry::DirEntry;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique node identity. Survives refreshes for unchanged entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodePayload {
    Entry(DirEntry),
    /// Stands in for children that were never listed.
    Placeholder,
    /// Text shown instead of children ("empty", "load failed: ...").
    Status(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    Unloaded,
    Loading,
    Loaded,
}

/// One row of the mirrored tree.
///
/// Children are only changed by applying a
/// [`MutationBatch`](crate::MutationBatch) on the thread owning the tree;
/// workers read them to compute diffs. The exception is a freshly built
/// subtree that has not been attached yet.
pub struct TreeNode {
    id: NodeId,
    payload: RwLock<NodePayload>,
    parent: RwLock<Weak<TreeNode>>,
    children: RwLock<Vec<Arc<TreeNode>>>,
    load_state: Mutex<LoadState>,
    expanded: AtomicBool,
    sort_override: Mutex<Option<SortSpec>>,
}

impl TreeNode {
    fn with_payload(payload: NodePayload, state: LoadState) -> Self {
        Self {
            id: NodeId::next(),
            payload: RwLock::new(payload),
            parent: RwLock::new(Weak::new()),
            children: RwLock::new(Vec::new()),
            load_state: Mutex::new(state),
            expanded: AtomicBool::new(false),
            sort_override: Mutex::new(None),
        }
    }

    /// Node for a listed entry. Directories start unloaded with one placeholder.
    pub fn from_entry(entry: DirEntry) -> Arc<Self> {
        let is_dir = entry.is_dir;
        let state = if is_dir {
            LoadState::Unloaded
        } else {
            LoadState::Loaded
        };
        let node = Arc::new(Self::with_payload(NodePayload::Entry(entry), state));
        if is_dir {
            node.insert_child_at(0, Self::placeholder());
        }
        node
    }

    /// Unloaded node for an existing directory.
    pub fn root(path: impl Into<std::path::PathBuf>) -> std::io::Result<Arc<Self>> {
        let entry = DirEntry::from_path(path)?;
        if !entry.is_dir {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a directory", entry.path.display()),
            ));
        }
        Ok(Self::from_entry(entry))
    }

    pub fn placeholder() -> Arc<Self> {
        Arc::new(Self::with_payload(NodePayload::Placeholder, LoadState::Loaded))
    }

    pub fn status(text: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::with_payload(
            NodePayload::Status(text.into()),
            LoadState::Loaded,
        ))
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    fn read_payload(&self) -> RwLockReadGuard<'_, NodePayload> {
        self.payload.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn payload(&self) -> NodePayload {
        self.read_payload().clone()
    }

    /// Copy of the listed entry, as of the last refresh that saw it.
    pub fn entry(&self) -> Option<DirEntry> {
        match &*self.read_payload() {
            NodePayload::Entry(entry) => Some(entry.clone()),
            _ => None,
        }
    }

    pub fn is_entry(&self) -> bool {
        matches!(*self.read_payload(), NodePayload::Entry(_))
    }

    pub fn is_directory(&self) -> bool {
        matches!(&*self.read_payload(), NodePayload::Entry(entry) if entry.is_dir)
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(*self.read_payload(), NodePayload::Placeholder)
    }

    pub fn status_text(&self) -> Option<String> {
        match &*self.read_payload() {
            NodePayload::Status(text) => Some(text.clone()),
            _ => None,
        }
    }

    /// Take the metadata of a newer listing of the same entry.
    ///
    /// Ignored unless `fresh` has this node's name and kind.
    pub(crate) fn refresh_entry(&self, fresh: DirEntry) -> bool {
        let mut payload = self.payload.write().unwrap_or_else(PoisonError::into_inner);
        match &mut *payload {
            NodePayload::Entry(entry) if entry.key() == fresh.key() => {
                *entry = fresh;
                true
            }
            _ => false,
        }
    }

    /// Display text for the row.
    pub fn label(&self) -> String {
        match &*self.read_payload() {
            NodePayload::Entry(entry) if entry.is_dir => format!("{}/", entry.name),
            NodePayload::Entry(entry) => entry.name.clone(),
            NodePayload::Placeholder => "...".to_string(),
            NodePayload::Status(text) => format!("({text})"),
        }
    }

    /// Snapshot of the current children.
    pub fn children(&self) -> Vec<Arc<TreeNode>> {
        self.children
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn child_count(&self) -> usize {
        self.children
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn parent(&self) -> Option<Arc<TreeNode>> {
        self.parent
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .upgrade()
    }

    pub fn load_state(&self) -> LoadState {
        *self.load_state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_load_state(&self, state: LoadState) {
        *self.load_state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Enter `Loading`, returning the state to restore if the load is abandoned.
    pub(crate) fn begin_load(&self) -> Result<LoadState, AppError> {
        let mut state = self.load_state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == LoadState::Loading {
            return Err(AppError::AlreadyLoading(self.id.get()));
        }
        Ok(std::mem::replace(&mut *state, LoadState::Loading))
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded.load(Ordering::Acquire)
    }

    pub(crate) fn set_expanded(&self, expanded: bool) {
        self.expanded.store(expanded, Ordering::Release);
    }

    /// Sort order chosen for this node by `sort_children`, if any.
    pub fn sort_override(&self) -> Option<SortSpec> {
        *self.sort_override.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_sort_override(&self, spec: SortSpec) {
        *self.sort_override.lock().unwrap_or_else(PoisonError::into_inner) = Some(spec);
    }

    /// Give a node that is not yet part of the tree its children and mark it
    /// loaded.
    pub(crate) fn attach_detached(self: &Arc<Self>, children: Vec<Arc<TreeNode>>) {
        for child in &children {
            child.set_parent(self);
        }
        *self.children.write().unwrap_or_else(PoisonError::into_inner) = children;
        self.set_load_state(LoadState::Loaded);
    }

    fn set_parent(&self, parent: &Arc<TreeNode>) {
        *self.parent.write().unwrap_or_else(PoisonError::into_inner) = Arc::downgrade(parent);
    }

    pub(crate) fn insert_child_at(self: &Arc<Self>, index: usize, child: Arc<TreeNode>) {
        child.set_parent(self);
        let mut children = self.children.write().unwrap_or_else(PoisonError::into_inner);
        let index = index.min(children.len());
        children.insert(index, child);
    }

    /// Detach `child`; `false` if it was not a child.
    pub(crate) fn remove_child(&self, child: &Arc<TreeNode>) -> bool {
        let mut children = self.children.write().unwrap_or_else(PoisonError::into_inner);
        match children.iter().position(|c| Arc::ptr_eq(c, child)) {
            Some(index) => {
                children.remove(index);
                *child.parent.write().unwrap_or_else(PoisonError::into_inner) = Weak::new();
                true
            }
            None => false,
        }
    }

    /// Depth-first search for a node by id.
    pub fn find(self: &Arc<Self>, id: NodeId) -> Option<Arc<TreeNode>> {
        if self.id == id {
            return Some(Arc::clone(self));
        }
        self.children().iter().find_map(|c| c.find(id))
    }

    /// Child entry with the given name, if listed.
    pub fn child_named(&self, name: &str) -> Option<Arc<TreeNode>> {
        self.children()
            .into_iter()
            .find(|c| c.entry().is_some_and(|e| e.name == name))
    }
}

impl fmt::Debug for TreeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeNode")
            .field("id", &self.id)
            .field("label", &self.label())
            .field("state", &self.load_state())
            .field("children", &self.child_count())
            .finish()
    }
}
