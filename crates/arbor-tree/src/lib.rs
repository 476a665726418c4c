//! Incremental synchronization of a lazily loaded directory tree.
//!
//! Listings and diffs run as pool tasks; the structural changes they produce
//! travel as [`MutationBatch`]es to the single thread that owns the tree and
//! applies them through a [`UiSink`].

pub mod diff;
pub mod engine;
pub mod entry;
pub mod natural;
pub mod node;
pub mod options;
pub mod ui;

pub use diff::{ChildDiff, diff_children};
pub use engine::{LoadReport, RefreshReport, TreeSyncEngine};
pub use entry::{DirEntry, FsListing, ListingProvider};
pub use natural::{compare_entries, natural_cmp, sort_entries};
pub use node::{LoadState, NodeId, NodePayload, TreeNode};
pub use options::TreeOptions;
pub use ui::{
    AllVisible, ExpandedOnly, ModelSink, MutationBatch, TreeOp, UiPoster, UiQueue, UiSink,
    Viewport, ui_channel,
};
