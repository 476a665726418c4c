use std::collections::HashMap;
use std::sync::Arc;

use crate::entry::DirEntry;
use crate::node::TreeNode;

/// Reconciliation of a node's cached children with a fresh listing.
#[derive(Debug, Default)]
pub struct ChildDiff {
    /// Existing children still listed, paired with their fresh entry.
    pub keep: Vec<(Arc<TreeNode>, DirEntry)>,
    /// Children to detach: vanished entries, placeholders and status rows.
    pub remove: Vec<Arc<TreeNode>>,
    /// Newly appeared entries, in listing order.
    pub add: Vec<DirEntry>,
}

impl ChildDiff {
    pub fn is_unchanged(&self) -> bool {
        self.remove.is_empty() && self.add.is_empty()
    }
}

/// Entries match on name and kind, so a file replaced by a directory of the
/// same name counts as one removal and one addition.
pub fn diff_children(current: &[Arc<TreeNode>], fresh: Vec<DirEntry>) -> ChildDiff {
    let mut diff = ChildDiff::default();
    let mut fresh: Vec<Option<DirEntry>> = fresh.into_iter().map(Some).collect();
    let mut by_key: HashMap<(String, bool), usize> = HashMap::with_capacity(fresh.len());
    for (index, entry) in fresh.iter().enumerate() {
        if let Some(entry) = entry {
            by_key
                .entry((entry.name.clone(), entry.is_dir))
                .or_insert(index);
        }
    }

    for child in current {
        let matched = child
            .entry()
            .and_then(|e| by_key.remove(&(e.name, e.is_dir)))
            .and_then(|index| fresh[index].take());
        match matched {
            Some(entry) => diff.keep.push((Arc::clone(child), entry)),
            None => diff.remove.push(Arc::clone(child)),
        }
    }
    // duplicate names in one listing collapse to the first
    diff.add = fresh
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            let entry = entry?;
            (by_key.get(&(entry.name.clone(), entry.is_dir)) == Some(&index)).then_some(entry)
        })
        .collect();
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;
    use std::path::Path;

    fn files(names: &[&str]) -> Vec<DirEntry> {
        names
            .iter()
            .map(|n| DirEntry::file(*n, Path::new("/d")))
            .collect()
    }

    fn nodes(names: &[&str]) -> Vec<Arc<TreeNode>> {
        files(names).into_iter().map(TreeNode::from_entry).collect()
    }

    fn labels(nodes: &[Arc<TreeNode>]) -> Vec<String> {
        nodes.iter().map(|n| n.label()).collect()
    }

    #[test]
    fn test_preserves_identity_of_kept_entries() {
        let current = nodes(&["A", "B", "C"]);
        let diff = diff_children(&current, files(&["B", "C", "D"]));

        assert_eq!(labels(&diff.remove), ["A"]);
        let added: Vec<&str> = diff.add.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(added, ["D"]);
        let kept: Vec<NodeId> = diff.keep.iter().map(|(n, _)| n.id()).collect();
        assert_eq!(kept, vec![current[1].id(), current[2].id()]);
    }

    #[test]
    fn test_unchanged_listing() {
        let current = nodes(&["x", "y"]);
        let diff = diff_children(&current, files(&["y", "x"]));
        assert!(diff.is_unchanged());
        assert_eq!(diff.keep.len(), 2);
    }

    #[test]
    fn test_non_entry_children_are_removed() {
        let current = vec![TreeNode::status("empty")];
        let diff = diff_children(&current, files(&["new"]));
        assert_eq!(diff.remove.len(), 1);
        assert_eq!(diff.add.len(), 1);
    }

    #[test]
    fn test_kind_change_is_replace() {
        let current = nodes(&["build"]);
        let diff = diff_children(&current, vec![DirEntry::dir("build", Path::new("/d"))]);
        assert_eq!(diff.remove.len(), 1);
        assert!(diff.add[0].is_dir);
        assert!(diff.keep.is_empty());
    }

    #[test]
    fn test_empty_listing_removes_everything() {
        let current = nodes(&["a", "b"]);
        let diff = diff_children(&current, Vec::new());
        assert_eq!(diff.remove.len(), 2);
        assert!(diff.add.is_empty());
    }
}
