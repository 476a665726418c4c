use std::fmt::Write as _;

use serde::Serialize;

use arbor_tree::{LoadState, NodeId, TreeNode};

/// Serialisable snapshot of a node and its loaded descendants.
#[derive(Debug, Serialize)]
pub(crate) struct NodeView {
    pub id: NodeId,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub state: LoadState,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeView>,
}

impl NodeView {
    pub fn of(node: &TreeNode) -> Self {
        Self {
            id: node.id(),
            label: node.label(),
            path: node.entry().map(|e| e.path.display().to_string()),
            state: node.load_state(),
            children: node.children().iter().map(|c| Self::of(c)).collect(),
        }
    }
}

/// Box-drawing rendering; unloaded directories show their placeholder row.
pub(crate) fn render_text(root: &TreeNode) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", root_label(root));
    render_children(root, "", &mut out);
    out
}

fn root_label(root: &TreeNode) -> String {
    match root.entry() {
        Some(entry) => entry.path.display().to_string(),
        None => root.label(),
    }
}

fn render_children(node: &TreeNode, prefix: &str, out: &mut String) {
    let children = node.children();
    let last = children.len().saturating_sub(1);
    for (index, child) in children.iter().enumerate() {
        let (branch, indent) = if index == last {
            ("└── ", "    ")
        } else {
            ("├── ", "│   ")
        };
        let _ = writeln!(out, "{prefix}{branch}{}", child.label());
        render_children(child, &format!("{prefix}{indent}"), out);
    }
}

pub(crate) fn render_json(root: &TreeNode) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(&NodeView::of(root))?)
}
