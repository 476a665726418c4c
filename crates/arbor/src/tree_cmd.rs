use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use arbor_config::BrowserConfig;
use arbor_core::OutputFormat;
use arbor_tree::{LoadState, TreeNode};

use crate::cli::SortArgs;
use crate::render::{render_json, render_text};
use crate::services::{Services, tree_options};

pub(crate) fn handle_tree(
    config: &BrowserConfig,
    path: &Path,
    depth: usize,
    all: bool,
    sort: SortArgs,
    format: OutputFormat,
) -> Result<()> {
    let options = tree_options(config, sort);
    let load_all_depth = options.load_all_depth;
    let root = TreeNode::root(path)
        .with_context(|| format!("Cannot open directory: {}", path.display()))?;
    let mut services = Services::start(config, options)?;

    let loaded = if all {
        let task_id = services.engine.load_all(&root, load_all_depth)?;
        services.finish(&task_id)
    } else {
        load_levels(&mut services, &root, depth.max(1))
    };
    services.shutdown();
    loaded?;

    match format {
        OutputFormat::Text => print!("{}", render_text(&root)),
        OutputFormat::Json => println!("{}", render_json(&root)?),
    }
    Ok(())
}

/// Load `depth` levels breadth-first, one task per directory per level.
fn load_levels(services: &mut Services, root: &Arc<TreeNode>, depth: usize) -> Result<()> {
    let mut frontier = vec![Arc::clone(root)];
    for level in 0..depth {
        let mut pending = Vec::new();
        for node in &frontier {
            if node.load_state() == LoadState::Unloaded {
                pending.push(services.engine.load_children(node)?);
            }
        }
        debug!(level, tasks = pending.len(), "loading level");
        for task_id in &pending {
            services.finish(task_id)?;
        }
        frontier = frontier
            .iter()
            .flat_map(|n| n.children())
            .filter(|c| c.is_directory())
            .collect();
        if frontier.is_empty() {
            break;
        }
    }
    Ok(())
}
