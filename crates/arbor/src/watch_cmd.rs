use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use tracing::info;

use arbor_config::BrowserConfig;
use arbor_core::OutputFormat;
use arbor_tree::TreeNode;

use crate::cli::SortArgs;
use crate::render::{render_json, render_text};
use crate::services::{Services, tree_options};

/// How often the UI loop drains the queue.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub(crate) struct WatchArgs {
    pub min_ms: Option<u64>,
    pub max_ms: Option<u64>,
    pub duration_secs: Option<u64>,
    pub sort: SortArgs,
}

pub(crate) fn handle_watch(
    config: &BrowserConfig,
    path: &Path,
    args: WatchArgs,
    format: OutputFormat,
) -> Result<()> {
    let min = Duration::from_millis(args.min_ms.unwrap_or(config.watch.min_interval_ms));
    let max = Duration::from_millis(args.max_ms.unwrap_or(config.watch.max_interval_ms));
    if min.is_zero() || max < min {
        bail!(
            "Invalid refresh interval: min {}ms, max {}ms",
            min.as_millis(),
            max.as_millis()
        );
    }
    let root = TreeNode::root(path)
        .with_context(|| format!("Cannot open directory: {}", path.display()))?;
    let mut services = Services::start(config, tree_options(config, args.sort))?;

    let watched = watch_loop(&mut services, &root, min, max, args.duration_secs, format);
    services.shutdown();
    watched
}

fn watch_loop(
    services: &mut Services,
    root: &std::sync::Arc<TreeNode>,
    min: Duration,
    max: Duration,
    duration_secs: Option<u64>,
    format: OutputFormat,
) -> Result<()> {
    let task_id = services.engine.load_children(root)?;
    services.finish(&task_id)?;
    print_tree(root, format)?;

    let scheduler = std::sync::Arc::clone(&services.scheduler);
    let timer_id = services.engine.watch(root, &scheduler, min, max)?;
    info!(
        timer_id = %timer_id,
        min_ms = min.as_millis() as u64,
        max_ms = max.as_millis() as u64,
        "watching {}",
        root.label()
    );

    let deadline = duration_secs.map(|s| Instant::now() + Duration::from_secs(s));
    while deadline.is_none_or(|d| Instant::now() < d) {
        let changed = services.apply_pending();
        if !changed.is_empty() {
            if format == OutputFormat::Text {
                println!(
                    "-- {} ({} director{} changed, {} task(s) running)",
                    chrono::Local::now().format("%H:%M:%S"),
                    changed.len(),
                    if changed.len() == 1 { "y" } else { "ies" },
                    services.engine.pool().running_count()
                );
            }
            print_tree(root, format)?;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    scheduler.stop_task(&timer_id);
    Ok(())
}

fn print_tree(root: &TreeNode, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => print!("{}", render_text(root)),
        OutputFormat::Json => println!("{}", render_json(root)?),
    }
    Ok(())
}
