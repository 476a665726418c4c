use std::path::PathBuf;

use clap::{Parser, Subcommand};

use arbor_core::{OutputFormat, SortCriterion};

#[derive(Parser)]
#[command(name = "arbor")]
#[command(about = "Arbor: lazily loaded directory trees kept in sync in the background")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file to use instead of ~/.config/arbor/config.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long, default_value = "text", global = true)]
    pub format: OutputFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print a directory tree
    Tree {
        /// Directory to list (defaults to CWD)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Levels to load; single-directory chains may open deeper
        #[arg(short, long, default_value_t = 1)]
        depth: usize,

        /// Load the whole subtree in one task (bounded by [tree] load_all_depth)
        #[arg(long)]
        all: bool,

        #[command(flatten)]
        sort: SortArgs,
    },

    /// Keep a directory tree in sync and print it whenever it changes
    Watch {
        /// Directory to watch (defaults to CWD)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Refresh interval on an idle system, in milliseconds
        #[arg(long)]
        min_ms: Option<u64>,

        /// Refresh interval on a saturated system, in milliseconds
        #[arg(long)]
        max_ms: Option<u64>,

        /// Stop after this many seconds (runs until interrupted if omitted)
        #[arg(long)]
        duration_secs: Option<u64>,

        #[command(flatten)]
        sort: SortArgs,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        cmd: ConfigCommands,
    },
}

#[derive(clap::Args, Clone, Copy, Debug, Default)]
pub struct SortArgs {
    /// Sibling order
    #[arg(long, value_enum)]
    pub sort: Option<SortCriterion>,

    /// Mix files and folders instead of listing folders first
    #[arg(long)]
    pub mixed: bool,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Print the config file location
    Path,
    /// Write a commented default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Validate the configuration file
    Validate,
}
