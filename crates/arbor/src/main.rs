use anyhow::Result;
use clap::Parser;

mod cli;
mod config_cmds;
mod render;
mod services;
mod tree_cmd;
mod watch_cmd;

use arbor_config::BrowserConfig;
use cli::{Cli, Commands, ConfigCommands};
use watch_cmd::WatchArgs;

fn main() -> Result<()> {
    // Initialize tracing (output to stderr, initialize only once)
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let format = cli.format;
    let explicit = cli.config.as_deref();

    match cli.command {
        Commands::Config { cmd } => match cmd {
            ConfigCommands::Show => {
                let config = load_config(explicit)?;
                config_cmds::handle_config_show(&config, format)?;
            }
            ConfigCommands::Path => config_cmds::handle_config_path(explicit)?,
            ConfigCommands::Init { force } => config_cmds::handle_config_init(force)?,
            ConfigCommands::Validate => config_cmds::handle_config_validate(explicit)?,
        },
        Commands::Tree {
            path,
            depth,
            all,
            sort,
        } => {
            let config = load_config(explicit)?;
            tree_cmd::handle_tree(&config, &path, depth, all, sort, format)?;
        }
        Commands::Watch {
            path,
            min_ms,
            max_ms,
            duration_secs,
            sort,
        } => {
            let config = load_config(explicit)?;
            let args = WatchArgs {
                min_ms,
                max_ms,
                duration_secs,
                sort,
            };
            watch_cmd::handle_watch(&config, &path, args, format)?;
        }
    }
    Ok(())
}

fn load_config(explicit: Option<&std::path::Path>) -> Result<BrowserConfig> {
    match explicit {
        Some(path) => BrowserConfig::load_from(path),
        None => BrowserConfig::load(),
    }
}
