use std::path::Path;

use anyhow::{Result, bail};

use arbor_config::BrowserConfig;
use arbor_core::OutputFormat;

pub(crate) fn handle_config_show(config: &BrowserConfig, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        OutputFormat::Text => print!("{}", toml::to_string_pretty(config)?),
    }
    Ok(())
}

pub(crate) fn handle_config_path(explicit: Option<&Path>) -> Result<()> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => BrowserConfig::config_path()?,
    };
    println!("{}", path.display());
    Ok(())
}

pub(crate) fn handle_config_init(force: bool) -> Result<()> {
    let path = BrowserConfig::config_path()?;
    if path.exists() && !force {
        bail!(
            "Config already exists at {} (use --force to overwrite)",
            path.display()
        );
    }
    let written = BrowserConfig::save_default_template()?;
    eprintln!("Wrote default configuration to: {}", written.display());
    Ok(())
}

pub(crate) fn handle_config_validate(explicit: Option<&Path>) -> Result<()> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => BrowserConfig::config_path()?,
    };
    if !path.exists() {
        eprintln!("No config file at {}; defaults apply.", path.display());
        return Ok(());
    }
    BrowserConfig::load_from(&path)?;
    eprintln!("Configuration is valid: {}", path.display());
    Ok(())
}
