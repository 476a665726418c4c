//! User-level settings for the pool, the timer thread and the tree view.
//!
//! Every section is optional; a missing file or section means defaults.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use arbor_scheduler::SchedulerConfig;
use arbor_task::PoolConfig;
use arbor_tree::TreeOptions;

/// `[watch]` section: bounds of the adaptive refresh interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Interval on an idle system (default: 2500 ms).
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Interval on a saturated system (default: 10000 ms).
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
}

fn default_min_interval_ms() -> u64 {
    2_500
}

fn default_max_interval_ms() -> u64 {
    10_000
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
        }
    }
}

impl WatchConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }
}

/// Configuration loaded from `~/.config/arbor/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrowserConfig {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub tree: TreeOptions,
    #[serde(default)]
    pub watch: WatchConfig,
}

impl BrowserConfig {
    /// Load from the user config path.
    ///
    /// Returns `Default` if the file does not exist or the config directory
    /// cannot be determined (e.g., no HOME in containers).
    pub fn load() -> Result<Self> {
        let path = match Self::config_path() {
            Ok(p) => p,
            Err(_) => return Ok(Self::default()),
        };
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load and validate a specific file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config: {}", path.display()))?;
        Ok(config)
    }

    /// Path to the config file: `~/.config/arbor/config.toml`.
    pub fn config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "", "arbor")
            .context("Failed to determine config directory")?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        self.pool.validate().context("[pool]")?;
        let strength = self.scheduler.busy_strength;
        if !strength.is_finite() || strength <= 0.0 {
            bail!("[scheduler] busy_strength must be a positive number, got {strength}");
        }
        if self.watch.min_interval_ms == 0 {
            bail!("[watch] min_interval_ms must be greater than 0");
        }
        if self.watch.max_interval_ms < self.watch.min_interval_ms {
            bail!(
                "[watch] max_interval_ms ({}) must not be smaller than min_interval_ms ({})",
                self.watch.max_interval_ms,
                self.watch.min_interval_ms
            );
        }
        if self.tree.auto_expand_depth > 256 {
            tracing::warn!(
                depth = self.tree.auto_expand_depth,
                "[tree] auto_expand_depth is unusually large"
            );
        }
        Ok(())
    }

    /// Generate default config TOML with comments as a template.
    pub fn default_template() -> String {
        r#"# arbor configuration
# Location: ~/.config/arbor/config.toml
#
# Every key is optional. Removing a line restores its default.

[pool]
# core_size = 8           # Async dispatcher threads (default: CPU count)
# max_size = 16           # Tasks executing at once (default: 2 x CPU count)
idle_timeout_ms = 60000   # Keep-alive of idle blocking threads
queue_capacity = 100      # Tasks that may wait for a free slot
overflow = "caller-runs"  # "caller-runs" or "reject" once the queue is full
watchdog_interval_ms = 100
cancelled_history = 1024
shutdown_timeout_ms = 5000

[scheduler]
busy_strength = 2.0       # Higher values keep the interval near min for longer

[tree]
sort = "name"             # "name", "created-asc" or "created-desc"
folders_first = true
auto_expand_depth = 32    # Single-directory levels opened by one load
load_all_depth = 16
empty_text = "empty"
failed_text = "load failed"

[watch]
min_interval_ms = 2500    # Refresh interval on an idle system
max_interval_ms = 10000   # Refresh interval on a saturated system
"#
        .to_string()
    }

    /// Write the default template to the config path, creating directories as
    /// needed. Returns the path written.
    pub fn save_default_template() -> Result<PathBuf> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        std::fs::write(&path, Self::default_template())
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
