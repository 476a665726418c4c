//! Browser configuration (`~/.config/arbor/config.toml`).

pub mod config;

pub use config::{BrowserConfig, WatchConfig};
