use serde::{Deserialize, Serialize};

use arbor_resource::DEFAULT_STRENGTH;

/// `[scheduler]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Exponent strength `k` of the dynamic-delay curve (default: 2.0).
    #[serde(default = "default_busy_strength")]
    pub busy_strength: f64,
    /// Name of the shared timer thread.
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

fn default_busy_strength() -> f64 {
    DEFAULT_STRENGTH
}

fn default_thread_name() -> String {
    "arbor-timer".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            busy_strength: default_busy_strength(),
            thread_name: default_thread_name(),
        }
    }
}
