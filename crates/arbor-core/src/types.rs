use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a controllable task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Submitted, waiting for a worker.
    Pending,
    Running,
    Paused,
    Cancelled,
    /// Finished and returned a value.
    Completed,
    /// Work returned an error or panicked.
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ordering key for the children of a directory node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortCriterion {
    /// Natural, case-insensitive name order.
    #[default]
    Name,
    /// Oldest first, by creation time where recorded, else modification time.
    CreatedAsc,
    /// Newest first.
    CreatedDesc,
}

/// How siblings are ordered. Fixed for the duration of one sync operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    #[serde(default)]
    pub criterion: SortCriterion,
    #[serde(default = "default_folders_first")]
    pub folders_first: bool,
}

fn default_folders_first() -> bool {
    true
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            criterion: SortCriterion::Name,
            folders_first: true,
        }
    }
}

impl SortSpec {
    pub fn new(criterion: SortCriterion, folders_first: bool) -> Self {
        Self {
            criterion,
            folders_first,
        }
    }
}

/// Output format for CLI responses
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(TaskState::Cancelled.is_terminal());
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(!TaskState::Paused.is_terminal());
    }

    #[test]
    fn test_task_state_display() {
        assert_eq!(TaskState::Paused.to_string(), "paused");
        assert_eq!(
            serde_json::to_string(&TaskState::Completed).unwrap(),
            "\"completed\""
        );
    }

    #[test]
    fn test_sort_spec_default_is_name_folders_first() {
        let spec = SortSpec::default();
        assert_eq!(spec.criterion, SortCriterion::Name);
        assert!(spec.folders_first);
    }

    #[test]
    fn test_sort_spec_partial_toml_uses_defaults() {
        let spec: SortSpec = toml::from_str("criterion = \"created-desc\"").unwrap();
        assert_eq!(spec.criterion, SortCriterion::CreatedDesc);
        assert!(spec.folders_first);
    }
}
