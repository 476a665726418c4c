use serde::{Deserialize, Serialize};

use arbor_core::{SortCriterion, SortSpec};

/// `[tree]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeOptions {
    #[serde(default)]
    pub sort: SortCriterion,
    #[serde(default = "default_true")]
    pub folders_first: bool,
    /// How many single-directory levels a load opens in one step.
    #[serde(default = "default_auto_expand_depth")]
    pub auto_expand_depth: usize,
    /// Depth limit for `load_all`.
    #[serde(default = "default_load_all_depth")]
    pub load_all_depth: usize,
    #[serde(default = "default_empty_text")]
    pub empty_text: String,
    /// Prefix of the status shown when a directory cannot be listed.
    #[serde(default = "default_failed_text")]
    pub failed_text: String,
}

fn default_true() -> bool {
    true
}

fn default_auto_expand_depth() -> usize {
    32
}

fn default_load_all_depth() -> usize {
    16
}

fn default_empty_text() -> String {
    "empty".to_string()
}

fn default_failed_text() -> String {
    "load failed".to_string()
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            sort: SortCriterion::default(),
            folders_first: default_true(),
            auto_expand_depth: default_auto_expand_depth(),
            load_all_depth: default_load_all_depth(),
            empty_text: default_empty_text(),
            failed_text: default_failed_text(),
        }
    }
}

impl TreeOptions {
    pub fn sort_spec(&self) -> SortSpec {
        SortSpec::new(self.sort, self.folders_first)
    }

    pub(crate) fn failure_text(&self, reason: &dyn std::fmt::Display) -> String {
        format!("{}: {reason}", self.failed_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_section() {
        let options: TreeOptions = toml::from_str("").unwrap();
        assert_eq!(options, TreeOptions::default());
        assert_eq!(options.sort_spec(), SortSpec::default());
        assert_eq!(options.auto_expand_depth, 32);
    }

    #[test]
    fn test_parse_sort_override() {
        let options: TreeOptions =
            toml::from_str("sort = \"created-desc\"\nfolders_first = false").unwrap();
        assert_eq!(
            options.sort_spec(),
            SortSpec::new(SortCriterion::CreatedDesc, false)
        );
    }

    #[test]
    fn test_failure_text() {
        let options = TreeOptions::default();
        assert_eq!(
            options.failure_text(&"permission denied"),
            "load failed: permission denied"
        );
    }
}
