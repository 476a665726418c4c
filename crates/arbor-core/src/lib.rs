//! Shared error taxonomy and value types for the arbor workspace.

pub mod error;
pub mod types;

pub use error::AppError;
pub use types::{OutputFormat, SortCriterion, SortSpec, TaskState};
