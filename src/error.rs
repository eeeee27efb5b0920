//! Unified error handling for the activity-matcher library.
//!
//! Every fallible operation in the crate returns [`Result`], so callers only
//! ever have to match on one error type regardless of which stage (parsing,
//! inference, matching or storage) failed.

use std::path::PathBuf;

use thiserror::Error;

use crate::ActivityId;

/// Unified error type for activity-matcher operations.
#[derive(Debug, Error)]
pub enum ActivityError {
    /// A source file was malformed, truncated or missing mandatory content.
    #[error("Failed to parse '{}' with {adapter} adapter: {message}", .path.display())]
    Parse {
        path: PathBuf,
        adapter: String,
        message: String,
    },

    /// No adapter is registered for the file's extension.
    #[error("No suitable parser found for file '{}'", .path.display())]
    UnsupportedFormat { path: PathBuf },

    /// A canonical point/lap stream violates its contract.
    #[error("Schema error: {message}")]
    Schema { message: String },

    /// Unknown activity id.
    #[error("No activity with ID {activity_id}")]
    NotFound { activity_id: ActivityId },

    /// A caller-supplied parameter is outside its vocabulary.
    #[error("Invalid value '{value}' for parameter '{name}'")]
    InvalidParameter { name: String, value: String },

    /// A source file with identical content was already ingested.
    #[error("Source file '{}' duplicates activity {existing}", .path.display())]
    Duplicate { path: PathBuf, existing: ActivityId },

    /// Persistence/storage error
    #[error("Persistence error: {message}")]
    Persistence { message: String },

    /// Reading a source file failed.
    #[error("Could not read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Route comparison was cancelled or ran out of its time budget.
    #[error("Route matching for activity {activity_id} was cancelled")]
    Cancelled { activity_id: ActivityId },
}

impl ActivityError {
    /// Shorthand for a parse failure in a given adapter.
    pub fn parse(path: impl Into<PathBuf>, adapter: &str, message: impl Into<String>) -> Self {
        ActivityError::Parse {
            path: path.into(),
            adapter: adapter.to_string(),
            message: message.into(),
        }
    }

    /// Shorthand for a schema violation.
    pub fn schema(message: impl Into<String>) -> Self {
        ActivityError::Schema {
            message: message.into(),
        }
    }

    /// Shorthand for an invalid parameter.
    pub fn invalid_parameter(name: &str, value: impl Into<String>) -> Self {
        ActivityError::InvalidParameter {
            name: name.to_string(),
            value: value.into(),
        }
    }

    /// Shorthand for a storage failure.
    pub fn persistence(message: impl Into<String>) -> Self {
        ActivityError::Persistence {
            message: message.into(),
        }
    }

    /// Whether this error came from reading or decoding a source file.
    pub fn is_parse_failure(&self) -> bool {
        matches!(
            self,
            ActivityError::Parse { .. }
                | ActivityError::UnsupportedFormat { .. }
                | ActivityError::Io { .. }
        )
    }
}

#[cfg(feature = "persistence")]
impl From<rusqlite::Error> for ActivityError {
    fn from(err: rusqlite::Error) -> Self {
        ActivityError::persistence(err.to_string())
    }
}

#[cfg(feature = "persistence")]
impl From<rmp_serde::encode::Error> for ActivityError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        ActivityError::persistence(format!("encode: {}", err))
    }
}

#[cfg(feature = "persistence")]
impl From<rmp_serde::decode::Error> for ActivityError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        ActivityError::persistence(format!("decode: {}", err))
    }
}

/// Result type alias for activity-matcher operations.
pub type Result<T> = std::result::Result<T, ActivityError>;

/// Extension trait for converting Option to ActivityError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a not-found error for `activity_id`.
    fn ok_or_not_found(self, activity_id: ActivityId) -> Result<T>;

    /// Convert Option to Result with a schema error.
    fn ok_or_schema(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, activity_id: ActivityId) -> Result<T> {
        self.ok_or(ActivityError::NotFound { activity_id })
    }

    fn ok_or_schema(self, message: &str) -> Result<T> {
        self.ok_or_else(|| ActivityError::schema(message))
    }
}
