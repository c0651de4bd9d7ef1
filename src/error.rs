//! Error types for the batch engine.
//!
//! Engine modules return [`Result`]; the CLI edges wrap these in
//! `anyhow` with context.

use std::path::PathBuf;

/// Errors produced while validating, processing or aggregating a batch.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// Manifest header lacks required columns. Aborts the whole run.
    #[error("missing expected column headers in {}: {}", path.display(), missing.join(", "))]
    Validation { path: PathBuf, missing: Vec<String> },

    /// Manifest file itself does not exist.
    #[error("manifest not found: {}", .0.display())]
    ManifestNotFound(PathBuf),

    /// A required row field is absent or malformed.
    #[error("field '{field}': {reason}")]
    Field { field: String, reason: String },

    /// Sweep entry or project precondition failed (missing path, missing config).
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// External collaborator failed to run or produced unusable output.
    #[error("{name} failed: {reason}")]
    Collaborator { name: String, reason: String },

    /// Consolidated output did not contain every input row.
    #[error("consolidation row count mismatch: expected {expected}, wrote {written}")]
    RowCountMismatch { expected: usize, written: usize },

    /// The run queue worker is gone or a job could not be joined.
    #[error("run queue: {0}")]
    Queue(String),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl BatchError {
    /// Shorthand for a missing row field.
    pub fn missing_field(field: &str) -> Self {
        Self::Field {
            field: field.to_string(),
            reason: "missing".to_string(),
        }
    }

    /// Shorthand for a collaborator failure.
    pub fn collaborator(name: &str, reason: impl Into<String>) -> Self {
        Self::Collaborator {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Convenience alias used throughout the engine.
pub type Result<T> = std::result::Result<T, BatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_names_missing_columns() {
        let err = BatchError::Validation {
            path: PathBuf::from("Experiment Info.csv"),
            missing: vec!["Threshold".to_string(), "Process".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("Experiment Info.csv"), "got: {msg}");
        assert!(msg.contains("Threshold, Process"), "got: {msg}");
    }

    #[test]
    fn missing_field_displays() {
        let err = BatchError::missing_field("Recording Name");
        assert_eq!(err.to_string(), "field 'Recording Name': missing");
    }

    #[test]
    fn io_error_wraps() {
        let inner = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = BatchError::from(inner);
        assert!(err.to_string().contains("i/o"));
    }
}
