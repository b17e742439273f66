//! Error types for Sweep.
//!
//! Only `InitializationTimeout` is fatal to a run. Every other variant is
//! caught at its point of origin and converted into a structured result
//! (a failed `TaskResult`, a degraded report, a failed undo).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Initialization lock not acquired within {0} seconds")]
    InitializationTimeout(u64),

    #[error("Task '{task}' timed out after {timeout_secs}s")]
    TaskTimeout { task: String, timeout_secs: u64 },

    #[error("Task '{task}' failed: {message}")]
    TaskExecution { task: String, message: String },

    #[error("Normalization failed for task '{task}': {message}")]
    ArtifactNormalization { task: String, message: String },

    #[error("Undo instruction rejected: {0}")]
    UnsafeUndoRejected(String),

    #[error("Catalog entry invalid: {0}")]
    CatalogInvalid(String),

    #[error("Session '{0}' not found or manifest incomplete")]
    SessionNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SweepError {
    /// Whether this error aborts the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SweepError::InitializationTimeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_init_timeout_is_fatal() {
        assert!(SweepError::InitializationTimeout(5).is_fatal());
        assert!(!SweepError::TaskTimeout {
            task: "x".into(),
            timeout_secs: 5
        }
        .is_fatal());
        assert!(!SweepError::UnsafeUndoRejected("rm -rf".into()).is_fatal());
    }
}
