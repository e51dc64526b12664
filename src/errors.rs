//! Typed error definitions for batch_split.
//! `BatchError` covers failures that reject a whole request; `TransferError`
//! is attributed to a single file and never aborts a run.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Path rejected by security policy: {0}")]
    PathRejected(PathBuf),

    #[error("Folder does not exist or is not a directory: {0}")]
    FolderNotFound(PathBuf),

    #[error("Invalid batch size {0}; must be at least 1")]
    InvalidCeiling(usize),

    #[error("Unsafe batch folder prefix: {0:?}")]
    UnsafePrefix(String),

    #[error("Invalid operation id: {0:?}")]
    InvalidOperationId(String),

    #[error("No supported media files found in {0}")]
    NothingToDo(PathBuf),

    #[error("An interrupted batch operation ({0}) must be resumed or discarded first")]
    InterruptedPending(String),

    #[error("State directory is locked by another batch_split process: {0}")]
    StateLocked(PathBuf),

    #[error("No interrupted batch operation to resume")]
    NoInterruptedOperation,

    #[error("No undo history found for operation {0}")]
    ManifestNotFound(String),

    #[error("Insufficient disk space for destination {dest}: need {required} bytes, have {available} bytes")]
    InsufficientSpace {
        required: u64,
        available: u64,
        dest: PathBuf,
    },

    #[error("Progress ledger is inconsistent: {0}")]
    LedgerInconsistent(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl BatchError {
    /// Stable numeric code for structured logs.
    pub fn code(&self) -> u16 {
        match self {
            BatchError::PathRejected(_) => 10,
            BatchError::FolderNotFound(_) => 11,
            BatchError::InvalidCeiling(_) => 12,
            BatchError::UnsafePrefix(_) => 13,
            BatchError::InvalidOperationId(_) => 14,
            BatchError::NothingToDo(_) => 20,
            BatchError::InterruptedPending(_) => 21,
            BatchError::StateLocked(_) => 22,
            BatchError::NoInterruptedOperation => 23,
            BatchError::ManifestNotFound(_) => 24,
            BatchError::InsufficientSpace { .. } => 30,
            BatchError::LedgerInconsistent(_) => 40,
            BatchError::Cancelled => 130,
        }
    }

    /// True for input-validation failures (rejected before any I/O).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BatchError::PathRejected(_)
                | BatchError::FolderNotFound(_)
                | BatchError::InvalidCeiling(_)
                | BatchError::UnsafePrefix(_)
                | BatchError::InvalidOperationId(_)
        )
    }
}

/// Failure of a single file relocation.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("source file not found: {0}")]
    SourceMissing(PathBuf),

    #[error("destination already exists with different content: {0}")]
    DestinationExists(PathBuf),

    #[error("size mismatch after copying {path}: expected {expected} bytes, copied {actual}; source kept")]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("{0}")]
    Io(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_flagged() {
        assert!(BatchError::InvalidCeiling(0).is_validation());
        assert!(BatchError::PathRejected(PathBuf::from("/x")).is_validation());
        assert!(!BatchError::Cancelled.is_validation());
        assert!(!BatchError::NoInterruptedOperation.is_validation());
    }

    #[test]
    fn size_mismatch_message_mentions_source_kept() {
        let e = TransferError::SizeMismatch {
            path: PathBuf::from("a.jpg"),
            expected: 10,
            actual: 4,
        };
        assert!(e.to_string().contains("source kept"));
    }
}
