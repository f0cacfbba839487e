//! Error types for collection operations.

use arrow::error::ArrowError;
use shards_common::CommonError;
use thiserror::Error;

/// Error types for shard collection operations
#[derive(Error, Debug)]
pub enum ShardError {
    /// The input or partition kind is not handled by the operation.
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    /// The operation is only valid for another element kind.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Inconsistent shape: {0}")]
    InconsistentShape(String),

    /// Two collections could not be aligned for zipping.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// The object store acknowledged a write under an unexpected identifier.
    #[error("Store write failed: {0}")]
    StoreWrite(String),

    /// A failure raised while applying a function to a single element.
    #[error("Element {element} of partition {partition} failed: {message}")]
    PerElement {
        partition: usize,
        element: usize,
        message: String,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error(transparent)]
    Store(#[from] CommonError),

    /// A spawned task panicked or was cancelled.
    #[error("Task failed: {0}")]
    Task(String),
}

/// Result type for shard collection operations
pub type Result<T> = std::result::Result<T, ShardError>;

impl ShardError {
    /// Whether retrying the failed step may succeed.
    pub fn is_retryable(&self) -> bool {
        use shards_common::Diagnose;
        match self {
            ShardError::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<tokio::task::JoinError> for ShardError {
    fn from(e: tokio::task::JoinError) -> Self {
        ShardError::Task(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_element_message() {
        let err = ShardError::PerElement {
            partition: 2,
            element: 0,
            message: "Invalid key for this collection".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Element 0 of partition 2 failed: Invalid key for this collection"
        );
    }

    #[test]
    fn test_store_errors_keep_retryability() {
        let transient: ShardError = CommonError::storage_error("connection reset").into();
        assert!(transient.is_retryable());

        let missing: ShardError = CommonError::not_found_error("object").into();
        assert!(!missing.is_retryable());
        assert!(!ShardError::StoreWrite("id mismatch".into()).is_retryable());
    }
}
