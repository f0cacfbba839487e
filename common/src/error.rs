//! Error handling for the shards-common crate.

use thiserror::Error;

/// Error type for storage, codec and configuration failures.
///
/// Every variant carries a human readable message and an optional source so
/// that substrate failures can be chained up to the caller unchanged.
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("Storage operation failed: {message}")]
    StorageError {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("Serialization failed: {message}")]
    SerializationError {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("Deserialization failed: {message}")]
    DeserializationError {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("Invalid configuration: {message}")]
    ConfigurationError {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("IO operation failed: {message}")]
    IoError {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("Timeout occurred: {message}")]
    TimeoutError {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("Resource not found: {message}")]
    NotFoundError {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("Internal error: {message}")]
    InternalError {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },
}

/// Result type alias for common operations.
pub type Result<T> = std::result::Result<T, CommonError>;

/// Error category for grouping related error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Storage and I/O failures
    Infrastructure,
    /// Encoding and decoding failures
    DataProcessing,
    /// Configuration and setup errors
    Configuration,
    /// Internal logic errors
    Internal,
}

/// Diagnostics used by callers that decide whether to retry an operation.
pub trait Diagnose {
    /// Get the error category.
    fn category(&self) -> ErrorCategory;

    /// Check if the error is retryable.
    fn is_retryable(&self) -> bool;
}

macro_rules! constructors {
    ($($variant:ident => $plain:ident, $with_source:ident;)*) => {
        impl CommonError {
            $(
                #[doc = concat!("Create a `", stringify!($variant), "` with a custom message.")]
                pub fn $plain<S: Into<String>>(message: S) -> Self {
                    Self::$variant {
                        message: message.into(),
                        source: None,
                    }
                }

                #[doc = concat!("Create a `", stringify!($variant), "` with a custom message and source error.")]
                pub fn $with_source<S: Into<String>, E: Into<anyhow::Error>>(
                    message: S,
                    source: E,
                ) -> Self {
                    Self::$variant {
                        message: message.into(),
                        source: Some(source.into()),
                    }
                }
            )*
        }
    };
}

constructors! {
    StorageError => storage_error, storage_error_with_source;
    SerializationError => serialization_error, serialization_error_with_source;
    DeserializationError => deserialization_error, deserialization_error_with_source;
    ConfigurationError => configuration_error, configuration_error_with_source;
    IoError => io_error, io_error_with_source;
    TimeoutError => timeout_error, timeout_error_with_source;
    NotFoundError => not_found_error, not_found_error_with_source;
    InternalError => internal_error, internal_error_with_source;
}

impl CommonError {
    /// The message without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            CommonError::StorageError { message, .. }
            | CommonError::SerializationError { message, .. }
            | CommonError::DeserializationError { message, .. }
            | CommonError::ConfigurationError { message, .. }
            | CommonError::IoError { message, .. }
            | CommonError::TimeoutError { message, .. }
            | CommonError::NotFoundError { message, .. }
            | CommonError::InternalError { message, .. } => message,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CommonError::NotFoundError { .. })
    }
}

impl Diagnose for CommonError {
    fn category(&self) -> ErrorCategory {
        match self {
            CommonError::StorageError { .. }
            | CommonError::IoError { .. }
            | CommonError::TimeoutError { .. }
            | CommonError::NotFoundError { .. } => ErrorCategory::Infrastructure,
            CommonError::SerializationError { .. } | CommonError::DeserializationError { .. } => {
                ErrorCategory::DataProcessing
            }
            CommonError::ConfigurationError { .. } => ErrorCategory::Configuration,
            CommonError::InternalError { .. } => ErrorCategory::Internal,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self,
            CommonError::StorageError { .. }
                | CommonError::IoError { .. }
                | CommonError::TimeoutError { .. }
        )
    }
}

/// Context helpers for adding rich context to errors.
pub mod context {
    use super::*;

    /// Extension trait for adding context to Results.
    pub trait ErrorContext<T> {
        /// Wrap the error as a storage error.
        fn with_storage_context<F>(self, f: F) -> Result<T>
        where
            F: FnOnce() -> String;

        /// Wrap the error as a serialization error.
        fn with_serialization_context<F>(self, f: F) -> Result<T>
        where
            F: FnOnce() -> String;

        /// Wrap the error as a deserialization error.
        fn with_deserialization_context<F>(self, f: F) -> Result<T>
        where
            F: FnOnce() -> String;
    }

    impl<T, E> ErrorContext<T> for std::result::Result<T, E>
    where
        E: Into<anyhow::Error>,
    {
        fn with_storage_context<F>(self, f: F) -> Result<T>
        where
            F: FnOnce() -> String,
        {
            self.map_err(|e| CommonError::storage_error_with_source(f(), e.into()))
        }

        fn with_serialization_context<F>(self, f: F) -> Result<T>
        where
            F: FnOnce() -> String,
        {
            self.map_err(|e| CommonError::serialization_error_with_source(f(), e.into()))
        }

        fn with_deserialization_context<F>(self, f: F) -> Result<T>
        where
            F: FnOnce() -> String,
        {
            self.map_err(|e| CommonError::deserialization_error_with_source(f(), e.into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::context::ErrorContext;
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_creation() {
        let err = CommonError::storage_error("disk full");
        assert_eq!(err.to_string(), "Storage operation failed: disk full");
        assert_eq!(err.message(), "disk full");
        assert!(err.source().is_none());
    }

    #[test]
    fn test_error_chaining() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "socket closed");
        let err = CommonError::io_error_with_source("read failed", io);
        assert!(err.source().is_some());
        assert!(err.source().unwrap().to_string().contains("socket closed"));
    }

    #[test]
    fn test_retry_behavior() {
        assert!(CommonError::storage_error("x").is_retryable());
        assert!(CommonError::timeout_error("x").is_retryable());
        assert!(!CommonError::not_found_error("x").is_retryable());
        assert!(!CommonError::serialization_error("x").is_retryable());
        assert!(CommonError::not_found_error("x").is_not_found());
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            CommonError::deserialization_error("x").category(),
            ErrorCategory::DataProcessing
        );
        assert_eq!(
            CommonError::configuration_error("x").category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            CommonError::internal_error("x").category(),
            ErrorCategory::Internal
        );
    }

    #[test]
    fn test_error_context_extension() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ));
        let err = result
            .with_storage_context(|| "loading part file".to_string())
            .unwrap_err();
        assert!(matches!(err, CommonError::StorageError { .. }));
        assert_eq!(err.message(), "loading part file");
    }
}
