/// Result type alias for trafficlight operations
pub type Result<T> = std::result::Result<T, Error>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Core error type for request grouping
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The caller's context was cancelled or its deadline passed
    #[error("request cancelled: {reason}")]
    Cancelled { reason: String },

    /// The coordination store could not be reached or rejected the call
    #[error("store {operation} failed for key '{key}': {message}")]
    Store {
        operation: &'static str,
        key: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A cached record could not be encoded or decoded
    #[error("serialization failed for key '{key}': {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Compression or decompression of a cached record failed
    #[error("{operation} failed: {source}")]
    Compression {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The wrapped operation itself failed
    #[error("operation failed: {message}")]
    Operation {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Configuration errors
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl Error {
    /// Create a cancellation error
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Error::Cancelled {
            reason: reason.into(),
        }
    }

    /// Create a store error without an underlying source
    #[must_use]
    pub fn store(operation: &'static str, key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Store {
            operation,
            key: key.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a store error wrapping the backend's own error
    #[must_use]
    pub fn store_with_source(
        operation: &'static str,
        key: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        let source = source.into();
        Error::Store {
            operation,
            key: key.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a serialization error for a cache key
    #[must_use]
    pub fn serialization(key: impl Into<String>, source: serde_json::Error) -> Self {
        Error::Serialization {
            key: key.into(),
            source,
        }
    }

    /// Create a compression error
    #[must_use]
    pub fn compression(operation: &'static str, source: std::io::Error) -> Self {
        Error::Compression { operation, source }
    }

    /// Create an operation error
    #[must_use]
    pub fn operation(message: impl Into<String>) -> Self {
        Error::Operation {
            message: message.into(),
            source: None,
        }
    }

    /// Create an operation error wrapping the upstream failure
    #[must_use]
    pub fn operation_with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Error::Operation {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }

    /// Whether this error came from the coordination store rather than the
    /// wrapped operation. Covers transport failures and unreadable entries.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(
            self,
            Error::Store { .. } | Error::Serialization { .. } | Error::Compression { .. }
        )
    }
}
