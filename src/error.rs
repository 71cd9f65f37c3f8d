//! Error types for the OAuth proxy

use std::io;

use thiserror::Error;

/// Result type alias for the OAuth proxy
pub type Result<T> = std::result::Result<T, Error>;

/// Process-level errors (startup, configuration, key cache)
///
/// Per-request failures are modelled separately by
/// [`crate::gateway::ApiError`], which knows how to render itself as an
/// HTTP response.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// API key cache error
    #[error("Key cache error: {0}")]
    Cache(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = Error::Config("no auth".to_string());
        assert_eq!(err.to_string(), "Configuration error: no auth");
    }

    #[test]
    fn test_cache_error_display() {
        let err = Error::Cache("missing".to_string());
        assert_eq!(err.to_string(), "Key cache error: missing");
    }

    #[test]
    fn test_io_error_conversion() {
        let err: Error = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, Error::Io(_)));
    }
}
