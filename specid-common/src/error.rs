//! Common error types for specid

use thiserror::Error;

/// Common result type for specid operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds shared by the proxy and its components
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid caller input, e.g. a missing `image` field
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Image content type could not be detected or is not PNG/JPEG
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// Classifier backend could not be reached or refused the call
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Classifier backend answered with a body we cannot interpret
    #[error("Upstream response malformed: {0}")]
    UpstreamMalformed(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}
