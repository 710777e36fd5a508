//! Error types for the slot store and sync service

use thiserror::Error;

/// Result type alias for store and service operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the slot store, the sync registry or their transports
#[derive(Error, Debug)]
pub enum Error {
    /// A required field is missing or malformed
    #[error("{0}")]
    ValidationError(String),

    /// The backing store could not be read or written
    #[error("Storage failed: {0}")]
    StorageError(String),

    /// Filesystem failure in a file-backed store
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Stored or transmitted JSON could not be (de)serialized
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Network error talking to a remote server
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The remote server answered with a non-success status
    #[error("Server responded with {status}: {message}")]
    HttpError { status: u16, message: String },

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// HTTP status code this error surfaces as.
    ///
    /// Only validation failures are the caller's fault; everything else is an
    /// internal error whose detail stays in the server log.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::ValidationError(_) => 400,
            _ => 500,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Error::ValidationError(_))
    }
}

#[cfg(feature = "client")]
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::NetworkError(err.to_string())
    }
}
