//! Error types for the floodgate crate.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for floodgate operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The caller exhausted its budget for the current window.
    ///
    /// Always recoverable: waiting `retry_after_secs` and retrying will
    /// land in a fresh window.
    #[error("{message}")]
    LimitExceeded {
        message: String,
        retry_after_secs: u64,
    },

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Counter store errors, surfaced only by administrative operations.
    /// The request path swallows these and fails open instead.
    #[error("Counter store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for floodgate operations.
pub type Result<T> = std::result::Result<T, Error>;
