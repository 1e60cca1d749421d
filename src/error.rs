//! Error types for the Ratewarden service.

use thiserror::Error;

use crate::ratelimit::WindowError;
use crate::store::StoreError;

/// Main error type for Ratewarden operations.
#[derive(Error, Debug)]
pub enum WardenError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Window settings that cannot describe a window
    #[error("Invalid rate limit window: {0}")]
    InvalidWindow(#[from] WindowError),

    /// Event store errors surfaced outside the request path
    #[error("Event store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::config::ConfigError> for WardenError {
    fn from(err: ::config::ConfigError) -> Self {
        WardenError::Config(err.to_string())
    }
}

/// Result type alias for Ratewarden operations.
pub type Result<T> = std::result::Result<T, WardenError>;
