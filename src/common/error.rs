//! Common Error Types for keydex
//!
//! Provides unified error handling across all modules.

use thiserror::Error;

/// Root error type for the keydex service
#[derive(Debug, Error)]
pub enum KeydexError {
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Logging errors
    #[error("logging error: {0}")]
    Logging(#[from] crate::logging::LoggingError),

    /// Storage errors
    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    /// PAD / directory errors
    #[error("directory error: {0}")]
    Pad(#[from] crate::pad::PadError),

    /// Key decoding errors
    #[error("key error: {0}")]
    Key(#[from] crate::crypto::sign::KeyError),

    /// Internal errors
    #[error("internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl KeydexError {
    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(self, KeydexError::Storage(_) | KeydexError::Io(_))
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            KeydexError::Config(_) => "CONFIG_ERROR",
            KeydexError::Logging(_) => "LOGGING_ERROR",
            KeydexError::Storage(_) => "STORAGE_ERROR",
            KeydexError::Pad(_) => "DIRECTORY_ERROR",
            KeydexError::Key(_) => "KEY_ERROR",
            KeydexError::Internal(_) => "INTERNAL_ERROR",
            KeydexError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias using KeydexError
pub type Result<T> = std::result::Result<T, KeydexError>;
