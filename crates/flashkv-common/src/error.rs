//! Error types for FlashKV
//!
//! This module defines the common error type used throughout the system.

use thiserror::Error;

/// Common result type for FlashKV operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for FlashKV
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid key: {len} bytes (keys must be 1-{max} bytes)", max = crate::key::MAX_KEY_LEN)]
    InvalidKey { len: usize },

    #[error("engine is closed")]
    EngineClosed,

    #[error("disk I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl Error {
    /// Create an invalid-pattern error
    pub fn invalid_pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error may succeed on retry (disk errors surface again
    /// on the next flush pass; invalid input never will)
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::TaskJoin(_))
    }
}
