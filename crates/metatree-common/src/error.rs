//! Error types for metatree
//!
//! This module defines the common error type used throughout the system.

use thiserror::Error;

/// Common result type for metatree operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for metatree
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Path syntax is invalid (e.g. a sub-node name containing `/`)
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Mapping structure is invalid (non-IP first-level key, non-path leaf,
    /// or a key containing `/`)
    #[error("invalid mapping: {0}")]
    InvalidMapping(String),

    /// Leaf/directory kind mismatch on a mutation
    #[error("kind conflict at {0}")]
    KindConflict(String),

    /// Operation on a destroyed store
    #[error("store is closed")]
    StoreClosed,

    /// Error surfaced by the external backend
    #[error("backend error: {0}")]
    Backend(String),
}

impl Error {
    /// Create an invalid path error
    pub fn invalid_path(msg: impl Into<String>) -> Self {
        Self::InvalidPath(msg.into())
    }

    /// Create an invalid mapping error
    pub fn invalid_mapping(msg: impl Into<String>) -> Self {
        Self::InvalidMapping(msg.into())
    }

    /// Create a backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Check if this error was caused by invalid caller input
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidPath(_) | Self::InvalidMapping(_))
    }
}
