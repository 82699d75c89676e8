//! Error types for Relay.
//!
//! This module defines a unified error enum shared by every crate in the
//! workspace. Variants are grouped into three categories (see
//! [`ErrorCategory`]): configuration problems that must not be retried,
//! upstream collaborator failures whose retry policy belongs to the caller,
//! and internal errors.

use thiserror::Error;

/// Unified error type for Relay.
///
/// All fallible functions return `Result<T, AppError>`.
/// A cache miss is never an error; it is modelled as `Option::None`.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration errors: no enabled collections, malformed link data,
    /// invalid settings.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller-supplied input that cannot be used (e.g. an unsanitizable filter key)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Embedding provider failures
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Similarity search failure for one collection
    #[error("Search error in collection '{collection}': {message}")]
    Search { collection: String, message: String },

    /// Link store lookup failures
    #[error("Link store error: {0}")]
    LinkStore(String),

    /// Durable storage failures (conversations, retrieval log, vector tables)
    #[error("Storage error: {0}")]
    Storage(String),

    /// The caller's deadline expired or the operation was aborted
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Prompt system errors
    #[error("Prompt error: {0}")]
    Prompt(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Coarse classification of an [`AppError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Not retried, surfaced immediately.
    Configuration,
    /// A collaborator failed; retrying is the caller's decision.
    Upstream,
    /// Bug or local environment problem.
    Internal,
}

impl AppError {
    /// Build a search error for the given collection.
    pub fn search(collection: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Search {
            collection: collection.into(),
            message: message.into(),
        }
    }

    /// Category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::Config(_) | AppError::InvalidInput(_) => ErrorCategory::Configuration,
            AppError::Embedding(_)
            | AppError::Search { .. }
            | AppError::LinkStore(_)
            | AppError::Storage(_)
            | AppError::Cancelled(_) => ErrorCategory::Upstream,
            AppError::Io(_)
            | AppError::Prompt(_)
            | AppError::Serialization(_)
            | AppError::Other(_) => ErrorCategory::Internal,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
