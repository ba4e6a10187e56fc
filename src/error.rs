//! Error types for entity reference resolution

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ResolveError>;

/// Errors produced while resolving entity references.
///
/// `Clone` is required: when a batch fetch fails, every waiter of that
/// coalescing window receives the same failure, so variants carry message
/// strings rather than source errors.
///
/// A key absent from fetch results is not an error; it resolves to
/// `EntityOutcome::Missing`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Batch fetch for entity type '{typename}' failed: {message}")]
    BatchFetchFailed { typename: String, message: String },

    #[error("No entity type registered for '{0}'")]
    MisconfiguredType(String),

    #[error("Malformed reference for entity type '{typename}': key field '{field}' is missing or not a scalar")]
    MalformedReference { typename: String, field: String },

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    #[error("Loader for entity type '{0}' was dropped before its window was dispatched")]
    WindowAbandoned(String),
}

impl ResolveError {
    /// Get error code for per-item error reporting
    pub fn code(&self) -> &'static str {
        match self {
            ResolveError::BatchFetchFailed { .. } => "BATCH_FETCH_FAILED",
            ResolveError::MisconfiguredType(_) => "MISCONFIGURED_TYPE",
            ResolveError::MalformedReference { .. } => "MALFORMED_REFERENCE",
            ResolveError::InvalidSelection(_) => "INVALID_SELECTION",
            ResolveError::WindowAbandoned(_) => "WINDOW_ABANDONED",
        }
    }
}
