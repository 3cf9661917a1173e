//! Common error types for Cask.

use thiserror::Error;

/// Top-level error type for Cask storage operations.
///
/// Variants split into two groups. Local errors (`InvalidState`, `Rebind`,
/// `InvalidInput`) are raised synchronously before any backend call. All
/// other variants originate in a backend and are propagated unchanged.
#[derive(Debug, Error)]
pub enum Error {
    /// The handle is missing a required id or the scope has been deleted.
    #[error("Invalid handle state: {0}")]
    InvalidState(String),

    /// A blob id is already bound to the handle.
    #[error("Handle already bound to blob '{bound}', cannot bind '{requested}'")]
    Rebind {
        /// Blob id that stays bound.
        bound: String,
        /// Blob id the caller tried to bind.
        requested: String,
    },

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// A conditional request predicate did not hold.
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// The backend has no primitive for the requested capability.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Credentials were rejected by the provider.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Temporary provider failure, safe to retry with backoff.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Opaque provider-specific failure.
    #[error("Provider failure: {0}")]
    Provider(String),

    /// Computed checksum did not match the expected one.
    #[error("Integrity check failed: expected {expected}, got {actual}")]
    Integrity {
        /// Checksum the content should have had.
        expected: String,
        /// Checksum computed over the received content.
        actual: String,
    },

    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether the same request may succeed if retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient(_))
    }

    /// Whether the error was raised before reaching a backend.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Error::InvalidState(_) | Error::Rebind { .. } | Error::InvalidInput(_)
        )
    }

    /// Whether a conditional request was rejected.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Error::PreconditionFailed(_))
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(Error::Transient("throttled".into()).is_retryable());
        assert!(!Error::Provider("boom".into()).is_retryable());
        assert!(!Error::PreconditionFailed("etag".into()).is_retryable());
        assert!(!Error::Unsupported("lease".into()).is_retryable());
    }

    #[test]
    fn test_local_errors() {
        assert!(Error::InvalidState("deleted".into()).is_local());
        assert!(Error::Rebind {
            bound: "a".into(),
            requested: "b".into()
        }
        .is_local());
        assert!(!Error::NotFound("x".into()).is_local());
    }

    #[test]
    fn test_rebind_message_names_both_ids() {
        let err = Error::Rebind {
            bound: "first".into(),
            requested: "second".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("first"));
        assert!(msg.contains("second"));
    }
}
