//! Error types for the relay pipeline.

use thiserror::Error;

/// Errors from remote platform calls, classified the way the purge
/// pipeline needs them: already-gone counts as success, too-old is a
/// permanent skip, transient failures are retried.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The message no longer exists on the platform.
    #[error("message already gone")]
    MessageGone,

    /// The platform refuses to delete the message (age limit).
    #[error("message too old to delete")]
    TooOldToDelete,

    /// Network/timeout-style failure, worth retrying.
    #[error("transient relay failure: {0}")]
    Transient(String),

    /// Any other platform rejection, not retried.
    #[error("relay API error: {0}")]
    Api(String),

    /// No credential configured under the given id.
    #[error("unknown credential: {0}")]
    UnknownCredential(String),
}

impl RelayError {
    /// Returns true if retrying this error can help.
    pub fn is_transient(&self) -> bool {
        matches!(self, RelayError::Transient(_))
    }
}

/// Errors from the credential lease pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Every dedicated credential is leased.
    #[error("credential pool exhausted")]
    Exhausted,
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
