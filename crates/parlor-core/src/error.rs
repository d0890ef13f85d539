//! Error types for the room lifecycle.

use parlor_models::RoomId;
use thiserror::Error;

/// Errors surfaced by lifecycle operations.
///
/// Every variant is handled at the boundary where it occurs; none of
/// them may unwind into the event loop uncaught. `NotFound` in
/// particular is usually logged and treated as a no-op, since timers
/// and duplicate cleanups routinely race with room teardown.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Malformed visitor input, rejected locally with no state change.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Too many actions from one source.
    #[error("too many requests, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// The referenced room no longer exists.
    #[error("room not found: {0}")]
    NotFound(RoomId),

    /// Snapshot persistence failed.
    #[error(transparent)]
    Persistence(#[from] parlor_persistence::PersistenceError),
}

/// Result type for lifecycle operations.
pub type Result<T> = std::result::Result<T, LifecycleError>;
