//! Crash-safe snapshot persistence for Parlor rooms.
//!
//! Rooms are persisted as a single JSON snapshot written atomically
//! (temp file, then rename). Only non-terminal rooms are ever written
//! or restored: a room that has left or been cleaned must never
//! reappear after a restart and re-occupy its id.

pub mod error;
pub mod snapshot;

pub use error::{PersistenceError, Result};
pub use snapshot::SnapshotStore;
