//! Type-safe identifiers for Parlor.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Identifier of a room.
///
/// Rooms normally occupy small, dense, reused integer slots so the
/// operator sees short conversation labels ("room 1", "room 2"). When
/// slot allocation is exhausted the registry falls back to a
/// timestamp-derived string that is never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoomId {
    /// A reused low-integer slot.
    Slot(u32),
    /// Overflow identifier, globally unique, never reclaimed.
    Overflow(String),
}

impl RoomId {
    /// Creates a slot id.
    pub fn slot(n: u32) -> Self {
        RoomId::Slot(n)
    }

    /// Creates a fresh overflow id derived from the current time.
    pub fn overflow_now() -> Self {
        RoomId::Overflow(format!("r{}", Utc::now().timestamp_millis()))
    }

    /// Returns the slot number if this is a slot id.
    pub fn as_slot(&self) -> Option<u32> {
        match self {
            RoomId::Slot(n) => Some(*n),
            RoomId::Overflow(_) => None,
        }
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomId::Slot(n) => write!(f, "{}", n),
            RoomId::Overflow(s) => write!(f, "{}", s),
        }
    }
}

impl From<u32> for RoomId {
    fn from(n: u32) -> Self {
        RoomId::Slot(n)
    }
}

/// Identifier of a remote bot credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialId(String);

impl CredentialId {
    /// Creates a credential id from a string.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CredentialId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_display() {
        assert_eq!(RoomId::slot(3).to_string(), "3");
    }

    #[test]
    fn test_overflow_is_not_slot() {
        let id = RoomId::overflow_now();
        assert!(id.as_slot().is_none());
        assert!(id.to_string().starts_with('r'));
    }

    #[test]
    fn test_room_id_serde() {
        let slot = RoomId::slot(7);
        assert_eq!(serde_json::to_string(&slot).unwrap(), "7");
        let parsed: RoomId = serde_json::from_str("7").unwrap();
        assert_eq!(parsed, slot);

        let overflow = RoomId::Overflow("r1700000000000".to_string());
        assert_eq!(
            serde_json::to_string(&overflow).unwrap(),
            "\"r1700000000000\""
        );
        let parsed: RoomId = serde_json::from_str("\"r1700000000000\"").unwrap();
        assert_eq!(parsed, overflow);
    }

    #[test]
    fn test_credential_id() {
        let id = CredentialId::new("bot-2");
        assert_eq!(id.as_str(), "bot-2");
        assert_eq!(id.to_string(), "bot-2");
    }
}
