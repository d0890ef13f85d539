//! Room state and chat events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::RoomId;

/// Lifecycle state of a room.
///
/// Transitions are monotonic: `Pending -> Active -> Left -> Cleaned`.
/// A pending room that is rejected skips `Left` and is deleted outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    /// Knock received, awaiting the operator's decision.
    Pending,
    /// Approved, live two-way chat.
    Active,
    /// Terminated, final summary pending or sent.
    Left,
    /// Fully discarded; the id is reclaimable.
    Cleaned,
}

impl RoomStatus {
    /// Returns true for states that free the room's id.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RoomStatus::Left | RoomStatus::Cleaned)
    }
}

/// Who produced a chat event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Author {
    Visitor,
    Operator,
    /// Synthetic events (welcome, farewell).
    System,
}

/// A single entry in a room's transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatEvent {
    pub author: Author,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl ChatEvent {
    /// Creates an event timestamped now.
    pub fn now(author: Author, text: impl Into<String>) -> Self {
        Self {
            author,
            text: text.into(),
            at: Utc::now(),
        }
    }
}

/// One anonymous visitor's conversation instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub visitor_name: String,
    pub status: RoomStatus,
    /// Append-only transcript, discarded on cleanup.
    pub messages: Vec<ChatEvent>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_at: Option<DateTime<Utc>>,
    /// Id of the currently visible remote notification, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_relay_message_id: Option<i32>,
}

impl Room {
    /// Creates a new room in the given initial status.
    pub fn new(id: RoomId, visitor_name: impl Into<String>, status: RoomStatus) -> Self {
        let now = Utc::now();
        Self {
            id,
            visitor_name: visitor_name.into(),
            status,
            messages: Vec::new(),
            created_at: now,
            last_activity_at: now,
            left_at: None,
            last_relay_message_id: None,
        }
    }

    /// Refreshes the activity timestamp.
    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }

    /// Appends a transcript event and refreshes activity.
    pub fn push_event(&mut self, author: Author, text: impl Into<String>) {
        self.messages.push(ChatEvent::now(author, text));
        self.touch();
    }

    /// Number of messages the visitor sent.
    pub fn visitor_message_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|e| e.author == Author::Visitor)
            .count()
    }

    /// Returns true once the room's id may be reclaimed.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Seconds the room has been idle.
    pub fn idle_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_activity_at).num_seconds()
    }
}
