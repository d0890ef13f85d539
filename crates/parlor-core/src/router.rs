//! Maps operator replies back to the room they concern.
//!
//! Every relay message the broker posts is remembered here keyed by its
//! remote message id. When the operator replies to one, the router
//! resolves which room the reply targets and parses the reply text into
//! an [`OperatorAction`].

use std::collections::HashMap;

use parlor_models::RoomId;
use tokio::sync::RwLock;

/// What a reply to a relay message was attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyContext {
    /// Reply to a knock notification; the room may still be pending.
    Knock(RoomId),
    /// Reply to a live chat update.
    Chat(RoomId),
}

impl ReplyContext {
    pub fn room(&self) -> &RoomId {
        match self {
            ReplyContext::Knock(id) | ReplyContext::Chat(id) => id,
        }
    }
}

/// A parsed operator instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorAction {
    Approve,
    /// Optional custom reason shown to the visitor.
    Reject(Option<String>),
    /// Mark yourself away; pending knocks are told to wait.
    Away,
    /// Ping an active visitor who has gone quiet.
    Nudge,
    /// End an active conversation.
    Close,
    /// Suppress new knocks for the given number of minutes.
    SleepSet(u32),
    SleepClear,
    SleepStatus,
    Status,
    /// Anything else is relayed verbatim to the visitor.
    Reply(String),
}

/// Outcome of resolving an incoming operator message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Matched {
        context: ReplyContext,
        action: OperatorAction,
    },
    /// The message was not a reply to anything we posted.
    NeedsReply,
}

/// Parses operator reply text into an action.
///
/// Commands are matched case-insensitively on the first word; any text
/// that is not a recognized command is a verbatim reply to the visitor.
pub fn parse_action(text: &str) -> OperatorAction {
    let trimmed = text.trim();
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let head = parts.next().unwrap_or("").to_ascii_lowercase();
    let rest = parts.next().map(str::trim).filter(|s| !s.is_empty());

    match head.as_str() {
        "approve" => OperatorAction::Approve,
        "reject" => OperatorAction::Reject(rest.map(str::to_string)),
        "away" => OperatorAction::Away,
        "nudge" => OperatorAction::Nudge,
        "close" | "kick" => OperatorAction::Close,
        "sleep" => match rest {
            Some("clear") | Some("off") => OperatorAction::SleepClear,
            Some(arg) => match arg.parse::<u32>() {
                Ok(minutes) => OperatorAction::SleepSet(minutes),
                Err(_) => OperatorAction::SleepStatus,
            },
            None => OperatorAction::SleepStatus,
        },
        "status" => OperatorAction::Status,
        _ => OperatorAction::Reply(trimmed.to_string()),
    }
}

/// Thread-safe registry of reply targets.
///
/// Knock and chat contexts live in separate tables because an approve
/// promotes a knock context in place without a new relay send, and an
/// old knock notification must keep routing replies until then.
#[derive(Default)]
pub struct ReplyContextRouter {
    knocks: RwLock<HashMap<i32, RoomId>>,
    chats: RwLock<HashMap<i32, RoomId>>,
}

impl ReplyContextRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remembers a knock notification, superseding any earlier entry
    /// for the same room.
    pub async fn set_knock_context(&self, message_id: i32, room: RoomId) {
        let mut knocks = self.knocks.write().await;
        knocks.retain(|_, r| *r != room);
        knocks.insert(message_id, room);
    }

    /// Remembers a chat update, superseding any earlier entry for the
    /// same room.
    pub async fn set_chat_context(&self, message_id: i32, room: RoomId) {
        let mut chats = self.chats.write().await;
        chats.retain(|_, r| *r != room);
        chats.insert(message_id, room);
    }

    /// Converts a room's knock context into a chat context, keeping the
    /// same message id. Called on approve, which posts no new message.
    pub async fn promote_room_to_chat(&self, room: &RoomId) {
        let mut knocks = self.knocks.write().await;
        let entry = knocks
            .iter()
            .find(|(_, r)| *r == room)
            .map(|(id, _)| *id);
        if let Some(message_id) = entry {
            knocks.remove(&message_id);
            drop(knocks);
            self.chats.write().await.insert(message_id, room.clone());
        }
    }

    /// Forgets everything routed to the given room.
    pub async fn clear_room(&self, room: &RoomId) {
        self.knocks.write().await.retain(|_, r| r != room);
        self.chats.write().await.retain(|_, r| r != room);
    }

    /// Resolves an operator message into an action against a room.
    pub async fn resolve(&self, reply_to: Option<i32>, text: &str) -> Resolution {
        let Some(message_id) = reply_to else {
            return Resolution::NeedsReply;
        };
        if let Some(room) = self.knocks.read().await.get(&message_id) {
            return Resolution::Matched {
                context: ReplyContext::Knock(room.clone()),
                action: parse_action(text),
            };
        }
        if let Some(room) = self.chats.read().await.get(&message_id) {
            return Resolution::Matched {
                context: ReplyContext::Chat(room.clone()),
                action: parse_action(text),
            };
        }
        Resolution::NeedsReply
    }
}
