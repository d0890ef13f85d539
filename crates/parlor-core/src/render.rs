//! Text rendering for relay messages.

use chrono::Utc;
use parlor_models::{Author, Room};

/// How many transcript lines a chat update shows.
const TRANSCRIPT_TAIL: usize = 6;

/// Knock notification shown when a visitor first arrives.
pub fn knock(room: &Room) -> String {
    format!(
        "🚪 {} is knocking (room {}).\nReply `approve` to let them in, `reject [reason]` to turn them away.",
        room.visitor_name, room.id
    )
}

/// Rolling chat update: a header plus the tail of the transcript.
pub fn chat_update(room: &Room) -> String {
    let mut out = format!("Room {} — {}\n", room.id, room.visitor_name);
    let skip = room.messages.len().saturating_sub(TRANSCRIPT_TAIL);
    for event in room.messages.iter().skip(skip) {
        let who = match event.author {
            Author::Visitor => room.visitor_name.as_str(),
            Author::Operator => "You",
            Author::System => "·",
        };
        out.push_str(&format!("{}: {}\n", who, event.text));
    }
    out.trim_end().to_string()
}

/// Final summary left behind after a conversation ends.
pub fn summary(room: &Room) -> String {
    let ended = room.left_at.unwrap_or_else(Utc::now);
    let duration = ended - room.created_at;
    let mins = duration.num_minutes();
    let count = room.visitor_message_count();
    format!(
        "Room {} closed. {} sent {} message{} over {} minute{}.",
        room.id,
        room.visitor_name,
        count,
        if count == 1 { "" } else { "s" },
        mins,
        if mins == 1 { "" } else { "s" },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use parlor_models::{RoomId, RoomStatus};

    #[test]
    fn test_knock_names_visitor_and_room() {
        let room = Room::new(RoomId::slot(3), "Alice", RoomStatus::Pending);
        let text = knock(&room);
        assert!(text.contains("Alice"));
        assert!(text.contains("room 3"));
        assert!(text.contains("approve"));
    }

    #[test]
    fn test_chat_update_shows_tail_only() {
        let mut room = Room::new(RoomId::slot(1), "Bob", RoomStatus::Active);
        for n in 0..10 {
            room.push_event(Author::Visitor, format!("msg {}", n));
        }
        let text = chat_update(&room);
        assert!(!text.contains("msg 3"));
        assert!(text.contains("msg 4"));
        assert!(text.contains("msg 9"));
        assert!(text.starts_with("Room 1 — Bob"));
    }

    #[test]
    fn test_chat_update_author_labels() {
        let mut room = Room::new(RoomId::slot(1), "Bob", RoomStatus::Active);
        room.push_event(Author::System, "welcome");
        room.push_event(Author::Visitor, "hi");
        room.push_event(Author::Operator, "hello");
        let text = chat_update(&room);
        assert!(text.contains("·: welcome"));
        assert!(text.contains("Bob: hi"));
        assert!(text.contains("You: hello"));
    }

    #[test]
    fn test_summary_counts_visitor_messages() {
        let mut room = Room::new(RoomId::slot(2), "Eve", RoomStatus::Left);
        room.push_event(Author::Visitor, "one");
        room.push_event(Author::Operator, "reply");
        room.push_event(Author::Visitor, "two");
        room.left_at = Some(Utc::now());
        let text = summary(&room);
        assert!(text.contains("Eve sent 2 messages"));
    }
}
