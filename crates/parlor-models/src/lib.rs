//! Core data models for Parlor.
//!
//! Parlor brokers anonymous, ephemeral chat rooms between visitors and a
//! single operator. This crate holds the room model shared by every other
//! crate: identifiers, room state, and chat events.

pub mod ids;
pub mod room;

pub use ids::{CredentialId, RoomId};
pub use room::{Author, ChatEvent, Room, RoomStatus};
