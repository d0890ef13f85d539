//! Operator-side Telegram bot for Parlor.
//!
//! Wires the lifecycle controller, relay pipeline, credential pool and
//! snapshot store together from environment configuration, then runs a
//! teloxide dispatcher that routes the operator's replies back into
//! rooms.

pub mod bot;
pub mod error;
pub mod handlers;

pub use bot::ParlorBot;
pub use error::{BotError, Result};
