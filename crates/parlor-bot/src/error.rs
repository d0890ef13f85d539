//! Error types for the bot binary.

use thiserror::Error;

/// Errors that can occur while wiring or running the bot.
#[derive(Debug, Error)]
pub enum BotError {
    /// Bot token not provided.
    #[error("Telegram bot token not set. Set PARLOR_BOT_TOKEN environment variable.")]
    NoToken,

    /// Operator chat id not provided or unparsable.
    #[error("Operator chat id missing or invalid. Set PARLOR_OPERATOR_CHAT_ID to a numeric Telegram chat id.")]
    NoOperatorChat,

    /// A configuration value could not be parsed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Snapshot restore failed at startup.
    #[error("Could not restore rooms: {0}")]
    Restore(#[from] parlor_core::LifecycleError),
}

/// Result type for bot operations.
pub type Result<T> = std::result::Result<T, BotError>;
