//! Update handlers for the operator's Telegram chat.

use std::sync::Arc;

use parlor_core::{parse_action, OperatorAction, ReplyContextRouter, Resolution, RoomLifecycle};
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{debug, info};

/// Shown when a free-text message is not a reply to any notification.
const NEEDS_REPLY_TEXT: &str = "Reply to a room notification to act on it.\n\
    Commands inside a reply: approve, reject [reason], away, nudge, close, \
    sleep <minutes|clear|status>, status. Anything else is sent to the visitor.";

/// Slash commands that work without a reply target.
#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "Start the bot and get help")]
    Start,

    #[command(description = "Show help message")]
    Help,

    #[command(description = "Show open rooms, sleep state and credentials")]
    Status,

    #[command(description = "Suppress knocks: /sleep <minutes|clear|status>")]
    Sleep(String),
}

/// Handle a slash command from the operator.
pub async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    lifecycle: Arc<RoomLifecycle>,
    operator_chat: ChatId,
) -> ResponseResult<()> {
    if msg.chat.id != operator_chat {
        debug!(chat_id = %msg.chat.id, "Command from a foreign chat ignored");
        return Ok(());
    }
    info!(chat_id = %msg.chat.id, "Command matched: {:?}", cmd);

    let reply = match cmd {
        Command::Start => format!(
            "Parlor is watching the door.\n\n{}\n\n{}",
            NEEDS_REPLY_TEXT,
            Command::descriptions()
        ),
        Command::Help => format!("{}\n\n{}", Command::descriptions(), NEEDS_REPLY_TEXT),
        Command::Status => lifecycle.status_summary().await,
        Command::Sleep(arg) => match parse_action(&format!("sleep {}", arg)) {
            OperatorAction::SleepSet(minutes) => lifecycle.sleep_set(minutes).await,
            OperatorAction::SleepClear => lifecycle.sleep_clear().await,
            _ => lifecycle.sleep_status().await,
        },
    };

    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

/// Handle a plain message: route it through the reply-context router.
pub async fn handle_message(
    bot: Bot,
    msg: Message,
    lifecycle: Arc<RoomLifecycle>,
    router: Arc<ReplyContextRouter>,
    operator_chat: ChatId,
) -> ResponseResult<()> {
    if msg.chat.id != operator_chat {
        debug!(chat_id = %msg.chat.id, "Message from a foreign chat ignored");
        return Ok(());
    }
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let reply_to = msg.reply_to_message().map(|m| m.id.0);
    match router.resolve(reply_to, text).await {
        Resolution::Matched { context, action } => {
            info!(room = %context.room(), ?action, "Operator action routed");
            let confirmation = lifecycle.handle_action(&context, action).await;
            bot.send_message(msg.chat.id, confirmation).await?;
        }
        Resolution::NeedsReply => {
            debug!(reply_to = ?reply_to, "Message had no routable reply target");
            bot.send_message(msg.chat.id, NEEDS_REPLY_TEXT).await?;
        }
    }
    Ok(())
}
