//! Bot wiring: environment configuration and the teloxide dispatcher.

use std::path::Path;
use std::sync::Arc;

use parlor_core::{LifecycleConfig, OpenGate, ReplyContextRouter, RoomLifecycle};
use parlor_models::CredentialId;
use parlor_persistence::SnapshotStore;
use parlor_relay::{CredentialLeasePool, RelayConfig, RelayQueue, TelegramRelay};
use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use tracing::{info, warn};
use url::Url;

use crate::error::{BotError, Result};
use crate::handlers::{handle_command, handle_message, Command};

/// Environment variable holding the primary (shared fallback) token.
pub const TOKEN_ENV: &str = "PARLOR_BOT_TOKEN";
/// Optional comma-separated `name=token` pairs for the lease pool.
pub const EXTRA_TOKENS_ENV: &str = "PARLOR_EXTRA_BOT_TOKENS";
/// Numeric Telegram chat id of the operator's chat.
pub const OPERATOR_CHAT_ENV: &str = "PARLOR_OPERATOR_CHAT_ID";
/// Optional base URL for per-credential webhook endpoints.
pub const CALLBACK_BASE_ENV: &str = "PARLOR_CALLBACK_BASE";
/// Set to `1` to skip the pending state entirely.
pub const AUTO_APPROVE_ENV: &str = "PARLOR_AUTO_APPROVE";

/// Name of the shared fallback credential.
const MAIN_CREDENTIAL: &str = "main";

/// The operator-side broker bot.
pub struct ParlorBot {
    bot: Bot,
    operator_chat: ChatId,
    lifecycle: Arc<RoomLifecycle>,
    router: Arc<ReplyContextRouter>,
}

impl ParlorBot {
    /// Builds the full stack from environment variables, keeping room
    /// state under `state_dir`.
    pub fn from_env(state_dir: &Path) -> Result<Self> {
        let token = std::env::var(TOKEN_ENV).map_err(|_| BotError::NoToken)?;
        let operator_chat = std::env::var(OPERATOR_CHAT_ENV)
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .map(ChatId)
            .ok_or(BotError::NoOperatorChat)?;
        let callback_base = match std::env::var(CALLBACK_BASE_ENV) {
            Ok(raw) => Some(Url::parse(&raw).map_err(|e| {
                BotError::InvalidConfig(format!("{}: {}", CALLBACK_BASE_ENV, e))
            })?),
            Err(_) => None,
        };

        let extras = parse_extra_tokens(
            &std::env::var(EXTRA_TOKENS_ENV).unwrap_or_default(),
        )?;
        let pool_credentials: Vec<CredentialId> =
            extras.iter().map(|(c, _)| c.clone()).collect();
        info!(
            pool = pool_credentials.len(),
            operator_chat = operator_chat.0,
            "Configured relay credentials"
        );

        let mut credentials = vec![(CredentialId::new(MAIN_CREDENTIAL), token.clone())];
        credentials.extend(extras);

        let client = Arc::new(TelegramRelay::new(
            credentials,
            operator_chat,
            callback_base,
        ));
        let (queue, events) = RelayQueue::new(client.clone(), RelayConfig::default());
        let pool = CredentialLeasePool::new(
            client,
            pool_credentials,
            CredentialId::new(MAIN_CREDENTIAL),
        );

        let mut config = LifecycleConfig::default();
        if std::env::var(AUTO_APPROVE_ENV).as_deref() == Ok("1") {
            config.auto_approve = true;
        }

        let router = Arc::new(ReplyContextRouter::new());
        let lifecycle = RoomLifecycle::new(
            queue,
            events,
            pool,
            Arc::clone(&router),
            SnapshotStore::new(state_dir),
            Arc::new(OpenGate),
            config,
        );

        Ok(Self {
            bot: Bot::new(token),
            operator_chat,
            lifecycle,
            router,
        })
    }

    /// The lifecycle controller, for embedding a visitor transport in
    /// the same process.
    pub fn lifecycle(&self) -> &Arc<RoomLifecycle> {
        &self.lifecycle
    }

    /// Get the bot's username.
    pub async fn get_me(&self) -> std::result::Result<String, teloxide::RequestError> {
        let me = self.bot.get_me().await?;
        Ok(me.username().to_string())
    }

    /// Reloads live rooms from the last snapshot.
    pub async fn restore(&self) -> Result<usize> {
        Ok(self.lifecycle.restore().await?)
    }

    /// Runs the dispatcher until shutdown, with the inactivity sweep
    /// in the background.
    pub async fn start_polling(&self) -> Result<()> {
        info!("Starting Parlor bot in polling mode...");
        self.lifecycle.spawn_sweeper();

        let operator_chat = self.operator_chat;
        let lifecycle_for_commands = Arc::clone(&self.lifecycle);
        let lifecycle_for_messages = Arc::clone(&self.lifecycle);
        let router = Arc::clone(&self.router);

        let handler = dptree::entry()
            .branch(
                Update::filter_message()
                    .filter_command::<Command>()
                    .endpoint(move |bot: Bot, msg: Message, cmd: Command| {
                        let lifecycle = Arc::clone(&lifecycle_for_commands);
                        async move {
                            handle_command(bot, msg, cmd, lifecycle, operator_chat).await
                        }
                    }),
            )
            .branch(Update::filter_message().endpoint(
                move |bot: Bot, msg: Message| {
                    let lifecycle = Arc::clone(&lifecycle_for_messages);
                    let router = Arc::clone(&router);
                    async move {
                        handle_message(bot, msg, lifecycle, router, operator_chat).await
                    }
                },
            ));

        info!("Bot is running! Reply to room notifications to act on them.");

        Dispatcher::builder(self.bot.clone(), handler)
            .default_handler(|upd| async move {
                warn!("Unhandled update: {:?}", upd);
            })
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;

        Ok(())
    }
}

/// Parses `name=token` pairs out of a comma-separated list. Empty
/// input yields an empty pool.
fn parse_extra_tokens(raw: &str) -> Result<Vec<(CredentialId, String)>> {
    let mut out = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (name, token) = entry.split_once('=').ok_or_else(|| {
            BotError::InvalidConfig(format!(
                "{}: expected name=token, got {:?}",
                EXTRA_TOKENS_ENV, entry
            ))
        })?;
        if name.trim().is_empty() || token.trim().is_empty() {
            return Err(BotError::InvalidConfig(format!(
                "{}: empty name or token in {:?}",
                EXTRA_TOKENS_ENV, entry
            )));
        }
        if name.trim() == MAIN_CREDENTIAL {
            return Err(BotError::InvalidConfig(format!(
                "{}: {:?} is reserved for the primary token",
                EXTRA_TOKENS_ENV, MAIN_CREDENTIAL
            )));
        }
        out.push((CredentialId::new(name.trim()), token.trim().to_string()));
    }
    Ok(out)
}
