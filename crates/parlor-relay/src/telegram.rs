//! teloxide-backed relay client.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parlor_models::{CredentialId, RoomId};
use teloxide::prelude::*;
use teloxide::types::MessageId;
use teloxide::{ApiError, RequestError};
use tracing::debug;
use url::Url;

use crate::client::RelayClient;
use crate::error::{RelayError, Result};

/// Timeout applied to every outbound platform call.
const CALL_TIMEOUT: Duration = Duration::from_secs(15);

/// Relay client holding one teloxide [`Bot`] per credential, all
/// pointed at the single operator chat.
pub struct TelegramRelay {
    bots: HashMap<CredentialId, Bot>,
    operator_chat: ChatId,
    /// Base URL callback endpoints are registered under, if webhook
    /// routing is configured.
    callback_base: Option<Url>,
}

impl TelegramRelay {
    /// Creates a relay over the given credential/token pairs.
    pub fn new(
        tokens: Vec<(CredentialId, String)>,
        operator_chat: ChatId,
        callback_base: Option<Url>,
    ) -> Self {
        let bots = tokens
            .into_iter()
            .map(|(id, token)| (id, Bot::new(token)))
            .collect();
        Self {
            bots,
            operator_chat,
            callback_base,
        }
    }

    fn bot(&self, credential: &CredentialId) -> Result<&Bot> {
        self.bots
            .get(credential)
            .ok_or_else(|| RelayError::UnknownCredential(credential.to_string()))
    }
}

/// Maps a teloxide failure onto the delete/send classification.
fn classify(err: RequestError) -> RelayError {
    match err {
        RequestError::Api(ApiError::MessageToDeleteNotFound) => RelayError::MessageGone,
        RequestError::Api(ApiError::MessageCantBeDeleted) => RelayError::TooOldToDelete,
        RequestError::Network(e) => RelayError::Transient(e.to_string()),
        RequestError::Io(e) => RelayError::Transient(e.to_string()),
        RequestError::RetryAfter(secs) => {
            RelayError::Transient(format!("rate limited for {}s", secs.seconds()))
        }
        other => RelayError::Api(other.to_string()),
    }
}

#[async_trait]
impl RelayClient for TelegramRelay {
    async fn send_message(&self, credential: &CredentialId, text: &str) -> Result<i32> {
        let bot = self.bot(credential)?;
        let send = bot.send_message(self.operator_chat, text);
        let msg = tokio::time::timeout(CALL_TIMEOUT, send)
            .await
            .map_err(|_| RelayError::Transient("send timed out".to_string()))?
            .map_err(classify)?;
        Ok(msg.id.0)
    }

    async fn delete_message(&self, credential: &CredentialId, message_id: i32) -> Result<()> {
        let bot = self.bot(credential)?;
        let delete = bot.delete_message(self.operator_chat, MessageId(message_id));
        tokio::time::timeout(CALL_TIMEOUT, delete)
            .await
            .map_err(|_| RelayError::Transient("delete timed out".to_string()))?
            .map_err(classify)?;
        Ok(())
    }

    async fn register_endpoint(&self, credential: &CredentialId, room: &RoomId) -> Result<()> {
        let Some(base) = &self.callback_base else {
            debug!(credential = %credential, "No callback base configured, skipping endpoint registration");
            return Ok(());
        };
        let bot = self.bot(credential)?;
        let url = base
            .join(&format!("hook/{}", room))
            .map_err(|e| RelayError::Api(e.to_string()))?;
        tokio::time::timeout(CALL_TIMEOUT, bot.set_webhook(url))
            .await
            .map_err(|_| RelayError::Transient("set_webhook timed out".to_string()))?
            .map_err(classify)?;
        debug!(credential = %credential, room = %room, "Registered callback endpoint");
        Ok(())
    }

    async fn deregister_endpoint(&self, credential: &CredentialId) -> Result<()> {
        if self.callback_base.is_none() {
            return Ok(());
        }
        let bot = self.bot(credential)?;
        tokio::time::timeout(CALL_TIMEOUT, bot.delete_webhook())
            .await
            .map_err(|_| RelayError::Transient("delete_webhook timed out".to_string()))?
            .map_err(classify)?;
        debug!(credential = %credential, "Deregistered callback endpoint");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_transient() {
        let err = classify(RequestError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "timed out",
        )));
        assert!(err.is_transient());
    }

    #[test]
    fn test_classify_message_gone() {
        let err = classify(RequestError::Api(ApiError::MessageToDeleteNotFound));
        assert!(matches!(err, RelayError::MessageGone));
    }

    #[test]
    fn test_classify_too_old() {
        let err = classify(RequestError::Api(ApiError::MessageCantBeDeleted));
        assert!(matches!(err, RelayError::TooOldToDelete));
    }

    #[test]
    fn test_unknown_credential() {
        let relay = TelegramRelay::new(Vec::new(), ChatId(1), None);
        assert!(relay.bot(&CredentialId::new("missing")).is_err());
    }
}
