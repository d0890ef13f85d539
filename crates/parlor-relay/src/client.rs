//! The seam to the remote messaging platform.

use async_trait::async_trait;
use parlor_models::{CredentialId, RoomId};

use crate::error::Result;

/// Outbound operations against the remote platform.
///
/// Every call is made with a specific bot credential. Implementations
/// must be idempotent on the already-deleted case: deleting a message
/// that is gone reports [`crate::RelayError::MessageGone`], which the
/// pipeline treats as success.
#[async_trait]
pub trait RelayClient: Send + Sync {
    /// Sends a message to the operator channel, returning the platform
    /// message id.
    async fn send_message(&self, credential: &CredentialId, text: &str) -> Result<i32>;

    /// Deletes a previously sent message.
    async fn delete_message(&self, credential: &CredentialId, message_id: i32) -> Result<()>;

    /// Registers the per-room callback endpoint for a credential so
    /// inbound replies route back correctly.
    async fn register_endpoint(&self, credential: &CredentialId, room: &RoomId) -> Result<()>;

    /// Deregisters the credential's callback endpoint.
    async fn deregister_endpoint(&self, credential: &CredentialId) -> Result<()>;
}
