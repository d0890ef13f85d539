//! Exclusive bot-credential leases.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parlor_models::{CredentialId, RoomId};
use tracing::debug;

use crate::client::RelayClient;
use crate::error::PoolError;

/// Exclusive binding of one credential to one room.
#[derive(Debug, Clone)]
pub struct CredentialLease {
    pub credential: CredentialId,
    pub room: RoomId,
    pub leased_at: DateTime<Utc>,
}

/// Fixed-size pool of dedicated bot credentials plus one shared
/// fallback. A credential has at most one active lease; pool size
/// bounds how many rooms get a dedicated notification channel.
///
/// The pool only does bookkeeping. Endpoint (de)registration is the
/// caller's business, via [`CredentialLeasePool::client`], performed
/// after releasing whatever lock guards the pool so a slow platform
/// call never stalls other rooms.
pub struct CredentialLeasePool {
    client: Arc<dyn RelayClient>,
    available: Vec<CredentialId>,
    fallback: CredentialId,
    leases: HashMap<RoomId, CredentialLease>,
}

impl CredentialLeasePool {
    /// Creates a pool from dedicated credentials and the shared
    /// fallback used when the pool is exhausted.
    pub fn new(
        client: Arc<dyn RelayClient>,
        credentials: Vec<CredentialId>,
        fallback: CredentialId,
    ) -> Self {
        Self {
            client,
            available: credentials,
            fallback,
            leases: HashMap::new(),
        }
    }

    /// Leases a dedicated credential to the room. Idempotent: a room
    /// that already holds a lease gets the same credential back. The
    /// caller registers the callback endpoint afterwards.
    pub fn lease(&mut self, room: &RoomId) -> Result<CredentialId, PoolError> {
        if let Some(lease) = self.leases.get(room) {
            return Ok(lease.credential.clone());
        }
        let credential = self.available.pop().ok_or(PoolError::Exhausted)?;
        debug!(credential = %credential, room = %room, "Credential leased");
        self.leases.insert(
            room.clone(),
            CredentialLease {
                credential: credential.clone(),
                room: room.clone(),
                leased_at: Utc::now(),
            },
        );
        Ok(credential)
    }

    /// Releases the room's lease, returning the credential to the
    /// pool. No-op without a lease. The caller deregisters the
    /// endpoint with the returned credential.
    pub fn release(&mut self, room: &RoomId) -> Option<CredentialId> {
        let lease = self.leases.remove(room)?;
        debug!(credential = %lease.credential, room = %room, "Credential released");
        self.available.push(lease.credential.clone());
        Some(lease.credential)
    }

    /// The credential a room's notifications should use: its lease if
    /// it holds one, the shared fallback otherwise.
    pub fn credential_for(&self, room: &RoomId) -> CredentialId {
        self.leases
            .get(room)
            .map(|l| l.credential.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }

    /// The shared fallback credential.
    pub fn fallback(&self) -> &CredentialId {
        &self.fallback
    }

    /// The client used for endpoint (de)registration, cloned out so
    /// that I/O happens without holding the pool.
    pub fn client(&self) -> Arc<dyn RelayClient> {
        Arc::clone(&self.client)
    }

    /// Number of credentials currently available.
    pub fn available_count(&self) -> usize {
        self.available.len()
    }

    /// Number of active leases.
    pub fn leased_count(&self) -> usize {
        self.leases.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use async_trait::async_trait;

    struct NullClient;

    #[async_trait]
    impl RelayClient for NullClient {
        async fn send_message(&self, _c: &CredentialId, _t: &str) -> Result<i32> {
            Ok(1)
        }
        async fn delete_message(&self, _c: &CredentialId, _m: i32) -> Result<()> {
            Ok(())
        }
        async fn register_endpoint(&self, _c: &CredentialId, _r: &RoomId) -> Result<()> {
            Ok(())
        }
        async fn deregister_endpoint(&self, _c: &CredentialId) -> Result<()> {
            Ok(())
        }
    }

    fn pool_of(n: usize) -> CredentialLeasePool {
        let credentials = (1..=n).map(|i| CredentialId::new(format!("bot-{}", i))).collect();
        CredentialLeasePool::new(
            Arc::new(NullClient),
            credentials,
            CredentialId::new("shared"),
        )
    }

    #[test]
    fn test_lease_is_exclusive() {
        let mut pool = pool_of(1);
        let a = pool.lease(&RoomId::slot(1)).unwrap();
        assert!(matches!(
            pool.lease(&RoomId::slot(2)),
            Err(PoolError::Exhausted)
        ));
        assert_eq!(pool.credential_for(&RoomId::slot(1)), a);
    }

    #[test]
    fn test_lease_is_idempotent_per_room() {
        let mut pool = pool_of(2);
        let room = RoomId::slot(1);
        let a = pool.lease(&room).unwrap();
        let b = pool.lease(&room).unwrap();
        assert_eq!(a, b);
        assert_eq!(pool.leased_count(), 1);
        assert_eq!(pool.available_count(), 1);
    }

    #[test]
    fn test_release_returns_credential() {
        let mut pool = pool_of(1);
        let room = RoomId::slot(1);
        let leased = pool.lease(&room).unwrap();
        let released = pool.release(&room).unwrap();
        assert_eq!(leased, released);
        assert_eq!(pool.available_count(), 1);

        // Second release is a no-op.
        assert!(pool.release(&room).is_none());
    }

    #[test]
    fn test_exhausted_pool_falls_back_to_shared() {
        let mut pool = pool_of(1);
        pool.lease(&RoomId::slot(1)).unwrap();
        assert!(pool.lease(&RoomId::slot(2)).is_err());
        assert_eq!(
            pool.credential_for(&RoomId::slot(2)),
            CredentialId::new("shared")
        );
    }

    #[test]
    fn test_released_credential_leases_again() {
        let mut pool = pool_of(1);
        let a = pool.lease(&RoomId::slot(1)).unwrap();
        assert!(pool.release(&RoomId::slot(1)).is_some());
        let b = pool.lease(&RoomId::slot(2)).unwrap();
        assert_eq!(a, b);
    }
}
