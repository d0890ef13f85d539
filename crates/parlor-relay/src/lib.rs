//! Telegram relay synchronization for Parlor.
//!
//! The operator's Telegram view of a room must show at most one live
//! notification at a time, and a finished conversation must leave only
//! its final summary behind. This crate provides:
//!
//! - [`RelayClient`]: the seam to the remote platform (send, delete,
//!   endpoint registration), with a teloxide-backed [`TelegramRelay`]
//!   implementation.
//! - [`RelayQueue`]: per-room serialized send/replace/purge pipeline.
//! - [`CredentialLeasePool`]: exclusive bot-credential leases with a
//!   shared fallback when the pool is exhausted.

pub mod client;
pub mod error;
pub mod lease;
pub mod queue;
pub mod telegram;

pub use client::RelayClient;
pub use error::{PoolError, RelayError, Result};
pub use lease::{CredentialLease, CredentialLeasePool};
pub use queue::{RelayConfig, RelayEvent, RelayQueue};
pub use telegram::TelegramRelay;
