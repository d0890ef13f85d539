//! Room lifecycle state machine for Parlor.
//!
//! This crate is the heart of the system: it allocates and reclaims
//! room ids, drives the `pending -> active -> left -> cleaned` state
//! machine under competing triggers (approval, rejection, explicit
//! leave, operator kick, inactivity, disconnect), and keeps the
//! operator's Telegram view synchronized through the relay pipeline.
//!
//! The lifecycle controller consumes four collaborators:
//! - the relay queue and credential pool from `parlor-relay`,
//! - the snapshot store from `parlor-persistence`,
//! - an [`AdmissionGate`] for rate limiting and input validation,
//! - per-room [`VisitorSink`] handles supplied by the transport layer.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use parlor_core::{LifecycleConfig, OpenGate, ReplyContextRouter, RoomLifecycle};
//! use parlor_models::CredentialId;
//! use parlor_persistence::SnapshotStore;
//! use parlor_relay::{CredentialLeasePool, RelayConfig, RelayQueue, TelegramRelay};
//! use teloxide::types::ChatId;
//!
//! # async fn run() {
//! let client = Arc::new(TelegramRelay::new(
//!     vec![(CredentialId::new("main"), "TOKEN".to_string())],
//!     ChatId(12345),
//!     None,
//! ));
//! let (queue, events) = RelayQueue::new(client.clone(), RelayConfig::default());
//! let pool = CredentialLeasePool::new(client, Vec::new(), CredentialId::new("main"));
//! let router = Arc::new(ReplyContextRouter::new());
//! let lifecycle = RoomLifecycle::new(
//!     queue,
//!     events,
//!     pool,
//!     router,
//!     SnapshotStore::new("/tmp/parlor"),
//!     Arc::new(OpenGate),
//!     LifecycleConfig::default(),
//! );
//! lifecycle.restore().await.unwrap();
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod registry;
pub mod render;
pub mod router;
pub mod traits;

pub use config::{state_dir, LifecycleConfig};
pub use controller::{KnockOutcome, RoomLifecycle};
pub use error::{LifecycleError, Result};
pub use registry::RoomRegistry;
pub use router::{parse_action, OperatorAction, ReplyContext, ReplyContextRouter, Resolution};
pub use traits::{ActionKind, AdmissionGate, OpenGate, VisitorSink};
