//! Per-room serialized relay pipeline.
//!
//! Remote API calls suspend, so two rapid visitor messages could
//! otherwise race: both read the same previous notification id and
//! issue conflicting deletes. Every relay operation for a room passes
//! through that room's worker task instead, which owns the current
//! notification id and the purge backlog. Operations for one room run
//! strictly in submission order; rooms never block each other.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parlor_models::{CredentialId, RoomId};
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::client::RelayClient;
use crate::error::RelayError;

/// Tunable delays and retry bounds for the pipeline.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Pause between deleting the previous notification and sending
    /// its replacement, to reduce platform-side ordering artifacts.
    pub settle_delay: Duration,
    /// Pause between backlog deletions during finalize, respecting
    /// platform rate limits.
    pub purge_pacing: Duration,
    /// Bounded attempts for transient failures.
    pub max_attempts: u32,
    /// Base backoff, doubled per retry.
    pub retry_base: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(300),
            purge_pacing: Duration::from_millis(250),
            max_attempts: 3,
            retry_base: Duration::from_millis(200),
        }
    }
}

impl RelayConfig {
    /// Zero-delay configuration for tests.
    pub fn immediate() -> Self {
        Self {
            settle_delay: Duration::ZERO,
            purge_pacing: Duration::ZERO,
            max_attempts: 3,
            retry_base: Duration::ZERO,
        }
    }
}

/// Events emitted as the pipeline completes operations.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// A notification was sent; its message id is the new correlation
    /// id for the room.
    Sent { room: RoomId, message_id: i32 },
    /// The room's backlog was purged and the summary posted.
    Finalized { room: RoomId },
}

enum Op {
    Announce {
        credential: CredentialId,
        text: String,
    },
    Replace {
        credential: CredentialId,
        text: String,
    },
    Finalize {
        credential: CredentialId,
        summary: String,
    },
}

/// Handle to the per-room worker tasks.
pub struct RelayQueue {
    client: Arc<dyn RelayClient>,
    config: RelayConfig,
    events: mpsc::UnboundedSender<RelayEvent>,
    workers: Mutex<WorkerTable>,
}

#[derive(Default)]
struct WorkerTable {
    senders: HashMap<RoomId, mpsc::UnboundedSender<Op>>,
    /// Rooms whose pipeline has already purged and posted its summary.
    /// A replace that lands after that point must not resurface as an
    /// unpurgeable message, so it is dropped until an announce starts a
    /// new conversation on the same slot.
    finalized: HashSet<RoomId>,
}

impl RelayQueue {
    /// Creates a queue over the given client; the returned receiver
    /// yields a [`RelayEvent`] per completed send/finalize.
    pub fn new(
        client: Arc<dyn RelayClient>,
        config: RelayConfig,
    ) -> (Self, mpsc::UnboundedReceiver<RelayEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                client,
                config,
                events,
                workers: Mutex::new(WorkerTable::default()),
            },
            rx,
        )
    }

    /// Sends a standalone notification for the room. It joins the
    /// purge backlog but is never the target of a later replace, so it
    /// stays visible until finalize. Used for knock announcements.
    pub async fn announce(
        &self,
        room: &RoomId,
        credential: &CredentialId,
        text: impl Into<String>,
    ) {
        self.submit(
            room,
            Op::Announce {
                credential: credential.clone(),
                text: text.into(),
            },
            false,
        )
        .await;
    }

    /// Replaces the room's visible notification: deletes the previous
    /// one (if any), then sends `text` as the new one.
    pub async fn send(&self, room: &RoomId, credential: &CredentialId, text: impl Into<String>) {
        self.submit(
            room,
            Op::Replace {
                credential: credential.clone(),
                text: text.into(),
            },
            false,
        )
        .await;
    }

    /// Purges every backlog message for the room and posts the final
    /// summary, leaving it as the only visible message. Queued behind
    /// any in-flight operation for the room.
    pub async fn finalize(
        &self,
        room: &RoomId,
        credential: &CredentialId,
        summary: impl Into<String>,
    ) {
        self.submit(
            room,
            Op::Finalize {
                credential: credential.clone(),
                summary: summary.into(),
            },
            true,
        )
        .await;
    }

    async fn submit(&self, room: &RoomId, op: Op, last: bool) {
        let mut workers = self.workers.lock().await;
        match &op {
            // An announce begins a new conversation on the slot.
            Op::Announce { .. } => {
                workers.finalized.remove(room);
            }
            Op::Replace { .. } if workers.finalized.contains(room) => {
                debug!(room = %room, "Room already finalized, dropping late notification");
                return;
            }
            _ => {}
        }
        let tx = workers.senders.entry(room.clone()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(run_worker(
                Arc::clone(&self.client),
                self.config.clone(),
                self.events.clone(),
                room.clone(),
                rx,
            ));
            tx
        });
        if tx.send(op).is_err() {
            warn!(room = %room, "Relay worker gone, operation dropped");
        }
        if last {
            // The worker exits after Finalize; drop our sender and mark
            // the slot so stray replaces do not revive it.
            workers.senders.remove(room);
            workers.finalized.insert(room.clone());
        }
    }
}

async fn run_worker(
    client: Arc<dyn RelayClient>,
    config: RelayConfig,
    events: mpsc::UnboundedSender<RelayEvent>,
    room: RoomId,
    mut rx: mpsc::UnboundedReceiver<Op>,
) {
    let mut last_id: Option<i32> = None;
    let mut backlog: Vec<i32> = Vec::new();

    while let Some(op) = rx.recv().await {
        match op {
            Op::Announce { credential, text } => {
                match send_with_retry(&*client, &config, &credential, &text).await {
                    Ok(id) => {
                        backlog.push(id);
                        let _ = events.send(RelayEvent::Sent {
                            room: room.clone(),
                            message_id: id,
                        });
                    }
                    Err(e) => {
                        warn!(room = %room, error = %e, "Failed to send announcement");
                    }
                }
            }
            Op::Replace { credential, text } => {
                if let Some(prev) = last_id.take() {
                    delete_classified(&*client, &config, &credential, &room, prev).await;
                    backlog.retain(|&id| id != prev);
                    sleep(config.settle_delay).await;
                }
                match send_with_retry(&*client, &config, &credential, &text).await {
                    Ok(id) => {
                        last_id = Some(id);
                        backlog.push(id);
                        let _ = events.send(RelayEvent::Sent {
                            room: room.clone(),
                            message_id: id,
                        });
                    }
                    Err(e) => {
                        warn!(room = %room, error = %e, "Failed to send notification");
                    }
                }
            }
            Op::Finalize {
                credential,
                summary,
            } => {
                for id in backlog.drain(..) {
                    delete_classified(&*client, &config, &credential, &room, id).await;
                    sleep(config.purge_pacing).await;
                }
                last_id = None;
                match send_with_retry(&*client, &config, &credential, &summary).await {
                    Ok(_) => debug!(room = %room, "Final summary posted"),
                    Err(e) => warn!(room = %room, error = %e, "Failed to send final summary"),
                }
                let _ = events.send(RelayEvent::Finalized { room: room.clone() });
                break;
            }
        }
    }
}

/// Deletes a message, absorbing every failure class so the pipeline
/// never stalls on a single message.
async fn delete_classified(
    client: &dyn RelayClient,
    config: &RelayConfig,
    credential: &CredentialId,
    room: &RoomId,
    message_id: i32,
) {
    let mut backoff = config.retry_base;
    for attempt in 1..=config.max_attempts {
        match client.delete_message(credential, message_id).await {
            Ok(()) => return,
            Err(RelayError::MessageGone) => {
                debug!(room = %room, message_id, "Message already gone");
                return;
            }
            Err(RelayError::TooOldToDelete) => {
                warn!(room = %room, message_id, "Message too old to delete, skipping");
                return;
            }
            Err(e) if e.is_transient() && attempt < config.max_attempts => {
                debug!(room = %room, message_id, attempt, error = %e, "Transient delete failure, retrying");
                sleep(backoff).await;
                backoff *= 2;
            }
            Err(e) => {
                warn!(room = %room, message_id, error = %e, "Delete failed, skipping");
                return;
            }
        }
    }
}

async fn send_with_retry(
    client: &dyn RelayClient,
    config: &RelayConfig,
    credential: &CredentialId,
    text: &str,
) -> crate::error::Result<i32> {
    let mut backoff = config.retry_base;
    let mut attempt = 1;
    loop {
        match client.send_message(credential, text).await {
            Ok(id) => return Ok(id),
            Err(e) if e.is_transient() && attempt < config.max_attempts => {
                debug!(attempt, error = %e, "Transient send failure, retrying");
                sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
