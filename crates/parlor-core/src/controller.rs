//! The room lifecycle controller.
//!
//! All room state transitions funnel through [`RoomLifecycle`]. Each
//! trigger (knock, approval, rejection, departure, kick, inactivity,
//! disconnect) takes the registry write lock, applies its transition,
//! queues any relay work, and persists a snapshot. Timers never act
//! directly; they re-check the condition they were armed for, since
//! the room may have moved on while they slept.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parlor_models::{Author, ChatEvent, CredentialId, Room, RoomId, RoomStatus};
use parlor_persistence::SnapshotStore;
use parlor_relay::{CredentialLeasePool, PoolError, RelayClient, RelayEvent, RelayQueue};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::LifecycleConfig;
use crate::error::{LifecycleError, Result};
use crate::registry::RoomRegistry;
use crate::render;
use crate::router::{OperatorAction, ReplyContext, ReplyContextRouter};
use crate::traits::{ActionKind, AdmissionGate, VisitorSink};

const DEFAULT_REJECT_REASON: &str = "the operator declined this conversation";
const WELCOME_TEXT: &str = "You're in. The operator has joined.";
const NUDGE_TEXT: &str = "Are you still there?";
const HOLD_TEXT: &str = "The operator is away at the moment, please hold on.";

/// What a knock produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KnockOutcome {
    /// A room was created; `status` is `Active` under auto-approve.
    Created { id: RoomId, status: RoomStatus },
    /// No room was created; show `message` to the visitor.
    Unavailable { message: String },
}

/// Owns all rooms and drives their state machine.
pub struct RoomLifecycle {
    registry: RwLock<RoomRegistry>,
    sinks: RwLock<HashMap<RoomId, Arc<dyn VisitorSink>>>,
    /// Generation counter per room; a disconnect timer only fires if
    /// the generation it captured is still current.
    grace: RwLock<HashMap<RoomId, u64>>,
    pool: Mutex<CredentialLeasePool>,
    /// Cloned out of the pool at construction; endpoint registration
    /// happens on this handle after the pool lock is released.
    client: Arc<dyn RelayClient>,
    relay: RelayQueue,
    router: Arc<ReplyContextRouter>,
    store: SnapshotStore,
    gate: Arc<dyn AdmissionGate>,
    config: LifecycleConfig,
    sleep_until: RwLock<Option<DateTime<Utc>>>,
}

impl RoomLifecycle {
    /// Wires the controller and starts the relay event pump.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        relay: RelayQueue,
        events: mpsc::UnboundedReceiver<RelayEvent>,
        pool: CredentialLeasePool,
        router: Arc<ReplyContextRouter>,
        store: SnapshotStore,
        gate: Arc<dyn AdmissionGate>,
        config: LifecycleConfig,
    ) -> Arc<Self> {
        let client = pool.client();
        let lifecycle = Arc::new(Self {
            registry: RwLock::new(RoomRegistry::new()),
            sinks: RwLock::new(HashMap::new()),
            grace: RwLock::new(HashMap::new()),
            pool: Mutex::new(pool),
            client,
            relay,
            router,
            store,
            gate,
            config,
            sleep_until: RwLock::new(None),
        });
        tokio::spawn(Arc::clone(&lifecycle).pump_relay_events(events));
        lifecycle
    }

    /// Consumes relay completions and keeps the reply router and the
    /// stored correlation ids in step with what is actually visible.
    async fn pump_relay_events(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<RelayEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                RelayEvent::Sent { room, message_id } => {
                    let status = {
                        let mut registry = self.registry.write().await;
                        match registry.get_mut(&room) {
                            Some(r) if !r.is_terminal() => {
                                r.last_relay_message_id = Some(message_id);
                                Some(r.status)
                            }
                            Some(r) => Some(r.status),
                            None => None,
                        }
                    };
                    match status {
                        Some(RoomStatus::Pending) => {
                            self.router.set_knock_context(message_id, room).await;
                        }
                        Some(RoomStatus::Active) => {
                            self.router.set_chat_context(message_id, room).await;
                        }
                        Some(_) => {
                            // The room closed while the send was in
                            // flight; its routing was already cleared
                            // and must stay cleared.
                            debug!(room = %room, "Relay send completed for a closed room");
                        }
                        None => {
                            debug!(room = %room, "Relay send completed for a vanished room");
                        }
                    }
                }
                RelayEvent::Finalized { room } => {
                    debug!(room = %room, "Relay pipeline finalized");
                }
            }
        }
    }

    /// Handles a knocking visitor: validates, allocates a room id,
    /// leases a credential, and announces the knock to the operator.
    pub async fn knock(
        &self,
        source_key: &str,
        visitor_name: &str,
        sink: Arc<dyn VisitorSink>,
    ) -> Result<KnockOutcome> {
        if !self.gate.validate_text(visitor_name) {
            return Err(LifecycleError::Validation("unacceptable name".to_string()));
        }
        if !self.gate.check_rate(source_key, ActionKind::Knock) {
            return Err(LifecycleError::RateLimited {
                retry_after_secs: 30,
            });
        }
        if let Some(until) = *self.sleep_until.read().await {
            if until > Utc::now() {
                return Ok(KnockOutcome::Unavailable {
                    message: "the operator is unavailable right now".to_string(),
                });
            }
        }

        // Reclaim ids held by terminal rooms before allocating, so a
        // freshly closed slot is reusable without waiting for its
        // deferred cleanup timer.
        let swept = self.sweep_terminal().await;
        for id in &swept {
            self.release_room_resources(id).await;
        }

        let status = if self.config.auto_approve {
            RoomStatus::Active
        } else {
            RoomStatus::Pending
        };

        // Allocation and insertion happen under one write lock so two
        // simultaneous knocks cannot observe the same free slot.
        let room = {
            let mut registry = self.registry.write().await;
            let id = registry.allocate_id();
            let mut room = Room::new(id, visitor_name, status);
            if status == RoomStatus::Active {
                room.push_event(Author::System, WELCOME_TEXT);
            }
            registry.insert(room.clone());
            room
        };

        self.sinks
            .write()
            .await
            .insert(room.id.clone(), Arc::clone(&sink));
        if status == RoomStatus::Active {
            if let Some(event) = room.messages.last() {
                sink.deliver(event);
            }
        }

        let credential = self.lease_or_fallback(&room.id).await;
        info!(room = %room.id, visitor = %room.visitor_name, ?status, "Visitor knocked");
        self.relay
            .announce(&room.id, &credential, render::knock(&room))
            .await;
        self.persist().await?;
        Ok(KnockOutcome::Created {
            id: room.id,
            status,
        })
    }

    /// Admits a pending visitor. Posts nothing new to the operator;
    /// the existing knock notification becomes the chat context.
    /// Returns `false` (without touching the room) when it was not
    /// pending, so callers can word their confirmation honestly.
    pub async fn approve(&self, id: &RoomId) -> Result<bool> {
        let event = {
            let mut registry = self.registry.write().await;
            let room = registry
                .get_mut(id)
                .ok_or_else(|| LifecycleError::NotFound(id.clone()))?;
            if room.status != RoomStatus::Pending {
                debug!(room = %id, status = ?room.status, "Approve on a non-pending room ignored");
                return Ok(false);
            }
            room.status = RoomStatus::Active;
            room.push_event(Author::System, WELCOME_TEXT);
            room.messages.last().cloned()
        };
        if let Some(event) = event {
            self.deliver(id, &event).await;
        }
        self.router.promote_room_to_chat(id).await;
        info!(room = %id, "Visitor approved");
        self.persist().await?;
        Ok(true)
    }

    /// Turns a pending visitor away. The room is deleted outright and
    /// the knock notification is purged.
    pub async fn reject(&self, id: &RoomId, reason: Option<String>) -> Result<()> {
        {
            let mut registry = self.registry.write().await;
            match registry.status_of(id) {
                None => return Err(LifecycleError::NotFound(id.clone())),
                Some(RoomStatus::Pending) => {
                    registry.remove(id);
                }
                Some(status) => {
                    return Err(LifecycleError::Validation(format!(
                        "room {} is {:?}, not pending",
                        id, status
                    )));
                }
            }
        }

        let reason = reason.unwrap_or_else(|| DEFAULT_REJECT_REASON.to_string());
        if let Some(sink) = self.sinks.write().await.remove(id) {
            sink.close(&reason);
        }
        let credential = self.credential_for(id).await;
        self.relay
            .finalize(id, &credential, format!("Room {}: visitor turned away.", id))
            .await;
        self.release_room_resources(id).await;
        info!(room = %id, %reason, "Visitor rejected");
        self.persist().await
    }

    /// Ends an active conversation, whatever the trigger. Posts the
    /// final summary, notifies the visitor, and schedules cleanup.
    /// Returns `false` (without touching the room) when it was not
    /// active.
    pub async fn depart(self: &Arc<Self>, id: &RoomId, farewell: &str) -> Result<bool> {
        let room = {
            let mut registry = self.registry.write().await;
            let room = registry
                .get_mut(id)
                .ok_or_else(|| LifecycleError::NotFound(id.clone()))?;
            if room.status != RoomStatus::Active {
                debug!(room = %id, status = ?room.status, "Depart on a non-active room ignored");
                return Ok(false);
            }
            room.status = RoomStatus::Left;
            room.left_at = Some(Utc::now());
            room.push_event(Author::System, farewell);
            room.clone()
        };

        if let Some(sink) = self.sinks.write().await.remove(id) {
            if let Some(event) = room.messages.last() {
                sink.deliver(event);
            }
            sink.close("the conversation has ended");
        }

        let credential = self.credential_for(id).await;
        self.relay
            .finalize(id, &credential, render::summary(&room))
            .await;
        self.router.clear_room(id).await;
        info!(room = %id, farewell, "Room closed");
        self.persist().await?;

        // Leave the summary readable for a while before reclaiming
        // the slot.
        let lifecycle = Arc::clone(self);
        let target = id.clone();
        let delay = self.config.cleanup_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = lifecycle.cleanup(&target).await {
                warn!(room = %target, error = %e, "Deferred cleanup failed");
            }
        });
        Ok(true)
    }

    /// Discards a terminal room and reclaims its slot. Safe to call
    /// repeatedly; a reused slot (non-terminal occupant) is skipped.
    pub async fn cleanup(&self, id: &RoomId) -> Result<()> {
        let removed = {
            let mut registry = self.registry.write().await;
            match registry.get_mut(id) {
                None => false,
                Some(room) if room.is_terminal() => {
                    room.status = RoomStatus::Cleaned;
                    registry.remove(id);
                    true
                }
                Some(room) => {
                    debug!(room = %id, status = ?room.status, "Cleanup skipped, slot is live again");
                    return Ok(());
                }
            }
        };
        if !removed {
            debug!(room = %id, "Cleanup of an already removed room");
            return Ok(());
        }
        self.release_room_resources(id).await;
        debug!(room = %id, "Room cleaned");
        self.persist().await
    }

    /// Records a dropped visitor connection and arms the grace timer.
    /// If the visitor does not reconnect within the window, the room
    /// is treated as abandoned.
    pub async fn visitor_disconnect(self: &Arc<Self>, id: &RoomId) {
        self.sinks.write().await.remove(id);
        let generation = self.bump_grace(id).await;
        let lifecycle = Arc::clone(self);
        let target = id.clone();
        let window = self.config.disconnect_grace;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if lifecycle.grace.read().await.get(&target) != Some(&generation) {
                return;
            }
            let still_active =
                lifecycle.registry.read().await.status_of(&target) == Some(RoomStatus::Active);
            let sinkless = !lifecycle.sinks.read().await.contains_key(&target);
            if still_active && sinkless {
                info!(room = %target, "Visitor did not return within the grace window");
                if let Err(e) = lifecycle.depart(&target, "left (connection lost)").await {
                    warn!(room = %target, error = %e, "Abandonment departure failed");
                }
            }
        });
    }

    /// Reattaches a returning visitor, cancelling any pending grace
    /// timer.
    pub async fn visitor_reconnect(&self, id: &RoomId, sink: Arc<dyn VisitorSink>) -> Result<()> {
        {
            let mut registry = self.registry.write().await;
            let room = registry
                .get_mut(id)
                .ok_or_else(|| LifecycleError::NotFound(id.clone()))?;
            if room.is_terminal() {
                return Err(LifecycleError::NotFound(id.clone()));
            }
            room.touch();
        }
        self.bump_grace(id).await;
        self.sinks.write().await.insert(id.clone(), sink);
        debug!(room = %id, "Visitor reconnected");
        Ok(())
    }

    /// Appends a visitor message and rolls the operator's chat view.
    pub async fn visitor_message(&self, id: &RoomId, text: &str) -> Result<()> {
        if !self.gate.validate_text(text) {
            return Err(LifecycleError::Validation("unacceptable message".to_string()));
        }
        if !self.gate.check_rate(&id.to_string(), ActionKind::Message) {
            return Err(LifecycleError::RateLimited {
                retry_after_secs: 10,
            });
        }
        let room = {
            let mut registry = self.registry.write().await;
            let room = registry
                .get_mut(id)
                .ok_or_else(|| LifecycleError::NotFound(id.clone()))?;
            match room.status {
                RoomStatus::Active => {}
                RoomStatus::Pending => {
                    return Err(LifecycleError::Validation(
                        "still waiting for the operator".to_string(),
                    ));
                }
                _ => return Err(LifecycleError::NotFound(id.clone())),
            }
            room.push_event(Author::Visitor, text);
            room.clone()
        };
        let credential = self.credential_for(id).await;
        self.relay
            .send(id, &credential, render::chat_update(&room))
            .await;
        self.persist().await
    }

    /// Appends an operator reply and delivers it to the visitor.
    /// Nothing is posted back to the operator; their own client
    /// already shows the reply.
    pub async fn operator_reply(&self, id: &RoomId, text: &str) -> Result<()> {
        let event = {
            let mut registry = self.registry.write().await;
            let room = registry
                .get_mut(id)
                .ok_or_else(|| LifecycleError::NotFound(id.clone()))?;
            if room.status != RoomStatus::Active {
                return Err(LifecycleError::Validation(format!(
                    "room {} is not active",
                    id
                )));
            }
            room.push_event(Author::Operator, text);
            room.messages.last().cloned()
        };
        if let Some(event) = event {
            self.deliver(id, &event).await;
        }
        self.persist().await
    }

    /// Kicks every active room idle for at least the inactivity
    /// timeout. Returns the number of rooms closed.
    pub async fn sweep_idle(self: &Arc<Self>) -> usize {
        let idle = self
            .registry
            .read()
            .await
            .idle_active_ids(self.config.inactivity_timeout);
        for id in &idle {
            if let Err(e) = self.depart(id, "left (inactive)").await {
                warn!(room = %id, error = %e, "Inactivity departure failed");
            }
        }
        idle.len()
    }

    /// Spawns the periodic inactivity sweep.
    pub fn spawn_sweeper(self: &Arc<Self>) {
        let lifecycle = Arc::clone(self);
        let interval = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let swept = lifecycle.sweep_idle().await;
                if swept > 0 {
                    info!(count = swept, "Closed idle rooms");
                }
            }
        });
    }

    /// Applies a routed operator action; returns the confirmation to
    /// show the operator.
    pub async fn handle_action(
        self: &Arc<Self>,
        context: &ReplyContext,
        action: OperatorAction,
    ) -> String {
        let id = context.room().clone();
        match action {
            OperatorAction::Approve => match self.approve(&id).await {
                Ok(true) => format!("Room {} approved.", id),
                Ok(false) => format!("Room {} is not pending, nothing to approve.", id),
                Err(e) => format!("Could not approve room {}: {}", id, e),
            },
            OperatorAction::Reject(reason) => match self.reject(&id, reason).await {
                Ok(()) => format!("Room {} turned away.", id),
                Err(e) => format!("Could not turn away room {}: {}", id, e),
            },
            OperatorAction::Away => self.system_notice(&id, RoomStatus::Pending, HOLD_TEXT).await,
            OperatorAction::Nudge => self.system_notice(&id, RoomStatus::Active, NUDGE_TEXT).await,
            OperatorAction::Close => match self.depart(&id, "The operator ended the conversation.").await
            {
                Ok(true) => format!("Room {} closed.", id),
                Ok(false) => format!("Room {} is not active, nothing to close.", id),
                Err(e) => format!("Could not close room {}: {}", id, e),
            },
            OperatorAction::SleepSet(minutes) => self.sleep_set(minutes).await,
            OperatorAction::SleepClear => self.sleep_clear().await,
            OperatorAction::SleepStatus => self.sleep_status().await,
            OperatorAction::Status => self.status_summary().await,
            OperatorAction::Reply(text) => match self.operator_reply(&id, &text).await {
                Ok(()) => format!("Delivered to room {}.", id),
                Err(e) => format!("Could not deliver to room {}: {}", id, e),
            },
        }
    }

    /// One-line-per-room overview plus sleep and credential state.
    pub async fn status_summary(&self) -> String {
        let now = Utc::now();
        let mut rooms = self.registry.read().await.snapshot();
        rooms.sort_by_key(|r| r.created_at);
        let mut out = String::new();
        let mut live = 0usize;
        for room in &rooms {
            if room.is_terminal() {
                continue;
            }
            live += 1;
            out.push_str(&format!(
                "Room {} [{:?}] {} — idle {}m\n",
                room.id,
                room.status,
                room.visitor_name,
                room.idle_secs(now) / 60,
            ));
        }
        if live == 0 {
            out.push_str("No open rooms.\n");
        }
        out.push_str(&self.sleep_status().await);
        let pool = self.pool.lock().await;
        out.push_str(&format!(
            "\nCredentials: {} leased, {} free.",
            pool.leased_count(),
            pool.available_count(),
        ));
        out
    }

    /// Reloads live rooms from the last snapshot. Call once at boot,
    /// before accepting traffic.
    pub async fn restore(&self) -> Result<usize> {
        let rooms = self.store.load()?;
        let mut restored = 0usize;
        {
            let mut registry = self.registry.write().await;
            for room in rooms {
                if room.is_terminal() {
                    continue;
                }
                registry.insert(room);
                restored += 1;
            }
        }
        if restored > 0 {
            let ids: Vec<RoomId> = self
                .registry
                .read()
                .await
                .snapshot()
                .into_iter()
                .map(|r| r.id)
                .collect();
            for id in &ids {
                self.lease_or_fallback(id).await;
            }
            info!(count = restored, "Restored rooms from snapshot");
        }
        Ok(restored)
    }

    /// Opens a sleep window: knocks are refused until the deadline and
    /// every pending room is turned away now.
    pub async fn sleep_set(&self, minutes: u32) -> String {
        let until = Utc::now() + ChronoDuration::minutes(i64::from(minutes));
        *self.sleep_until.write().await = Some(until);
        let pending: Vec<RoomId> = {
            let registry = self.registry.read().await;
            registry
                .snapshot()
                .into_iter()
                .filter(|r| r.status == RoomStatus::Pending)
                .map(|r| r.id)
                .collect()
        };
        for id in &pending {
            if let Err(e) = self.reject(id, None).await {
                warn!(room = %id, error = %e, "Could not turn away pending room for sleep");
            }
        }
        info!(minutes, turned_away = pending.len(), "Sleep window set");
        format!(
            "Sleeping for {} minutes. {} pending knock(s) turned away.",
            minutes,
            pending.len()
        )
    }

    /// Closes the sleep window.
    pub async fn sleep_clear(&self) -> String {
        *self.sleep_until.write().await = None;
        "Sleep cleared, knocks are welcome again.".to_string()
    }

    pub async fn sleep_status(&self) -> String {
        match *self.sleep_until.read().await {
            Some(until) if until > Utc::now() => {
                let left = (until - Utc::now()).num_minutes().max(0);
                format!("Sleeping, about {} minute(s) left.", left)
            }
            _ => "Not sleeping.".to_string(),
        }
    }

    /// Pushes a system notice into a room in the expected status and
    /// delivers it to the visitor. A mismatched status is a no-op.
    async fn system_notice(&self, id: &RoomId, expected: RoomStatus, text: &str) -> String {
        let event = {
            let mut registry = self.registry.write().await;
            match registry.get_mut(id) {
                Some(room) if room.status == expected => {
                    room.push_event(Author::System, text);
                    room.messages.last().cloned()
                }
                Some(room) => {
                    debug!(room = %id, status = ?room.status, "Notice skipped, status mismatch");
                    return format!("Room {} is {:?}, nothing to do.", id, room.status);
                }
                None => return format!("Room {} no longer exists.", id),
            }
        };
        if let Some(event) = event {
            self.deliver(id, &event).await;
        }
        format!("Room {} notified.", id)
    }

    async fn deliver(&self, id: &RoomId, event: &ChatEvent) {
        if let Some(sink) = self.sinks.read().await.get(id) {
            sink.deliver(event);
        } else {
            debug!(room = %id, "No visitor connection, event kept in transcript only");
        }
    }

    async fn lease_or_fallback(&self, id: &RoomId) -> CredentialId {
        // The lock covers bookkeeping only. Endpoint registration is a
        // remote call and must not stall other rooms' pool access.
        let leased = {
            let mut pool = self.pool.lock().await;
            match pool.lease(id) {
                Ok(credential) => Ok(credential),
                Err(PoolError::Exhausted) => Err(pool.fallback().clone()),
            }
        };
        match leased {
            Ok(credential) => {
                if let Err(e) = self.client.register_endpoint(&credential, id).await {
                    // The lease still stands; replies fall back to polling.
                    warn!(credential = %credential, room = %id, error = %e, "Endpoint registration failed");
                }
                credential
            }
            Err(fallback) => {
                warn!(room = %id, "Credential pool exhausted, using the shared fallback");
                fallback
            }
        }
    }

    async fn credential_for(&self, id: &RoomId) -> CredentialId {
        self.pool.lock().await.credential_for(id)
    }

    async fn bump_grace(&self, id: &RoomId) -> u64 {
        let mut grace = self.grace.write().await;
        let counter = grace.entry(id.clone()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Removes every collateral resource a room held. Idempotent.
    async fn release_room_resources(&self, id: &RoomId) {
        let released = self.pool.lock().await.release(id);
        if let Some(credential) = released {
            // Outside the pool lock, same as registration.
            if let Err(e) = self.client.deregister_endpoint(&credential).await {
                warn!(credential = %credential, error = %e, "Endpoint deregistration failed");
            }
        }
        self.sinks.write().await.remove(id);
        self.grace.write().await.remove(id);
        self.router.clear_room(id).await;
    }

    async fn sweep_terminal(&self) -> Vec<RoomId> {
        let mut registry = self.registry.write().await;
        let ids = registry.terminal_ids();
        for id in &ids {
            registry.remove(id);
        }
        ids
    }

    async fn persist(&self) -> Result<()> {
        let rooms = self.registry.read().await.snapshot();
        self.store.save(&rooms)?;
        Ok(())
    }

    /// Current status of a room, for transport-layer checks.
    pub async fn room_status(&self, id: &RoomId) -> Option<RoomStatus> {
        self.registry.read().await.status_of(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::OpenGate;
    use async_trait::async_trait;
    use parlor_relay::{RelayClient, RelayConfig};
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tempfile::TempDir;

    struct MockRelay {
        next_id: AtomicI32,
        sends: StdMutex<Vec<(CredentialId, String)>>,
        deletes: StdMutex<Vec<i32>>,
        /// Per-send pause, for tests that race a transition against an
        /// in-flight relay call.
        send_delay: Duration,
    }

    impl MockRelay {
        fn new() -> Arc<Self> {
            Self::with_send_delay(Duration::ZERO)
        }

        fn with_send_delay(send_delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                next_id: AtomicI32::new(100),
                sends: StdMutex::new(Vec::new()),
                deletes: StdMutex::new(Vec::new()),
                send_delay,
            })
        }

        fn sent_texts(&self) -> Vec<String> {
            self.sends
                .lock()
                .unwrap()
                .iter()
                .map(|(_, t)| t.clone())
                .collect()
        }
    }

    #[async_trait]
    impl RelayClient for MockRelay {
        async fn send_message(
            &self,
            credential: &CredentialId,
            text: &str,
        ) -> parlor_relay::Result<i32> {
            if !self.send_delay.is_zero() {
                tokio::time::sleep(self.send_delay).await;
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            self.sends
                .lock()
                .unwrap()
                .push((credential.clone(), text.to_string()));
            Ok(id)
        }

        async fn delete_message(
            &self,
            _credential: &CredentialId,
            message_id: i32,
        ) -> parlor_relay::Result<()> {
            self.deletes.lock().unwrap().push(message_id);
            Ok(())
        }

        async fn register_endpoint(
            &self,
            _credential: &CredentialId,
            _room: &RoomId,
        ) -> parlor_relay::Result<()> {
            Ok(())
        }

        async fn deregister_endpoint(
            &self,
            _credential: &CredentialId,
        ) -> parlor_relay::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        delivered: StdMutex<Vec<String>>,
        closed: StdMutex<Option<String>>,
    }

    impl VisitorSink for RecordingSink {
        fn deliver(&self, event: &ChatEvent) {
            self.delivered.lock().unwrap().push(event.text.clone());
        }

        fn close(&self, reason: &str) {
            *self.closed.lock().unwrap() = Some(reason.to_string());
        }
    }

    struct Fixture {
        lifecycle: Arc<RoomLifecycle>,
        relay: Arc<MockRelay>,
        router: Arc<ReplyContextRouter>,
        _dir: TempDir,
    }

    fn fixture_with(config: LifecycleConfig, credentials: Vec<CredentialId>) -> Fixture {
        fixture_full(config, credentials, MockRelay::new())
    }

    fn fixture_full(
        config: LifecycleConfig,
        credentials: Vec<CredentialId>,
        relay: Arc<MockRelay>,
    ) -> Fixture {
        let dir = TempDir::new().unwrap();
        let (queue, events) = RelayQueue::new(relay.clone(), RelayConfig::immediate());
        let pool = CredentialLeasePool::new(relay.clone(), credentials, CredentialId::new("main"));
        let router = Arc::new(ReplyContextRouter::new());
        let lifecycle = RoomLifecycle::new(
            queue,
            events,
            pool,
            Arc::clone(&router),
            SnapshotStore::new(dir.path()),
            Arc::new(OpenGate),
            config,
        );
        Fixture {
            lifecycle,
            relay,
            router,
            _dir: dir,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(LifecycleConfig::immediate(), vec![CredentialId::new("a")])
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    async fn knock(fx: &Fixture, name: &str) -> (RoomId, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        match fx
            .lifecycle
            .knock("test-source", name, sink.clone())
            .await
            .unwrap()
        {
            KnockOutcome::Created { id, .. } => (id, sink),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_knock_approve_chat_close_flow() {
        let fx = fixture();
        let (id, sink) = knock(&fx, "Alice").await;
        assert_eq!(id, RoomId::slot(1));
        assert_eq!(
            fx.lifecycle.room_status(&id).await,
            Some(RoomStatus::Pending)
        );

        fx.lifecycle.approve(&id).await.unwrap();
        assert_eq!(
            fx.lifecycle.room_status(&id).await,
            Some(RoomStatus::Active)
        );
        assert_eq!(sink.delivered.lock().unwrap().as_slice(), [WELCOME_TEXT]);

        fx.lifecycle.visitor_message(&id, "hello?").await.unwrap();
        fx.lifecycle.operator_reply(&id, "hi Alice").await.unwrap();
        assert_eq!(sink.delivered.lock().unwrap().len(), 2);

        fx.lifecycle.depart(&id, "left the room").await.unwrap();
        settle().await;

        let texts = fx.relay.sent_texts();
        assert!(texts[0].contains("Alice is knocking"));
        assert!(texts[1].contains("Alice: hello?"));
        assert!(texts.last().unwrap().contains("Room 1 closed"));
        assert_eq!(*sink.closed.lock().unwrap().as_ref().unwrap(), "the conversation has ended");
    }

    #[tokio::test]
    async fn test_first_message_replaces_nothing_and_finalize_purges() {
        let fx = fixture();
        let (id, _sink) = knock(&fx, "Alice").await;
        fx.lifecycle.approve(&id).await.unwrap();
        fx.lifecycle.visitor_message(&id, "one").await.unwrap();
        settle().await;
        // The knock announcement is not a replace target.
        assert!(fx.relay.deletes.lock().unwrap().is_empty());

        fx.lifecycle.visitor_message(&id, "two").await.unwrap();
        fx.lifecycle.depart(&id, "bye").await.unwrap();
        settle().await;
        // One replace delete plus the finalize purge of the
        // announcement and the live update.
        assert_eq!(fx.relay.deletes.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_reject_closes_visitor_with_default_reason() {
        let fx = fixture();
        let (id, sink) = knock(&fx, "Mallory").await;
        fx.lifecycle.reject(&id, None).await.unwrap();
        settle().await;
        assert_eq!(fx.lifecycle.room_status(&id).await, None);
        assert_eq!(
            *sink.closed.lock().unwrap().as_ref().unwrap(),
            DEFAULT_REJECT_REASON
        );
        assert!(fx
            .relay
            .sent_texts()
            .last()
            .unwrap()
            .contains("turned away"));
    }

    #[tokio::test]
    async fn test_slot_reused_after_close() {
        let fx = fixture();
        let (id, _sink) = knock(&fx, "Alice").await;
        fx.lifecycle.approve(&id).await.unwrap();
        fx.lifecycle.depart(&id, "bye").await.unwrap();
        settle().await;

        let (second, _sink) = knock(&fx, "Bob").await;
        assert_eq!(second, RoomId::slot(1));
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent_and_skips_reused_slot() {
        let fx = fixture();
        let (id, _sink) = knock(&fx, "Alice").await;
        fx.lifecycle.approve(&id).await.unwrap();
        fx.lifecycle.depart(&id, "bye").await.unwrap();

        fx.lifecycle.cleanup(&id).await.unwrap();
        fx.lifecycle.cleanup(&id).await.unwrap();

        // A new occupant of the slot survives a stale cleanup.
        let (second, _sink) = knock(&fx, "Bob").await;
        assert_eq!(second, id);
        fx.lifecycle.cleanup(&id).await.unwrap();
        assert_eq!(
            fx.lifecycle.room_status(&id).await,
            Some(RoomStatus::Pending)
        );
    }

    #[tokio::test]
    async fn test_concurrent_knocks_get_distinct_ids() {
        let fx = fixture();
        let knocks = (0..8).map(|n| {
            let lifecycle = fx.lifecycle.clone();
            async move {
                let sink = Arc::new(RecordingSink::default());
                lifecycle
                    .knock("src", &format!("visitor-{}", n), sink)
                    .await
                    .unwrap()
            }
        });
        let mut ids = Vec::new();
        for outcome in futures::future::join_all(knocks).await {
            match outcome {
                KnockOutcome::Created { id, .. } => ids.push(id),
                other => panic!("unexpected outcome: {:?}", other),
            }
        }
        ids.sort_by_key(|id| id.as_slot());
        ids.dedup();
        assert_eq!(ids.len(), 8);
    }

    #[tokio::test]
    async fn test_pending_room_refuses_messages() {
        let fx = fixture();
        let (id, _sink) = knock(&fx, "Alice").await;
        let err = fx.lifecycle.visitor_message(&id, "hi").await.unwrap_err();
        assert!(matches!(err, LifecycleError::Validation(_)));
    }

    #[tokio::test]
    async fn test_inactivity_sweep_closes_idle_rooms() {
        let fx = fixture();
        let (id, _sink) = knock(&fx, "Alice").await;
        fx.lifecycle.approve(&id).await.unwrap();

        // Timeout is zero in the immediate config, so the room counts
        // as idle right away.
        let swept = fx.lifecycle.sweep_idle().await;
        assert_eq!(swept, 1);
        settle().await;
        assert_eq!(fx.lifecycle.room_status(&id).await, None);
    }

    #[tokio::test]
    async fn test_disconnect_grace_then_abandonment() {
        let mut config = LifecycleConfig::immediate();
        config.disconnect_grace = Duration::from_millis(30);
        config.inactivity_timeout = Duration::from_secs(300);
        let fx = fixture_with(config, vec![CredentialId::new("a")]);
        let (id, _sink) = knock(&fx, "Alice").await;
        fx.lifecycle.approve(&id).await.unwrap();

        fx.lifecycle.visitor_disconnect(&id).await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(fx.lifecycle.room_status(&id).await, None);
    }

    #[tokio::test]
    async fn test_reconnect_cancels_grace_timer() {
        let mut config = LifecycleConfig::immediate();
        config.disconnect_grace = Duration::from_millis(30);
        config.inactivity_timeout = Duration::from_secs(300);
        let fx = fixture_with(config, vec![CredentialId::new("a")]);
        let (id, _sink) = knock(&fx, "Alice").await;
        fx.lifecycle.approve(&id).await.unwrap();

        fx.lifecycle.visitor_disconnect(&id).await;
        let sink = Arc::new(RecordingSink::default());
        fx.lifecycle.visitor_reconnect(&id, sink).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(
            fx.lifecycle.room_status(&id).await,
            Some(RoomStatus::Active)
        );
    }

    #[tokio::test]
    async fn test_pool_exhaustion_falls_back_to_shared_credential() {
        let fx = fixture_with(LifecycleConfig::immediate(), vec![CredentialId::new("a")]);
        let (_first, _s1) = knock(&fx, "Alice").await;
        let (_second, _s2) = knock(&fx, "Bob").await;
        settle().await;

        let creds: Vec<CredentialId> = fx
            .relay
            .sends
            .lock()
            .unwrap()
            .iter()
            .map(|(c, _)| c.clone())
            .collect();
        assert_eq!(creds.len(), 2);
        assert!(creds.contains(&CredentialId::new("a")));
        assert!(creds.contains(&CredentialId::new("main")));
    }

    #[tokio::test]
    async fn test_sleep_turns_away_pending_and_blocks_knocks() {
        let fx = fixture();
        let (id, sink) = knock(&fx, "Alice").await;
        let context = ReplyContext::Knock(id.clone());

        let reply = fx
            .lifecycle
            .handle_action(&context, OperatorAction::SleepSet(30))
            .await;
        assert!(reply.contains("1 pending knock(s) turned away"));
        assert!(sink.closed.lock().unwrap().is_some());

        let outcome = fx
            .lifecycle
            .knock("src", "Bob", Arc::new(RecordingSink::default()))
            .await
            .unwrap();
        assert!(matches!(outcome, KnockOutcome::Unavailable { .. }));

        fx.lifecycle
            .handle_action(&context, OperatorAction::SleepClear)
            .await;
        let outcome = fx
            .lifecycle
            .knock("src", "Carol", Arc::new(RecordingSink::default()))
            .await
            .unwrap();
        assert!(matches!(outcome, KnockOutcome::Created { .. }));
    }

    #[tokio::test]
    async fn test_restore_seeds_live_rooms_only() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        let rooms = vec![
            Room::new(RoomId::slot(1), "Alice", RoomStatus::Active),
            Room::new(RoomId::slot(2), "Bob", RoomStatus::Pending),
            Room::new(RoomId::slot(3), "Eve", RoomStatus::Left),
        ];
        store.save(&rooms).unwrap();

        let relay = MockRelay::new();
        let (queue, events) = RelayQueue::new(relay.clone(), RelayConfig::immediate());
        let pool =
            CredentialLeasePool::new(relay.clone(), Vec::new(), CredentialId::new("main"));
        let lifecycle = RoomLifecycle::new(
            queue,
            events,
            pool,
            Arc::new(ReplyContextRouter::new()),
            SnapshotStore::new(dir.path()),
            Arc::new(OpenGate),
            LifecycleConfig::immediate(),
        );

        let restored = lifecycle.restore().await.unwrap();
        assert_eq!(restored, 2);
        assert_eq!(
            lifecycle.room_status(&RoomId::slot(1)).await,
            Some(RoomStatus::Active)
        );
        assert_eq!(lifecycle.room_status(&RoomId::slot(3)).await, None);
    }

    #[tokio::test]
    async fn test_nudge_on_pending_room_is_refused() {
        let fx = fixture();
        let (id, sink) = knock(&fx, "Alice").await;
        let reply = fx
            .lifecycle
            .handle_action(&ReplyContext::Knock(id), OperatorAction::Nudge)
            .await;
        assert!(reply.contains("nothing to do"));
        assert!(sink.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_summary_lists_rooms() {
        let fx = fixture();
        let (id, _sink) = knock(&fx, "Alice").await;
        fx.lifecycle.approve(&id).await.unwrap();
        let summary = fx.lifecycle.status_summary().await;
        assert!(summary.contains("Room 1"));
        assert!(summary.contains("Alice"));
        assert!(summary.contains("Not sleeping."));
    }

    #[tokio::test]
    async fn test_handle_action_reports_status_mismatch() {
        let fx = fixture();
        let (id, _sink) = knock(&fx, "Alice").await;
        let context = ReplyContext::Knock(id.clone());

        // Close targets active rooms; the pending room stays put and
        // the operator hears why.
        let reply = fx.lifecycle.handle_action(&context, OperatorAction::Close).await;
        assert!(reply.contains("nothing to close"));
        assert_eq!(
            fx.lifecycle.room_status(&id).await,
            Some(RoomStatus::Pending)
        );

        fx.lifecycle.approve(&id).await.unwrap();
        let reply = fx
            .lifecycle
            .handle_action(&context, OperatorAction::Approve)
            .await;
        assert!(reply.contains("nothing to approve"));
    }

    #[tokio::test]
    async fn test_late_send_completion_does_not_revive_routing() {
        use crate::router::Resolution;

        let mut config = LifecycleConfig::immediate();
        // Keep the closed room around so the slow sends complete while
        // it is still in the registry.
        config.cleanup_delay = Duration::from_secs(60);
        let relay = MockRelay::with_send_delay(Duration::from_millis(40));
        let fx = fixture_full(config, vec![CredentialId::new("a")], relay);

        let (id, _sink) = knock(&fx, "Alice").await;
        fx.lifecycle.approve(&id).await.unwrap();
        fx.lifecycle.visitor_message(&id, "hi").await.unwrap();
        fx.lifecycle.depart(&id, "bye").await.unwrap();

        // Let the relay worker catch up with the queued sends.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fx.lifecycle.room_status(&id).await, Some(RoomStatus::Left));

        // None of the ids sent for the now-closed room route anywhere.
        for message_id in 100..103 {
            assert_eq!(
                fx.router.resolve(Some(message_id), "hello").await,
                Resolution::NeedsReply
            );
        }
    }

    /// Relay whose endpoint registration hangs forever for one
    /// credential, standing in for a slow platform call.
    struct StallingRegisterRelay {
        next_id: AtomicI32,
        stall: CredentialId,
    }

    #[async_trait]
    impl RelayClient for StallingRegisterRelay {
        async fn send_message(
            &self,
            _credential: &CredentialId,
            _text: &str,
        ) -> parlor_relay::Result<i32> {
            Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
        }

        async fn delete_message(
            &self,
            _credential: &CredentialId,
            _message_id: i32,
        ) -> parlor_relay::Result<()> {
            Ok(())
        }

        async fn register_endpoint(
            &self,
            credential: &CredentialId,
            _room: &RoomId,
        ) -> parlor_relay::Result<()> {
            if *credential == self.stall {
                futures::future::pending::<()>().await;
            }
            Ok(())
        }

        async fn deregister_endpoint(
            &self,
            _credential: &CredentialId,
        ) -> parlor_relay::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_slow_endpoint_registration_does_not_block_other_rooms() {
        let dir = TempDir::new().unwrap();
        // Credentials are handed out from the back of the list, so the
        // first knock gets "b" and stalls in registration.
        let relay = Arc::new(StallingRegisterRelay {
            next_id: AtomicI32::new(100),
            stall: CredentialId::new("b"),
        });
        let (queue, events) = RelayQueue::new(relay.clone(), RelayConfig::immediate());
        let pool = CredentialLeasePool::new(
            relay,
            vec![CredentialId::new("a"), CredentialId::new("b")],
            CredentialId::new("main"),
        );
        let lifecycle = RoomLifecycle::new(
            queue,
            events,
            pool,
            Arc::new(ReplyContextRouter::new()),
            SnapshotStore::new(dir.path()),
            Arc::new(OpenGate),
            LifecycleConfig::immediate(),
        );

        let stalled = {
            let lifecycle = Arc::clone(&lifecycle);
            tokio::spawn(async move {
                lifecycle
                    .knock("src", "Alice", Arc::new(RecordingSink::default()))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The second knock leases "a" without waiting behind the first
        // room's registration.
        let outcome = tokio::time::timeout(
            Duration::from_millis(500),
            lifecycle.knock("src", "Bob", Arc::new(RecordingSink::default())),
        )
        .await
        .expect("credential pool stayed locked during endpoint registration")
        .unwrap();
        assert!(matches!(outcome, KnockOutcome::Created { .. }));
        stalled.abort();
    }
}
