//! In-memory room table with id allocation.

use std::collections::HashMap;

use parlor_models::{Room, RoomId, RoomStatus};
use tracing::warn;

/// Upper bound on the ascending slot scan. Reaching it means more
/// live rooms than any sane deployment; the overflow fallback below
/// exists purely as a safety valve.
const ID_SCAN_LIMIT: u32 = 512;

/// Exclusive owner of all [`Room`] values, keyed by id.
///
/// Ids are allocated lowest-free-slot so the labels the operator sees
/// stay small and dense instead of growing monotonically.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: HashMap<RoomId, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lowest slot id not held by a non-terminal room.
    ///
    /// Callers are expected to have swept terminal rooms out first;
    /// a lingering terminal occupant still counts as free, and the
    /// subsequent insert simply replaces it.
    pub fn allocate_id(&self) -> RoomId {
        for n in 1..=ID_SCAN_LIMIT {
            let id = RoomId::slot(n);
            match self.rooms.get(&id) {
                None => return id,
                Some(room) if room.is_terminal() => return id,
                Some(_) => continue,
            }
        }
        warn!(
            limit = ID_SCAN_LIMIT,
            "Slot scan exhausted, falling back to overflow id"
        );
        RoomId::overflow_now()
    }

    pub fn insert(&mut self, room: Room) {
        self.rooms.insert(room.id.clone(), room);
    }

    pub fn get(&self, id: &RoomId) -> Option<&Room> {
        self.rooms.get(id)
    }

    pub fn get_mut(&mut self, id: &RoomId) -> Option<&mut Room> {
        self.rooms.get_mut(id)
    }

    pub fn remove(&mut self, id: &RoomId) -> Option<Room> {
        self.rooms.remove(id)
    }

    pub fn status_of(&self, id: &RoomId) -> Option<RoomStatus> {
        self.rooms.get(id).map(|r| r.status)
    }

    /// Ids of rooms already in a terminal state, ready for cleanup.
    pub fn terminal_ids(&self) -> Vec<RoomId> {
        self.rooms
            .values()
            .filter(|r| r.is_terminal())
            .map(|r| r.id.clone())
            .collect()
    }

    /// Ids of active rooms idle for at least the given duration.
    pub fn idle_active_ids(&self, idle_at_least: std::time::Duration) -> Vec<RoomId> {
        let now = chrono::Utc::now();
        self.rooms
            .values()
            .filter(|r| r.status == RoomStatus::Active)
            .filter(|r| r.idle_secs(now) >= idle_at_least.as_secs() as i64)
            .map(|r| r.id.clone())
            .collect()
    }

    /// Clones all rooms, for snapshotting.
    pub fn snapshot(&self) -> Vec<Room> {
        self.rooms.values().cloned().collect()
    }

    pub fn count_by_status(&self, status: RoomStatus) -> usize {
        self.rooms.values().filter(|r| r.status == status).count()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(n: u32, status: RoomStatus) -> Room {
        Room::new(RoomId::slot(n), format!("visitor-{}", n), status)
    }

    #[test]
    fn test_allocates_from_one() {
        let registry = RoomRegistry::new();
        assert_eq!(registry.allocate_id(), RoomId::slot(1));
    }

    #[test]
    fn test_allocates_lowest_free_slot() {
        let mut registry = RoomRegistry::new();
        registry.insert(room(1, RoomStatus::Active));
        registry.insert(room(2, RoomStatus::Pending));
        registry.insert(room(4, RoomStatus::Active));
        assert_eq!(registry.allocate_id(), RoomId::slot(3));
    }

    #[test]
    fn test_terminal_room_slot_counts_as_free() {
        let mut registry = RoomRegistry::new();
        registry.insert(room(1, RoomStatus::Left));
        registry.insert(room(2, RoomStatus::Active));
        assert_eq!(registry.allocate_id(), RoomId::slot(1));
    }

    #[test]
    fn test_overflow_after_scan_limit() {
        let mut registry = RoomRegistry::new();
        for n in 1..=ID_SCAN_LIMIT {
            registry.insert(room(n, RoomStatus::Active));
        }
        let id = registry.allocate_id();
        assert!(id.as_slot().is_none());
    }

    #[test]
    fn test_terminal_ids() {
        let mut registry = RoomRegistry::new();
        registry.insert(room(1, RoomStatus::Active));
        registry.insert(room(2, RoomStatus::Left));
        registry.insert(room(3, RoomStatus::Cleaned));
        let mut ids = registry.terminal_ids();
        ids.sort_by_key(|id| id.as_slot());
        assert_eq!(ids, vec![RoomId::slot(2), RoomId::slot(3)]);
    }

    #[test]
    fn test_idle_active_ids() {
        use std::time::Duration;
        let mut registry = RoomRegistry::new();
        let mut idle = room(1, RoomStatus::Active);
        idle.last_activity_at = chrono::Utc::now() - chrono::Duration::seconds(600);
        registry.insert(idle);
        registry.insert(room(2, RoomStatus::Active));

        let ids = registry.idle_active_ids(Duration::from_secs(300));
        assert_eq!(ids, vec![RoomId::slot(1)]);
    }
}
