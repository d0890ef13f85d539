//! Room snapshot store.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parlor_models::Room;
use tracing::debug;

use crate::error::{PersistenceError, Result};

/// File name of the room snapshot inside the state directory.
const SNAPSHOT_FILE: &str = "rooms.json";

/// Persists the set of live rooms as one JSON file.
///
/// Both `save` and `load` filter out terminal rooms, so a crashed or
/// restarted process only ever sees rooms that were pending or active.
pub struct SnapshotStore {
    base_path: PathBuf,
}

impl SnapshotStore {
    /// Creates a store rooted at the given state directory.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn snapshot_path(&self) -> PathBuf {
        self.base_path.join(SNAPSHOT_FILE)
    }

    /// Saves the non-terminal subset of the given rooms.
    pub fn save(&self, rooms: &[Room]) -> Result<()> {
        let live: Vec<&Room> = rooms.iter().filter(|r| !r.is_terminal()).collect();
        let json = serde_json::to_string_pretty(&live)?;
        let path = self.snapshot_path();
        atomic_write(&path, json.as_bytes())?;
        debug!(path = %path.display(), rooms = live.len(), "Saved room snapshot");
        Ok(())
    }

    /// Loads the snapshot, returning only non-terminal rooms.
    ///
    /// A missing snapshot file is an empty room set, not an error.
    pub fn load(&self) -> Result<Vec<Room>> {
        let path = self.snapshot_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&path).map_err(|source| PersistenceError::ReadError {
            path: path.clone(),
            source,
        })?;
        let rooms: Vec<Room> = serde_json::from_str(&data)?;
        Ok(rooms.into_iter().filter(|r| !r.is_terminal()).collect())
    }
}

/// Writes data via a temp file in the same directory, then renames it
/// over the target so the snapshot is never half-written.
fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    if !dir.exists() {
        fs::create_dir_all(dir).map_err(|source| PersistenceError::DirectoryError {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let mut tmp =
        tempfile::NamedTempFile::new_in(dir).map_err(|source| PersistenceError::WriteError {
            path: path.to_path_buf(),
            source,
        })?;
    tmp.write_all(data)
        .and_then(|_| tmp.flush())
        .map_err(|source| PersistenceError::WriteError {
            path: path.to_path_buf(),
            source,
        })?;
    tmp.persist(path).map_err(|e| PersistenceError::WriteError {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parlor_models::{Author, Room, RoomId, RoomStatus};
    use tempfile::tempdir;

    #[test]
    fn test_load_missing_snapshot_is_empty() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());

        let mut room = Room::new(RoomId::slot(1), "Alice", RoomStatus::Active);
        room.push_event(Author::Visitor, "hi");

        store.save(&[room]).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, RoomId::slot(1));
        assert_eq!(loaded[0].messages.len(), 1);
    }

    #[test]
    fn test_terminal_rooms_are_never_persisted() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());

        let pending = Room::new(RoomId::slot(1), "Alice", RoomStatus::Pending);
        let left = Room::new(RoomId::slot(2), "Bob", RoomStatus::Left);
        let cleaned = Room::new(RoomId::slot(3), "Carol", RoomStatus::Cleaned);

        store.save(&[pending, left, cleaned]).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, RoomId::slot(1));
    }

    #[test]
    fn test_terminal_rooms_are_filtered_on_load() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());

        // A snapshot written by an older process could still contain a
        // terminal room; load must drop it.
        let rooms = vec![
            Room::new(RoomId::slot(1), "Alice", RoomStatus::Active),
            Room::new(RoomId::slot(2), "Bob", RoomStatus::Left),
        ];
        let json = serde_json::to_string(&rooms).unwrap();
        fs::write(dir.path().join(SNAPSHOT_FILE), json).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].visitor_name, "Alice");
    }

    #[test]
    fn test_save_overwrites_previous_snapshot() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());

        store
            .save(&[Room::new(RoomId::slot(1), "Alice", RoomStatus::Active)])
            .unwrap();
        store
            .save(&[Room::new(RoomId::slot(2), "Bob", RoomStatus::Pending)])
            .unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, RoomId::slot(2));
    }
}
