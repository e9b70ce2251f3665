//! Durable key/value cache for room and quiz snapshots.
//!
//! [`SnapshotStore`] is the storage contract: plain string values under
//! string keys, surviving restarts when the backing store is durable.
//! [`DurableCache`] adds typed JSON helpers and the key namespace the rest
//! of the crate uses. No reconciliation happens here; callers merge first,
//! then `put`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::Result;
use crate::model::{Quiz, Room};
use crate::protocol::{QuizId, RoomId, ScoreId};

/// Key/value persistence surface.
pub trait SnapshotStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Option<String>;

    /// # Errors
    ///
    /// Returns an error if the value could not be persisted.
    fn put(&self, key: &str, value: String) -> Result<()>;

    /// Removing an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal could not be persisted.
    fn remove(&self, key: &str) -> Result<()>;
}

// ── Stores ──────────────────────────────────────────────────────────

/// Process-local store. Contents are lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys currently stored, in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

impl SnapshotStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn put(&self, key: &str, value: String) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

/// Store backed by a single JSON file.
///
/// The whole map is rewritten on every change through a temporary file and a
/// rename, so a crash leaves either the old or the new contents.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`, loading existing contents if the file exists.
    ///
    /// # Errors
    ///
    /// Returns [`QuizRoomError::Io`](crate::QuizRoomError::Io) if the file
    /// exists but cannot be read, and
    /// [`QuizRoomError::Serialization`](crate::QuizRoomError::Serialization)
    /// if it is not a JSON object of strings.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), "opened snapshot store");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SnapshotStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn put(&self, key: &str, value: String) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value);
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.remove(key).is_none() {
            return Ok(());
        }
        self.persist(&entries)
    }
}

// ── Typed cache ─────────────────────────────────────────────────────

/// Namespaced cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Snapshot of a room (`room:{id}`).
    Room(RoomId),
    /// A quiz fetched for a game (`quiz:{id}`).
    Quiz(QuizId),
    /// The room this client is currently in.
    CurrentRoomId,
    /// The local player's score id in the current room.
    ScoreId,
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Room(id) => write!(f, "room:{id}"),
            CacheKey::Quiz(id) => write!(f, "quiz:{id}"),
            CacheKey::CurrentRoomId => f.write_str("currentRoomId"),
            CacheKey::ScoreId => f.write_str("scoreId"),
        }
    }
}

/// Typed JSON view over a [`SnapshotStore`].
#[derive(Clone)]
pub struct DurableCache {
    store: Arc<dyn SnapshotStore>,
}

impl DurableCache {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self { store }
    }

    /// A cache over a fresh [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Read and decode a value. Undecodable values are logged and treated as
    /// absent.
    pub fn get<T: DeserializeOwned>(&self, key: CacheKey) -> Option<T> {
        let raw = self.store.get(&key.to_string())?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(%key, error = %e, "discarding undecodable cache entry");
                None
            }
        }
    }

    /// # Errors
    ///
    /// Returns an error if encoding or the underlying store fails.
    pub fn put<T: Serialize>(&self, key: CacheKey, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.store.put(&key.to_string(), json)
    }

    /// # Errors
    ///
    /// Returns an error if the underlying store fails.
    pub fn remove(&self, key: CacheKey) -> Result<()> {
        self.store.remove(&key.to_string())
    }

    pub fn room(&self, id: RoomId) -> Option<Room> {
        self.get(CacheKey::Room(id))
    }

    /// # Errors
    ///
    /// Returns an error if the snapshot could not be written.
    pub fn put_room(&self, room: &Room) -> Result<()> {
        self.put(CacheKey::Room(room.id), room)
    }

    pub fn quiz(&self, id: QuizId) -> Option<Quiz> {
        self.get(CacheKey::Quiz(id))
    }

    /// # Errors
    ///
    /// Returns an error if the quiz could not be written.
    pub fn put_quiz(&self, quiz: &Quiz) -> Result<()> {
        self.put(CacheKey::Quiz(quiz.id), quiz)
    }

    pub fn current_room_id(&self) -> Option<RoomId> {
        self.get(CacheKey::CurrentRoomId)
    }

    pub fn score_id(&self) -> Option<ScoreId> {
        self.get(CacheKey::ScoreId)
    }

    /// Record `room` as the current room, with the local score id if known.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the keys could not be written.
    pub fn seed_session(&self, room: &Room, score_id: Option<ScoreId>) -> Result<()> {
        self.put_room(room)?;
        self.put(CacheKey::CurrentRoomId, &room.id)?;
        match score_id {
            Some(id) => self.put(CacheKey::ScoreId, &id),
            None => self.remove(CacheKey::ScoreId),
        }
    }

    /// Remove the room snapshot, and the current-session keys if they point
    /// at this room. Every key is attempted; the first failure is returned.
    ///
    /// # Errors
    ///
    /// Returns the first store error encountered.
    pub fn evict_session(&self, room_id: RoomId) -> Result<()> {
        let mut results = vec![self.remove(CacheKey::Room(room_id))];
        if self.current_room_id() == Some(room_id) {
            results.push(self.remove(CacheKey::CurrentRoomId));
            results.push(self.remove(CacheKey::ScoreId));
        }
        results.into_iter().collect()
    }
}

impl fmt::Debug for DurableCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DurableCache").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::model::Scoreboard;
    use uuid::Uuid;

    fn room(id: u128) -> Room {
        Room {
            id: Uuid::from_u128(id),
            code: "ABC123".into(),
            is_public: true,
            max_players: 4,
            owner_id: Uuid::from_u128(0xA1),
            quiz_id: None,
            scoreboard: Scoreboard::new(),
        }
    }

    #[test]
    fn keys_are_namespaced() {
        let id = Uuid::from_u128(7);
        assert_eq!(CacheKey::Room(id).to_string(), format!("room:{id}"));
        assert_eq!(CacheKey::Quiz(id).to_string(), format!("quiz:{id}"));
        assert_eq!(CacheKey::CurrentRoomId.to_string(), "currentRoomId");
        assert_eq!(CacheKey::ScoreId.to_string(), "scoreId");
    }

    #[test]
    fn seed_and_evict_session() {
        let store = Arc::new(MemoryStore::new());
        let cache = DurableCache::new(store.clone());
        let r = room(1);
        let score_id = Uuid::from_u128(0x51);

        cache.seed_session(&r, Some(score_id)).unwrap();
        assert_eq!(cache.room(r.id), Some(r.clone()));
        assert_eq!(cache.current_room_id(), Some(r.id));
        assert_eq!(cache.score_id(), Some(score_id));

        cache.evict_session(r.id).unwrap();
        assert!(store.keys().is_empty());
    }

    #[test]
    fn evicting_another_room_keeps_current_session() {
        let cache = DurableCache::in_memory();
        let current = room(1);
        let old = room(2);
        cache.put_room(&old).unwrap();
        cache.seed_session(&current, Some(Uuid::from_u128(0x51))).unwrap();

        cache.evict_session(old.id).unwrap();
        assert!(cache.room(old.id).is_none());
        assert_eq!(cache.current_room_id(), Some(current.id));
        assert!(cache.score_id().is_some());
    }

    #[test]
    fn undecodable_entry_reads_as_absent() {
        let store = Arc::new(MemoryStore::new());
        let id = Uuid::from_u128(3);
        store.put(&CacheKey::Room(id).to_string(), "{not json".into()).unwrap();
        let cache = DurableCache::new(store);
        assert!(cache.room(id).is_none());
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = std::env::temp_dir().join(format!("quiz-room-sync-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("cache.json");

        {
            let cache = DurableCache::new(Arc::new(FileStore::open(&path).unwrap()));
            cache.put_room(&room(2)).unwrap();
        }

        let reopened = DurableCache::new(Arc::new(FileStore::open(&path).unwrap()));
        assert_eq!(reopened.room(Uuid::from_u128(2)), Some(room(2)));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn removing_absent_key_is_ok() {
        let cache = DurableCache::in_memory();
        cache.remove(CacheKey::ScoreId).unwrap();
    }
}
