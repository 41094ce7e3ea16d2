//! Record store for user accounts and completed games.
//!
//! # Storage Strategy
//!
//! Two backends implement [`RecordStore`]:
//!
//! - [`MemoryStore`]: hash maps behind locks, used by tests and by
//!   `serve --memory`.
//! - [`FileStore`]: one file per record under a base directory.
//!
//! ```text
//! <base_dir>/
//!   users/            # <username>.json
//!   games/            # <uuid>.json.zst (JSON compressed with zstd level 19)
//! ```
//!
//! Writes go to a temporary file that is then renamed into place, so a
//! crash never leaves a half-written record behind. Game saves are
//! idempotent: saving a record whose id is already stored is a no-op that
//! reports `false`, which is what lets a session be persisted exactly once
//! even when completion is signalled twice.

use crate::error::StorageError;
use crate::types::*;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use utoipa::ToSchema;
use uuid::Uuid;

/// zstd compression level (19 = near-maximum compression for small data).
const ZSTD_COMPRESSION_LEVEL: i32 = 19;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A registered account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    /// Argon2 PHC string, salt included.
    pub password_hash: String,
    pub created_at: u64,
}

/// A completed game as it is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct GameRecord {
    /// The session's unique identifier.
    #[schema(value_type = String)]
    pub id: Uuid,
    #[schema(value_type = String)]
    pub white: Identity,
    #[schema(value_type = String)]
    pub black: Identity,
    /// Winning identity, `null` for draws and aborted games.
    #[schema(value_type = Option<String>)]
    pub winner: Option<Identity>,
    pub status: SessionStatus,
    pub reason: Option<EndReason>,
    /// Unix timestamp when the session was created.
    pub created_at: u64,
    /// Unix timestamp when the session completed (0 if it has not).
    pub completed_at: u64,
}

impl GameRecord {
    /// Whether `identity` played in this game.
    pub fn involves(&self, identity: &Identity) -> bool {
        &self.white == identity || &self.black == identity
    }
}

/// Win/loss/draw totals for one player.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UserStats {
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
}

// ---------------------------------------------------------------------------
// Store contract
// ---------------------------------------------------------------------------

/// Key-value persistence for users and completed games.
pub trait RecordStore: Send + Sync {
    /// Inserts a user. Returns `false` if the username already exists.
    fn insert_user(&self, user: UserRecord) -> Result<bool, StorageError>;

    fn get_user(&self, username: &str) -> Result<Option<UserRecord>, StorageError>;

    /// Stores a game record. Returns `false` (and changes nothing) if a
    /// record with the same id is already stored.
    fn save_game(&self, record: &GameRecord) -> Result<bool, StorageError>;

    fn get_game(&self, id: &Uuid) -> Result<Option<GameRecord>, StorageError>;

    /// All stored games, most recently completed first.
    fn list_games(&self) -> Result<Vec<GameRecord>, StorageError>;
}

/// Computes wins, losses and draws for `identity` over stored games.
/// Aborted games count toward nothing.
pub fn user_stats(store: &dyn RecordStore, identity: &Identity) -> Result<UserStats, StorageError> {
    let mut stats = UserStats::default();
    for record in store.list_games()? {
        if record.status != SessionStatus::Completed || !record.involves(identity) {
            continue;
        }
        match (&record.winner, record.reason) {
            (_, Some(EndReason::Aborted)) => {}
            (Some(winner), _) if winner == identity => stats.wins += 1,
            (Some(_), _) => stats.losses += 1,
            (None, _) => stats.draws += 1,
        }
    }
    Ok(stats)
}

fn sort_newest_first(records: &mut [GameRecord]) {
    records.sort_by(|a, b| b.completed_at.cmp(&a.completed_at).then(a.id.cmp(&b.id)));
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory store. Contents are lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<String, UserRecord>>,
    games: RwLock<HashMap<Uuid, GameRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn insert_user(&self, user: UserRecord) -> Result<bool, StorageError> {
        let mut users = self.users.write();
        if users.contains_key(&user.username) {
            return Ok(false);
        }
        users.insert(user.username.clone(), user);
        Ok(true)
    }

    fn get_user(&self, username: &str) -> Result<Option<UserRecord>, StorageError> {
        Ok(self.users.read().get(username).cloned())
    }

    fn save_game(&self, record: &GameRecord) -> Result<bool, StorageError> {
        let mut games = self.games.write();
        if games.contains_key(&record.id) {
            return Ok(false);
        }
        games.insert(record.id, record.clone());
        Ok(true)
    }

    fn get_game(&self, id: &Uuid) -> Result<Option<GameRecord>, StorageError> {
        Ok(self.games.read().get(id).cloned())
    }

    fn list_games(&self) -> Result<Vec<GameRecord>, StorageError> {
        let mut records: Vec<GameRecord> = self.games.read().values().cloned().collect();
        sort_newest_first(&mut records);
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

/// File-backed store.
pub struct FileStore {
    base_dir: PathBuf,
    users_dir: PathBuf,
    games_dir: PathBuf,
    /// Serializes check-then-write so two saves of one id cannot both win.
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Creates a new `FileStore` rooted at `base_dir`.
    ///
    /// Creates the directory structure if it doesn't exist.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        let users_dir = base_dir.join("users");
        let games_dir = base_dir.join("games");

        fs::create_dir_all(&users_dir)?;
        fs::create_dir_all(&games_dir)?;

        log::info!("Record store initialized at {}", base_dir.display());

        Ok(Self {
            base_dir,
            users_dir,
            games_dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Returns the base storage directory path.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn user_path(&self, username: &str) -> PathBuf {
        self.users_dir.join(format!("{}.json", username))
    }

    fn game_path(&self, id: &Uuid) -> PathBuf {
        self.games_dir.join(format!("{}.json.zst", id))
    }

    /// Writes to a temp file next to `path`, then renames it into place.
    fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StorageError> {
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, data)?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }

    fn load_game_file(&self, path: &Path) -> Result<GameRecord, StorageError> {
        let compressed = fs::read(path)?;
        let raw = zstd::decode_all(compressed.as_slice())
            .map_err(|e| StorageError::Corrupt(format!("{}: {}", path.display(), e)))?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

impl RecordStore for FileStore {
    fn insert_user(&self, user: UserRecord) -> Result<bool, StorageError> {
        let _guard = self.write_lock.lock();
        let path = self.user_path(&user.username);
        if path.exists() {
            return Ok(false);
        }
        let data = serde_json::to_vec_pretty(&user)?;
        Self::write_atomic(&path, &data)?;
        log::debug!("Stored user {}", user.username);
        Ok(true)
    }

    fn get_user(&self, username: &str) -> Result<Option<UserRecord>, StorageError> {
        let path = self.user_path(username);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&data)?))
    }

    fn save_game(&self, record: &GameRecord) -> Result<bool, StorageError> {
        let _guard = self.write_lock.lock();
        let path = self.game_path(&record.id);
        if path.exists() {
            log::debug!("Game {} already stored, skipping", record.id);
            return Ok(false);
        }

        let raw = serde_json::to_vec(record)?;
        let compressed = zstd::encode_all(raw.as_slice(), ZSTD_COMPRESSION_LEVEL)?;
        Self::write_atomic(&path, &compressed)?;

        log::info!(
            "Stored game {}: {} -> {} bytes",
            record.id,
            raw.len(),
            compressed.len()
        );
        Ok(true)
    }

    fn get_game(&self, id: &Uuid) -> Result<Option<GameRecord>, StorageError> {
        let path = self.game_path(id);
        if !path.exists() {
            return Ok(None);
        }
        self.load_game_file(&path).map(Some)
    }

    fn list_games(&self) -> Result<Vec<GameRecord>, StorageError> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.games_dir)? {
            let entry = entry?;
            let filename = entry.file_name().to_string_lossy().to_string();
            if filename.strip_suffix(".json.zst").and_then(|s| Uuid::parse_str(s).ok()).is_none() {
                continue;
            }
            match self.load_game_file(&entry.path()) {
                Ok(record) => records.push(record),
                Err(e) => log::warn!("Skipping unreadable game file {}: {}", filename, e),
            }
        }
        sort_newest_first(&mut records);
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// Utility: current unix timestamp
// ---------------------------------------------------------------------------

/// Returns the current Unix timestamp in seconds.
pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn record(white: &str, black: &str, winner: Option<&str>, reason: EndReason) -> GameRecord {
        GameRecord {
            id: Uuid::new_v4(),
            white: Identity::new(white),
            black: Identity::new(black),
            winner: winner.map(Identity::new),
            status: SessionStatus::Completed,
            reason: Some(reason),
            created_at: 100,
            completed_at: 200,
        }
    }

    fn user(name: &str) -> UserRecord {
        UserRecord {
            username: name.into(),
            password_hash: "ab".into(),
            created_at: 1,
        }
    }

    #[test]
    fn test_memory_store_saves_game_once() {
        let store = MemoryStore::new();
        let rec = record("alice", "bob", Some("alice"), EndReason::Checkmate);
        assert!(store.save_game(&rec).unwrap());
        assert!(!store.save_game(&rec).unwrap());
        assert_eq!(store.list_games().unwrap().len(), 1);
        assert_eq!(store.get_game(&rec.id).unwrap(), Some(rec));
    }

    #[test]
    fn test_memory_store_rejects_duplicate_user() {
        let store = MemoryStore::new();
        assert!(store.insert_user(user("alice")).unwrap());
        assert!(!store.insert_user(user("alice")).unwrap());
        assert!(store.get_user("bob").unwrap().is_none());
    }

    #[test]
    fn test_user_stats_counts_results() {
        let store = MemoryStore::new();
        let alice = Identity::new("alice");
        store.save_game(&record("alice", "bob", Some("alice"), EndReason::Checkmate)).unwrap();
        store.save_game(&record("bob", "alice", Some("bob"), EndReason::Resignation)).unwrap();
        store.save_game(&record("alice", "carol", None, EndReason::Stalemate)).unwrap();
        store.save_game(&record("alice", "carol", None, EndReason::Aborted)).unwrap();
        store.save_game(&record("bob", "carol", Some("bob"), EndReason::Quit)).unwrap();

        let stats = user_stats(&store, &alice).unwrap();
        assert_eq!(stats, UserStats { wins: 1, losses: 1, draws: 1 });
    }

    #[test]
    fn test_file_store_on_disk() {
        let dir = std::env::temp_dir().join(format!("chessroom_test_{}", Uuid::new_v4()));
        let store = FileStore::new(&dir).unwrap();

        let rec = record("alice", "bob", Some("bob"), EndReason::Disconnected);
        assert!(store.save_game(&rec).unwrap());
        assert!(!store.save_game(&rec).unwrap());
        assert!(store.game_path(&rec.id).exists());

        assert_eq!(store.get_game(&rec.id).unwrap(), Some(rec.clone()));
        assert_eq!(store.list_games().unwrap(), vec![rec]);
        assert!(store.get_game(&Uuid::new_v4()).unwrap().is_none());

        assert!(store.insert_user(user("alice")).unwrap());
        assert!(!store.insert_user(user("alice")).unwrap());
        assert_eq!(store.get_user("alice").unwrap(), Some(user("alice")));

        // Cleanup
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_file_store_reports_corrupt_record() {
        let dir = std::env::temp_dir().join(format!("chessroom_test_{}", Uuid::new_v4()));
        let store = FileStore::new(&dir).unwrap();
        let id = Uuid::new_v4();
        fs::write(store.game_path(&id), b"not zstd").unwrap();

        assert!(matches!(store.get_game(&id), Err(StorageError::Corrupt(_))));
        assert!(store.list_games().unwrap().is_empty());

        let _ = fs::remove_dir_all(&dir);
    }
}
