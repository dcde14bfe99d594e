//! Local key-value session store.
//!
//! Repeat visits skip a full resync by caching the activity set, the last
//! sync timestamp and the current token in a small key-value store. The
//! store itself is an external collaborator behind [`KeyValueStore`];
//! [`MemoryStore`] serves tests and ephemeral sessions, and the
//! `persistence` feature adds a SQLite-backed implementation.

use std::collections::HashMap;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{AtlasError, Result};
use crate::track::ActivitySummary;

/// OAuth token record persisted between sessions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenRecord {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix timestamp (seconds) at which the access token expires
    pub expires_at: i64,
}

impl TokenRecord {
    /// Whether the access token has expired at `now` (unix seconds).
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

/// Minimal key-value contract: `get`, `set`, `remove`.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    fn set(&mut self, key: &str, value: &[u8]);
    fn remove(&mut self, key: &str);
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &[u8]) {
        self.entries.insert(key.to_string(), value.to_vec());
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }
}

/// A typed item stored under one key, JSON-encoded.
pub struct JsonItem<T> {
    key: String,
    _marker: PhantomData<T>,
}

impl<T: Serialize + DeserializeOwned> JsonItem<T> {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            _marker: PhantomData,
        }
    }

    /// Read and decode the item. A missing key is `None`; an undecodable
    /// value is also `None` (stale schema is treated as absent).
    pub fn get<S: KeyValueStore + ?Sized>(&self, store: &S) -> Option<T> {
        let bytes = store.get(&self.key)?;
        serde_json::from_slice(&bytes).ok()
    }

    pub fn set<S: KeyValueStore + ?Sized>(&self, store: &mut S, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| AtlasError::StorageError {
            message: e.to_string(),
        })?;
        store.set(&self.key, &bytes);
        Ok(())
    }

    pub fn remove<S: KeyValueStore + ?Sized>(&self, store: &mut S) {
        store.remove(&self.key);
    }
}

/// The three items a viewer session caches.
pub struct SessionCache {
    pub activities: JsonItem<Vec<ActivitySummary>>,
    pub sync_date: JsonItem<i64>,
    pub token: JsonItem<TokenRecord>,
}

impl Default for SessionCache {
    fn default() -> Self {
        Self {
            activities: JsonItem::new("actData"),
            sync_date: JsonItem::new("syncDate"),
            token: JsonItem::new("token"),
        }
    }
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything (sign-out).
    pub fn clear<S: KeyValueStore + ?Sized>(&self, store: &mut S) {
        self.activities.remove(store);
        self.sync_date.remove(store);
        self.token.remove(store);
    }
}

// ============================================================================
// SQLite store (persistence feature)
// ============================================================================

/// SQLite-backed key-value store with msgpack-encoded activity sets.
#[cfg(feature = "persistence")]
pub mod sqlite {
    use super::*;
    use rusqlite::{params, Connection};

    pub struct SqliteStore {
        db: Connection,
    }

    impl SqliteStore {
        pub fn new(db_path: &str) -> Result<Self> {
            let db = Connection::open(db_path).map_err(storage_err)?;
            db.execute(
                "CREATE TABLE IF NOT EXISTS kv (
                    key TEXT PRIMARY KEY,
                    value BLOB NOT NULL
                )",
                [],
            )
            .map_err(storage_err)?;
            Ok(Self { db })
        }

        /// Create an in-memory database (for testing).
        pub fn in_memory() -> Result<Self> {
            Self::new(":memory:")
        }

        /// Store the bulky activity set as msgpack instead of JSON.
        pub fn set_activities_packed(&mut self, activities: &[ActivitySummary]) -> Result<()> {
            let bytes = rmp_serde::to_vec(activities).map_err(|e| AtlasError::StorageError {
                message: e.to_string(),
            })?;
            self.set("actDataPacked", &bytes);
            Ok(())
        }

        pub fn get_activities_packed(&self) -> Option<Vec<ActivitySummary>> {
            let bytes = self.get("actDataPacked")?;
            rmp_serde::from_slice(&bytes).ok()
        }
    }

    impl KeyValueStore for SqliteStore {
        fn get(&self, key: &str) -> Option<Vec<u8>> {
            self.db
                .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                    row.get::<_, Vec<u8>>(0)
                })
                .ok()
        }

        fn set(&mut self, key: &str, value: &[u8]) {
            let _ = self.db.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            );
        }

        fn remove(&mut self, key: &str) {
            let _ = self
                .db
                .execute("DELETE FROM kv WHERE key = ?1", params![key]);
        }
    }

    fn storage_err(e: rusqlite::Error) -> AtlasError {
        AtlasError::StorageError {
            message: e.to_string(),
        }
    }
}

#[cfg(feature = "persistence")]
pub use sqlite::SqliteStore;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let mut store = MemoryStore::new();
        store.set("a", b"hello");
        assert_eq!(store.get("a"), Some(b"hello".to_vec()));
        store.remove("a");
        assert_eq!(store.get("a"), None);
    }

    #[test]
    fn test_json_item() {
        let mut store = MemoryStore::new();
        let item: JsonItem<TokenRecord> = JsonItem::new("token");

        assert!(item.get(&store).is_none());

        let token = TokenRecord {
            access_token: "at".to_string(),
            refresh_token: "rt".to_string(),
            expires_at: 1_700_000_000,
        };
        item.set(&mut store, &token).unwrap();
        assert_eq!(item.get(&store), Some(token));

        item.remove(&mut store);
        assert!(item.get(&store).is_none());
    }

    #[test]
    fn test_json_item_tolerates_garbage() {
        let mut store = MemoryStore::new();
        store.set("token", b"not json");
        let item: JsonItem<TokenRecord> = JsonItem::new("token");
        assert!(item.get(&store).is_none());
    }

    #[test]
    fn test_token_expiry() {
        let token = TokenRecord {
            access_token: "at".to_string(),
            refresh_token: "rt".to_string(),
            expires_at: 1000,
        };
        assert!(!token.is_expired(999));
        assert!(token.is_expired(1000));
        assert!(token.is_expired(1001));
    }

    #[test]
    fn test_session_cache_clear() {
        let mut store = MemoryStore::new();
        let cache = SessionCache::new();
        cache.sync_date.set(&mut store, &123).unwrap();
        assert_eq!(cache.sync_date.get(&store), Some(123));
        cache.clear(&mut store);
        assert!(cache.sync_date.get(&store).is_none());
    }

    #[cfg(feature = "persistence")]
    #[test]
    fn test_sqlite_store_roundtrip() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.set("k", b"v1");
        store.set("k", b"v2");
        assert_eq!(store.get("k"), Some(b"v2".to_vec()));
        store.remove("k");
        assert_eq!(store.get("k"), None);
    }

    #[cfg(feature = "persistence")]
    #[test]
    fn test_sqlite_packed_activities() {
        let mut store = SqliteStore::in_memory().unwrap();
        let activities = vec![ActivitySummary {
            id: 1,
            name: "Ride".to_string(),
            sport_type: "Ride".to_string(),
            start_date: 1_600_000_000,
            distance: 1000.0,
            moving_time: 600,
            elapsed_time: 700,
            total_elevation_gain: 10.0,
            start_latlng: Some([51.5, -0.1]),
            end_latlng: None,
            summary_polyline: Some("_p~iF~ps|U".to_string()),
        }];
        store.set_activities_packed(&activities).unwrap();
        let restored = store.get_activities_packed().unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].name, "Ride");
    }
}
