//! Change-notified key/value store backing the persistent caches.
//!
//! The calendar payload stays the durable source of truth for token
//! association; this store is acceleration/bookkeeping and may be cleared at
//! any time.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::{SyncError, SyncResult};
use crate::util::lock;

/// Broadcast on every write; carries the new value (`None` on removal).
#[derive(Debug, Clone)]
pub struct StoreChange {
    pub key: String,
    pub value: Option<Value>,
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Atomic snapshot of all keys, used once at startup.
    async fn get_all(&self) -> SyncResult<HashMap<String, Value>>;
    async fn get(&self, key: &str) -> SyncResult<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> SyncResult<()>;
    async fn remove(&self, key: &str) -> SyncResult<()>;
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Store persisted as a single JSON object file, written atomically via a
/// temp file and rename.
pub struct JsonFileStore {
    path: PathBuf,
    map: Mutex<HashMap<String, Value>>,
    changes: broadcast::Sender<StoreChange>,
}

impl JsonFileStore {
    pub fn open(path: PathBuf) -> SyncResult<Self> {
        let map = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            HashMap::new()
        };
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(JsonFileStore {
            path,
            map: Mutex::new(map),
            changes,
        })
    }

    fn persist(&self, snapshot: &HashMap<String, Value>) -> SyncResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let temp = self.path.with_extension("tmp");
        let data = serde_json::to_string_pretty(snapshot)?;
        std::fs::write(&temp, data)?;
        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }

    fn notify(&self, key: &str, value: Option<Value>) {
        // No receivers is fine; nobody has subscribed yet.
        let _ = self.changes.send(StoreChange {
            key: key.to_string(),
            value,
        });
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get_all(&self) -> SyncResult<HashMap<String, Value>> {
        Ok(lock(&self.map).clone())
    }

    async fn get(&self, key: &str) -> SyncResult<Option<Value>> {
        Ok(lock(&self.map).get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> SyncResult<()> {
        let snapshot = {
            let mut map = lock(&self.map);
            map.insert(key.to_string(), value.clone());
            map.clone()
        };
        self.persist(&snapshot)?;
        self.notify(key, Some(value));
        Ok(())
    }

    async fn remove(&self, key: &str) -> SyncResult<()> {
        let (snapshot, removed) = {
            let mut map = lock(&self.map);
            let removed = map.remove(key).is_some();
            (map.clone(), removed)
        };
        if removed {
            self.persist(&snapshot)?;
            self.notify(key, None);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

/// Volatile store for tests and hosts that persist elsewhere.
pub struct MemoryStore {
    map: Mutex<HashMap<String, Value>>,
    changes: broadcast::Sender<StoreChange>,
    /// When set, writes fail; lets tests exercise the best-effort cache path.
    fail_writes: Mutex<bool>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        MemoryStore {
            map: Mutex::new(HashMap::new()),
            changes,
            fail_writes: Mutex::new(false),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        *lock(&self.fail_writes) = fail;
    }

    fn check_writable(&self) -> SyncResult<()> {
        if *lock(&self.fail_writes) {
            return Err(SyncError::Store("write disabled".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_all(&self) -> SyncResult<HashMap<String, Value>> {
        Ok(lock(&self.map).clone())
    }

    async fn get(&self, key: &str) -> SyncResult<Option<Value>> {
        Ok(lock(&self.map).get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> SyncResult<()> {
        self.check_writable()?;
        lock(&self.map).insert(key.to_string(), value.clone());
        let _ = self.changes.send(StoreChange {
            key: key.to_string(),
            value: Some(value),
        });
        Ok(())
    }

    async fn remove(&self, key: &str) -> SyncResult<()> {
        self.check_writable()?;
        if lock(&self.map).remove(key).is_some() {
            let _ = self.changes.send(StoreChange {
                key: key.to_string(),
                value: None,
            });
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
