//! Persistent association caches: room metadata by token, and event identity
//! to token.
//!
//! Both caches mirror one storage key holding the whole map, the layout the
//! original stored data uses, so existing store files keep working. Store
//! write failures are logged and ignored; the embedded payload remains the
//! durable source of truth.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::store::{KeyValueStore, StoreChange};
use crate::util::{lock, now_ms, short_token};

pub const ROOM_META_KEY: &str = "nctalkRoomMeta";
pub const EVENT_TOKEN_MAP_KEY: &str = "nctalkEventTokenMap";

/// Cached state of one room.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomMeta {
    pub lobby_enabled: Option<bool>,
    pub event_conversation: Option<bool>,
    pub start_timestamp: Option<i64>,
    pub delegate_id: Option<String>,
    pub delegate_name: Option<String>,
    pub delegated: Option<bool>,
    /// Wall-clock milliseconds of the last write; non-decreasing per token.
    pub updated: i64,
}

/// Partial update merged into a `RoomMeta`; `None` fields stay untouched.
#[derive(Debug, Clone, Default)]
pub struct RoomMetaUpdate {
    pub lobby_enabled: Option<bool>,
    pub event_conversation: Option<bool>,
    pub start_timestamp: Option<i64>,
    pub delegate_id: Option<String>,
    pub delegate_name: Option<String>,
    pub delegated: Option<bool>,
}

impl RoomMetaUpdate {
    pub fn is_empty(&self) -> bool {
        self.lobby_enabled.is_none()
            && self.event_conversation.is_none()
            && self.start_timestamp.is_none()
            && self.delegate_id.is_none()
            && self.delegate_name.is_none()
            && self.delegated.is_none()
    }
}

/// Token mapping for a calendar item, used to find the room to delete when
/// the event itself is deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventTokenEntry {
    pub token: String,
    pub url: String,
    pub updated: i64,
}

fn event_map_key(calendar_id: &str, item_id: &str) -> Option<String> {
    if calendar_id.is_empty() || item_id.is_empty() {
        return None;
    }
    Some(format!("{calendar_id}::{item_id}"))
}

/// Room metadata cache keyed by room token.
pub struct RoomMetaCache {
    store: Arc<dyn KeyValueStore>,
    map: Mutex<HashMap<String, RoomMeta>>,
}

impl RoomMetaCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        RoomMetaCache {
            store,
            map: Mutex::new(HashMap::new()),
        }
    }

    /// Populate the in-memory mirror from the store.
    pub async fn load(&self) {
        match self.store.get(ROOM_META_KEY).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(map) => *lock(&self.map) = map,
                Err(err) => warn!(error = %err, "room meta cache is unreadable, starting empty"),
            },
            Ok(None) => {}
            Err(err) => warn!(error = %err, "room meta cache load failed"),
        }
    }

    pub fn get(&self, token: &str) -> Option<RoomMeta> {
        if token.is_empty() {
            return None;
        }
        lock(&self.map).get(token).cloned()
    }

    /// Merge `update` into the entry for `token`. `updated` is bumped to at
    /// least its previous value so it never decreases.
    pub async fn update(&self, token: &str, update: RoomMetaUpdate) {
        if token.is_empty() {
            return;
        }
        let snapshot = {
            let mut map = lock(&self.map);
            let entry = map.entry(token.to_string()).or_default();
            if let Some(v) = update.lobby_enabled {
                entry.lobby_enabled = Some(v);
            }
            if let Some(v) = update.event_conversation {
                entry.event_conversation = Some(v);
            }
            if let Some(v) = update.start_timestamp {
                entry.start_timestamp = Some(v);
            }
            if let Some(v) = update.delegate_id {
                entry.delegate_id = Some(v);
            }
            if let Some(v) = update.delegate_name {
                entry.delegate_name = Some(v);
            }
            if let Some(v) = update.delegated {
                entry.delegated = Some(v);
            }
            entry.updated = entry.updated.max(now_ms());
            map.clone()
        };
        self.persist(snapshot).await;
    }

    pub async fn remove(&self, token: &str) {
        let snapshot = {
            let mut map = lock(&self.map);
            if map.remove(token).is_none() {
                return;
            }
            map.clone()
        };
        self.persist(snapshot).await;
    }

    /// Refresh the mirror from a store change notification. Returns whether
    /// the change was for this cache's key.
    pub fn apply_change(&self, change: &StoreChange) -> bool {
        if change.key != ROOM_META_KEY {
            return false;
        }
        let next = change
            .value
            .clone()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        *lock(&self.map) = next;
        true
    }

    async fn persist(&self, snapshot: HashMap<String, RoomMeta>) {
        match serde_json::to_value(&snapshot) {
            Ok(value) => {
                if let Err(err) = self.store.set(ROOM_META_KEY, value).await {
                    warn!(error = %err, "room meta cache write failed");
                }
            }
            Err(err) => warn!(error = %err, "room meta cache serialization failed"),
        }
    }
}

/// Event-identity-to-token cache keyed by `(calendarId, itemId)`.
pub struct EventTokenCache {
    store: Arc<dyn KeyValueStore>,
    map: Mutex<HashMap<String, EventTokenEntry>>,
}

impl EventTokenCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        EventTokenCache {
            store,
            map: Mutex::new(HashMap::new()),
        }
    }

    pub async fn load(&self) {
        match self.store.get(EVENT_TOKEN_MAP_KEY).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(map) => *lock(&self.map) = map,
                Err(err) => warn!(error = %err, "event token map is unreadable, starting empty"),
            },
            Ok(None) => {}
            Err(err) => warn!(error = %err, "event token map load failed"),
        }
    }

    pub fn get(&self, calendar_id: &str, item_id: &str) -> Option<EventTokenEntry> {
        let key = event_map_key(calendar_id, item_id)?;
        lock(&self.map).get(&key).cloned()
    }

    pub async fn set(&self, calendar_id: &str, item_id: &str, token: &str, url: &str) {
        let Some(key) = event_map_key(calendar_id, item_id) else {
            return;
        };
        if token.is_empty() {
            return;
        }
        let snapshot = {
            let mut map = lock(&self.map);
            map.insert(
                key,
                EventTokenEntry {
                    token: token.to_string(),
                    url: url.to_string(),
                    updated: now_ms(),
                },
            );
            map.clone()
        };
        self.persist(snapshot).await;
    }

    pub async fn remove(&self, calendar_id: &str, item_id: &str) {
        let Some(key) = event_map_key(calendar_id, item_id) else {
            return;
        };
        let snapshot = {
            let mut map = lock(&self.map);
            if map.remove(&key).is_none() {
                return;
            }
            map.clone()
        };
        self.persist(snapshot).await;
    }

    /// Drop every entry pointing at `token`; used by the cleanup deletion
    /// task, which knows the token but not the event identity.
    pub async fn remove_token(&self, token: &str) {
        if token.is_empty() {
            return;
        }
        let snapshot = {
            let mut map = lock(&self.map);
            let before = map.len();
            map.retain(|_, entry| entry.token != token);
            if map.len() == before {
                return;
            }
            map.clone()
        };
        debug!(token = %short_token(token), "event token mappings dropped");
        self.persist(snapshot).await;
    }

    pub fn apply_change(&self, change: &StoreChange) -> bool {
        if change.key != EVENT_TOKEN_MAP_KEY {
            return false;
        }
        let next = change
            .value
            .clone()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        *lock(&self.map) = next;
        true
    }

    async fn persist(&self, snapshot: HashMap<String, EventTokenEntry>) {
        match serde_json::to_value(&snapshot) {
            Ok(value) => {
                if let Err(err) = self.store.set(EVENT_TOKEN_MAP_KEY, value).await {
                    warn!(error = %err, "event token map write failed");
                }
            }
            Err(err) => warn!(error = %err, "event token map serialization failed"),
        }
    }
}
