//! Deferred deletion of speculatively created rooms.
//!
//! When the UI creates a room for an event that is still being edited, the
//! room must be reclaimed if the edit is abandoned. Each editor session has
//! at most one pending registration; the editor later reports exactly one of
//! persisted / discarded / superseded, and the calendar save path can cancel
//! a pending registration independently. Deletion only happens after the
//! grace delay so a slow save does not race its own cleanup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::{EventTokenCache, RoomMetaCache};
use crate::ports::RoomApi;
use crate::util::{lock, short_token};

/// Grace delay before a discarded room is deleted.
pub const DEFAULT_DELETE_DELAY: Duration = Duration::from_secs(15);

/// Fate of a registered token, reported by the editor integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupSignal {
    /// The edit was saved; the room is real, keep it.
    Persisted,
    /// The edit was cancelled; delete after the grace delay.
    Discarded,
    /// A newer token replaced this one; delete immediately.
    Superseded,
}

#[derive(Debug)]
struct Registration {
    editor_key: String,
    /// Opaque context supplied by the editor, echoed in the deletion log.
    info: Value,
    timer: Option<JoinHandle<()>>,
    deleting: bool,
}

#[derive(Default)]
struct State {
    by_token: HashMap<String, Registration>,
    by_editor: HashMap<String, String>,
}

struct Inner {
    delay: Duration,
    api: Arc<dyn RoomApi>,
    rooms: Arc<RoomMetaCache>,
    events: Arc<EventTokenCache>,
    state: Mutex<State>,
}

/// Per-editor-session cleanup state machine.
#[derive(Clone)]
pub struct CleanupScheduler {
    inner: Arc<Inner>,
}

impl CleanupScheduler {
    pub fn new(
        api: Arc<dyn RoomApi>,
        rooms: Arc<RoomMetaCache>,
        events: Arc<EventTokenCache>,
    ) -> Self {
        Self::with_delay(api, rooms, events, DEFAULT_DELETE_DELAY)
    }

    pub fn with_delay(
        api: Arc<dyn RoomApi>,
        rooms: Arc<RoomMetaCache>,
        events: Arc<EventTokenCache>,
        delay: Duration,
    ) -> Self {
        CleanupScheduler {
            inner: Arc::new(Inner {
                delay,
                api,
                rooms,
                events,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Install a pending registration for this editor session. A different
    /// token already pending for the same session is superseded and deleted
    /// immediately.
    pub fn register(&self, editor_key: &str, token: &str, info: Value) {
        if editor_key.is_empty() || token.is_empty() {
            return;
        }
        let superseded = {
            let state = lock(&self.inner.state);
            state
                .by_editor
                .get(editor_key)
                .filter(|previous| previous.as_str() != token)
                .cloned()
        };
        if let Some(previous) = superseded {
            self.inner
                .clone()
                .schedule_delete(&previous, "superseded", Duration::ZERO);
        }
        {
            let mut state = lock(&self.inner.state);
            state
                .by_editor
                .insert(editor_key.to_string(), token.to_string());
            let replaced = state.by_token.insert(
                token.to_string(),
                Registration {
                    editor_key: editor_key.to_string(),
                    info,
                    timer: None,
                    deleting: false,
                },
            );
            // Re-registering the same token restarts its session cleanly.
            if let Some(old) = replaced
                && let Some(timer) = old.timer
            {
                timer.abort();
            }
        }
        debug!(token = %short_token(token), editor = editor_key, "room cleanup registered");
    }

    /// React to the editor's verdict for a token.
    pub fn signal(&self, token: &str, signal: CleanupSignal) {
        if token.is_empty() {
            return;
        }
        match signal {
            CleanupSignal::Persisted => self.cancel(token, "persisted"),
            CleanupSignal::Discarded => {
                self.inner
                    .clone()
                    .schedule_delete(token, "discarded", self.inner.delay)
            }
            CleanupSignal::Superseded => {
                self.inner
                    .clone()
                    .schedule_delete(token, "superseded", Duration::ZERO)
            }
        }
    }

    /// Drop the registration for `token` without deleting the room. Called on
    /// `persisted` and by the calendar save path; both are independent
    /// confirmations of the same fact, so cancelling twice is a no-op.
    pub fn cancel(&self, token: &str, reason: &str) {
        if token.is_empty() {
            return;
        }
        let mut state = lock(&self.inner.state);
        let Some(entry) = state.by_token.remove(token) else {
            return;
        };
        if let Some(timer) = entry.timer {
            timer.abort();
        }
        if state.by_editor.get(&entry.editor_key).map(String::as_str) == Some(token) {
            state.by_editor.remove(&entry.editor_key);
        }
        debug!(token = %short_token(token), reason, "room cleanup cleared");
    }

    /// Whether a registration is currently pending for `token`.
    pub fn is_pending(&self, token: &str) -> bool {
        lock(&self.inner.state).by_token.contains_key(token)
    }
}

impl Inner {
    fn schedule_delete(self: Arc<Self>, token: &str, reason: &'static str, delay: Duration) {
        {
            let mut state = lock(&self.state);
            let Some(entry) = state.by_token.get_mut(token) else {
                debug!(token = %short_token(token), reason, "room cleanup ignored (not pending)");
                return;
            };
            if entry.timer.is_some() {
                return;
            }
            let inner = self.clone();
            let token_owned = token.to_string();
            entry.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                inner.run_delete(&token_owned, reason).await;
            }));
        }
        debug!(
            token = %short_token(token),
            reason,
            delay_ms = delay.as_millis() as u64,
            "room cleanup scheduled"
        );
    }

    async fn run_delete(&self, token: &str, reason: &str) {
        let info = {
            let mut state = lock(&self.state);
            match state.by_token.get_mut(token) {
                None => return,
                Some(entry) if entry.deleting => return,
                Some(entry) => {
                    entry.deleting = true;
                    entry.info.clone()
                }
            }
        };
        debug!(token = %short_token(token), reason, info = %info, "room cleanup delete");
        if let Err(err) = self.api.delete_room(token).await {
            warn!(token = %short_token(token), error = %err, "room cleanup delete failed");
        }
        self.rooms.remove(token).await;
        self.events.remove_token(token).await;

        let mut state = lock(&self.state);
        // Only clear the registration if it is still ours; a fresh
        // registration for the same token must survive.
        let still_ours = state
            .by_token
            .get(token)
            .is_some_and(|entry| entry.deleting);
        if still_ours
            && let Some(entry) = state.by_token.remove(token)
            && state.by_editor.get(&entry.editor_key).map(String::as_str) == Some(token)
        {
            state.by_editor.remove(&entry.editor_key);
        }
    }
}
