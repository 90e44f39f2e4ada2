//! Registry of open editor wizard sessions.
//!
//! The room dialog talks to the engine through an opaque context id rather
//! than by event identity: the item it is editing may not be saved yet and
//! has no stable id of its own. Sessions expire after a fixed TTL so an
//! abandoned dialog cannot pin its event copy forever; pruning happens on
//! access, there is no sweeper task.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tracing::debug;
use uuid::Uuid;

use crate::ports::{CalendarItem, EditorRef};
use crate::util::{lock, now_ms, short_id};

pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// One open editing dialog and its working copy of the event.
#[derive(Debug, Clone)]
pub struct WizardSession {
    pub editor: EditorRef,
    pub item: CalendarItem,
    pub created: i64,
}

pub struct SessionStore {
    ttl_ms: i64,
    sessions: Mutex<HashMap<String, WizardSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_SESSION_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        SessionStore {
            ttl_ms: ttl.as_millis() as i64,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Register a session and return its context id.
    pub fn insert(&self, editor: EditorRef, item: CalendarItem) -> String {
        let id = Uuid::new_v4().to_string();
        let mut sessions = lock(&self.sessions);
        Self::prune(&mut sessions, self.ttl_ms);
        sessions.insert(
            id.clone(),
            WizardSession {
                editor,
                item,
                created: now_ms(),
            },
        );
        debug!(session = %short_id(&id), "editor session opened");
        id
    }

    pub fn get(&self, id: &str) -> Option<WizardSession> {
        let mut sessions = lock(&self.sessions);
        Self::prune(&mut sessions, self.ttl_ms);
        sessions.get(id).cloned()
    }

    /// Replace the session's working payload after a patch.
    pub fn update_payload(&self, id: &str, payload: String) {
        if let Some(session) = lock(&self.sessions).get_mut(id) {
            session.item.payload = payload;
        }
    }

    pub fn remove(&self, id: &str) -> Option<WizardSession> {
        let removed = lock(&self.sessions).remove(id);
        if removed.is_some() {
            debug!(session = %short_id(id), "editor session closed");
        }
        removed
    }

    fn prune(sessions: &mut HashMap<String, WizardSession>, ttl_ms: i64) {
        let cutoff = now_ms() - ttl_ms;
        sessions.retain(|_, session| session.created >= cutoff);
    }
}
