//! Port traits for the external collaborators.
//!
//! The engine never talks to the network or the editor directly; the host
//! integration supplies implementations of these traits. All of them are
//! object-safe so tests can drop in recording mocks.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::SyncResult;

/// Remote room API failure. `Forbidden` is distinguishable because a
/// non-owner deleting their own calendar copy is expected to fail that way.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoomApiError {
    #[error("forbidden")]
    Forbidden,

    #[error("remote API returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),
}

impl RoomApiError {
    pub fn is_forbidden(&self) -> bool {
        matches!(
            self,
            RoomApiError::Forbidden | RoomApiError::Status { status: 403, .. }
        )
    }
}

pub type RoomApiResult<T> = Result<T, RoomApiError>;

/// A remote collaboration room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub token: String,
    pub url: String,
}

/// How a participant is addressed when added to a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantSource {
    /// Internal user, addressed by user id.
    Users,
    /// External guest, addressed by email.
    Emails,
}

/// The remote room service.
#[async_trait]
pub trait RoomApi: Send + Sync {
    async fn create_room(&self, name: &str, event_conversation: bool) -> RoomApiResult<Room>;
    async fn delete_room(&self, token: &str) -> RoomApiResult<()>;
    async fn update_lobby(&self, token: &str, enabled: bool, start_timestamp: i64)
    -> RoomApiResult<()>;
    async fn add_participant(
        &self,
        token: &str,
        actor_id: &str,
        source: ParticipantSource,
    ) -> RoomApiResult<()>;
    async fn transfer_ownership(&self, token: &str, new_owner: &str) -> RoomApiResult<()>;
}

/// A directory entry used to resolve attendees to internal users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryContact {
    pub email_lower: String,
    pub id: String,
}

/// Directory lookup against the server's system addressbook.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn contacts(&self) -> RoomApiResult<Vec<DirectoryContact>>;
}

/// Write access to the calendar item feed: persists a patched payload back
/// into the event.
#[async_trait]
pub trait CalendarPort: Send + Sync {
    async fn update_item(&self, calendar_id: &str, item_id: &str, payload: &str) -> SyncResult<()>;
}

/// Identity of an open editing context. An event may be edited in a dialog
/// or in a tab; the cleanup session must survive token changes within one
/// editing session, so this identity is the session key, not the event id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EditorRef {
    pub window_id: Option<i64>,
    pub dialog_outer_id: Option<i64>,
}

impl EditorRef {
    /// Stable session key for this editing context; dialogs win over windows.
    pub fn editor_key(&self) -> Option<String> {
        if let Some(dialog) = self.dialog_outer_id {
            return Some(format!("dialog:{dialog}"));
        }
        self.window_id.map(|window| format!("window:{window}"))
    }
}

/// Event fields the UI may write back into the open editor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventFields {
    pub title: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
}

/// Callbacks into the editor integration.
#[async_trait]
pub trait EditorPort: Send + Sync {
    /// Mirror title/location/description into the open editor window.
    async fn apply_event_fields(&self, editor: &EditorRef, fields: &EventFields) -> SyncResult<()>;
    /// Write custom properties into the item the editor will save.
    async fn set_item_properties(
        &self,
        editor: &EditorRef,
        properties: &BTreeMap<String, Option<String>>,
    ) -> SyncResult<()>;
    /// Ask the editor to report this token's fate (persisted/discarded/
    /// superseded) when the editing session ends.
    async fn register_room_cleanup(&self, editor: &EditorRef, token: &str) -> SyncResult<()>;
}

/// One calendar item as delivered by the lifecycle feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarItem {
    pub calendar_id: String,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    /// Serialized iCalendar payload.
    pub payload: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Event,
    Task,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn editor_key_prefers_dialog() {
        let both = EditorRef {
            window_id: Some(7),
            dialog_outer_id: Some(12),
        };
        assert_eq!(both.editor_key().as_deref(), Some("dialog:12"));

        let window_only = EditorRef {
            window_id: Some(7),
            dialog_outer_id: None,
        };
        assert_eq!(window_only.editor_key().as_deref(), Some("window:7"));
        assert_eq!(EditorRef::default().editor_key(), None);
    }

    #[test]
    fn forbidden_detection_covers_status_403() {
        assert!(RoomApiError::Forbidden.is_forbidden());
        assert!(
            RoomApiError::Status {
                status: 403,
                message: "nope".into()
            }
            .is_forbidden()
        );
        assert!(
            !RoomApiError::Status {
                status: 500,
                message: "boom".into()
            }
            .is_forbidden()
        );
    }
}
