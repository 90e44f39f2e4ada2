//! Request surface exposed to the editor dialog.
//!
//! The dialog runs in a separate context and talks to the engine through
//! serialized request messages. Every request kind is a variant of one
//! tagged enum and is answered with the same `{ok, error?, data?}` envelope,
//! so an unknown request fails at deserialization instead of silently
//! falling through a string match.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use talksync_core::event_snapshot;
use talksync_core::ics::metadata::{
    PROP_ADD_GUESTS, PROP_ADD_PARTICIPANTS, PROP_ADD_USERS, PROP_DELEGATE, PROP_DELEGATE_NAME,
    PROP_DELEGATE_READY, PROP_DELEGATED, PROP_EVENT, PROP_LOBBY, PROP_OBJECT_ID, PROP_START,
    PROP_TOKEN, PROP_URL,
};
use talksync_core::{apply_updates, extract};

use crate::cache::RoomMetaUpdate;
use crate::error::{SyncError, SyncResult};
use crate::ports::{CalendarItem, EditorRef, EventFields};
use crate::sync::SyncEngine;
use crate::util::{short_id, short_token};

/// A request from the dialog.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DispatchRequest {
    /// Open a wizard session for an item being edited; replies with the
    /// session id the other requests refer to.
    #[serde(rename_all = "camelCase")]
    OpenSession {
        editor: EditorRef,
        item: CalendarItem,
    },
    /// Create a room for the dialog; the dialog itself has no API access.
    #[serde(rename_all = "camelCase")]
    CreateRoom {
        name: String,
        #[serde(default)]
        event_conversation: bool,
    },
    /// Write room metadata into the session's event.
    #[serde(rename_all = "camelCase")]
    ApplyMetadata {
        session_id: String,
        metadata: MetadataPatch,
    },
    /// Read title/location/description/times of the session's event.
    #[serde(rename_all = "camelCase")]
    GetEventSnapshot { session_id: String },
    /// Mirror event fields into the open editor window.
    #[serde(rename_all = "camelCase")]
    ApplyEventFields {
        session_id: String,
        fields: EventFields,
    },
    /// Merge observed room state into the room cache.
    #[serde(rename_all = "camelCase")]
    TrackRoom {
        token: String,
        updates: RoomTrackUpdate,
    },
    /// Arm deferred deletion for a room created during this session.
    #[serde(rename_all = "camelCase")]
    RegisterCleanup {
        session_id: String,
        token: String,
        #[serde(default)]
        info: Value,
    },
}

/// Field updates for `applyMetadata`. `None` leaves a field untouched; an
/// empty string deletes it from the payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetadataPatch {
    pub token: Option<String>,
    pub url: Option<String>,
    pub lobby_enabled: Option<bool>,
    pub start_timestamp: Option<i64>,
    pub event_conversation: Option<bool>,
    pub object_id: Option<String>,
    pub add_users: Option<bool>,
    pub add_guests: Option<bool>,
    pub delegate_id: Option<String>,
    pub delegate_name: Option<String>,
    pub delegated: Option<bool>,
}

/// Room state reported by the dialog after talking to the remote API itself.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomTrackUpdate {
    pub lobby_enabled: Option<bool>,
    pub event_conversation: Option<bool>,
    pub start_timestamp: Option<i64>,
}

/// Uniform reply envelope.
#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Reply {
    fn success(data: Option<Value>) -> Self {
        Reply {
            ok: true,
            error: None,
            data,
        }
    }

    fn failure(error: &SyncError) -> Self {
        Reply {
            ok: false,
            error: Some(error.to_string()),
            data: None,
        }
    }
}

impl SyncEngine {
    /// Handle one dialog request.
    pub async fn dispatch(&self, request: DispatchRequest) -> Reply {
        let result = match request {
            DispatchRequest::OpenSession { editor, item } => self.open_session(editor, item),
            DispatchRequest::CreateRoom {
                name,
                event_conversation,
            } => self.create_room(&name, event_conversation).await,
            DispatchRequest::ApplyMetadata {
                session_id,
                metadata,
            } => self.apply_metadata(&session_id, metadata).await,
            DispatchRequest::GetEventSnapshot { session_id } => self.get_event_snapshot(&session_id),
            DispatchRequest::ApplyEventFields { session_id, fields } => {
                self.apply_event_fields(&session_id, fields).await
            }
            DispatchRequest::TrackRoom { token, updates } => {
                self.track_room(&token, updates).await
            }
            DispatchRequest::RegisterCleanup {
                session_id,
                token,
                info,
            } => self.register_cleanup(&session_id, &token, info).await,
        };
        match result {
            Ok(data) => Reply::success(data),
            Err(err) => {
                warn!(error = %err, "dialog request failed");
                Reply::failure(&err)
            }
        }
    }

    fn open_session(&self, editor: EditorRef, item: CalendarItem) -> SyncResult<Option<Value>> {
        let session_id = self.sessions.insert(editor, item);
        Ok(Some(serde_json::json!({ "sessionId": session_id })))
    }

    async fn create_room(&self, name: &str, event_conversation: bool) -> SyncResult<Option<Value>> {
        let room = self.api.create_room(name, event_conversation).await?;
        self.rooms
            .update(
                &room.token,
                RoomMetaUpdate {
                    event_conversation: Some(event_conversation),
                    ..Default::default()
                },
            )
            .await;
        debug!(token = %short_token(&room.token), "room created for dialog");
        Ok(Some(serde_json::to_value(room)?))
    }

    async fn apply_metadata(
        &self,
        session_id: &str,
        patch: MetadataPatch,
    ) -> SyncResult<Option<Value>> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| SyncError::SessionNotFound(short_id(session_id)))?;
        let previous = extract(&session.item.payload);
        let updates = build_property_updates(&patch, previous.delegated);

        let patched = apply_updates(&session.item.payload, &updates);
        if patched.changed {
            self.sessions
                .update_payload(session_id, patched.payload.clone());
        }

        if let Err(err) = self
            .editor
            .set_item_properties(&session.editor, &updates)
            .await
        {
            self.rollback_new_room(&patch, previous.token.as_deref())
                .await;
            return Err(err);
        }

        if let Some(token) = patch.token.as_deref().filter(|t| !t.is_empty()) {
            self.events
                .set(
                    &session.item.calendar_id,
                    &session.item.id,
                    token,
                    patch.url.as_deref().unwrap_or_default(),
                )
                .await;
            let cache_update = RoomMetaUpdate {
                lobby_enabled: patch.lobby_enabled,
                event_conversation: patch.event_conversation,
                start_timestamp: patch.start_timestamp,
                delegate_id: patch.delegate_id.clone().filter(|d| !d.is_empty()),
                delegate_name: patch.delegate_name.clone().filter(|n| !n.is_empty()),
                delegated: patch.delegated,
            };
            if !cache_update.is_empty() {
                self.rooms.update(token, cache_update).await;
            }
        }
        Ok(None)
    }

    /// Undo the room created for this dialog when its metadata could not be
    /// written into the event; an orphaned room would be unreachable.
    async fn rollback_new_room(&self, patch: &MetadataPatch, previous_token: Option<&str>) {
        let Some(token) = patch.token.as_deref().filter(|t| !t.is_empty()) else {
            return;
        };
        if previous_token == Some(token) {
            return;
        }
        debug!(token = %short_token(token), "rolling back room after failed metadata write");
        if let Err(err) = self.api.delete_room(token).await {
            warn!(token = %short_token(token), error = %err, "rollback deletion failed");
        }
        self.rooms.remove(token).await;
    }

    fn get_event_snapshot(&self, session_id: &str) -> SyncResult<Option<Value>> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| SyncError::SessionNotFound(short_id(session_id)))?;
        let snapshot = event_snapshot(&session.item.payload);
        Ok(Some(serde_json::to_value(snapshot)?))
    }

    async fn apply_event_fields(
        &self,
        session_id: &str,
        fields: EventFields,
    ) -> SyncResult<Option<Value>> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| SyncError::SessionNotFound(short_id(session_id)))?;
        self.editor
            .apply_event_fields(&session.editor, &fields)
            .await?;
        Ok(None)
    }

    async fn track_room(&self, token: &str, updates: RoomTrackUpdate) -> SyncResult<Option<Value>> {
        if token.is_empty() {
            return Err(SyncError::TokenMissing);
        }
        self.rooms
            .update(
                token,
                RoomMetaUpdate {
                    lobby_enabled: updates.lobby_enabled,
                    event_conversation: updates.event_conversation,
                    start_timestamp: updates.start_timestamp,
                    ..Default::default()
                },
            )
            .await;
        Ok(None)
    }

    async fn register_cleanup(
        &self,
        session_id: &str,
        token: &str,
        info: Value,
    ) -> SyncResult<Option<Value>> {
        if token.is_empty() {
            return Err(SyncError::TokenMissing);
        }
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| SyncError::SessionNotFound(short_id(session_id)))?;
        let editor_key = session
            .editor
            .editor_key()
            .ok_or(SyncError::EditorRefMissing)?;

        self.cleanup.register(&editor_key, token, info);
        if let Err(err) = self
            .editor
            .register_room_cleanup(&session.editor, token)
            .await
        {
            // Without the editor's confirmation no fate signal will ever
            // arrive; leaving the registration would strand the room.
            self.cleanup.cancel(token, "editor registration failed");
            return Err(err);
        }
        self.sessions.remove(session_id);
        Ok(None)
    }
}

/// Translate a metadata patch into payload property updates.
fn build_property_updates(
    patch: &MetadataPatch,
    already_delegated: Option<bool>,
) -> BTreeMap<String, Option<String>> {
    let mut updates = BTreeMap::new();
    let text = |value: &str| {
        if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        }
    };
    let flag = |value: bool| Some(if value { "TRUE" } else { "FALSE" }.to_string());

    if let Some(token) = &patch.token {
        updates.insert(PROP_TOKEN.to_string(), text(token));
    }
    if let Some(url) = &patch.url {
        updates.insert(PROP_URL.to_string(), text(url));
    }
    if let Some(lobby) = patch.lobby_enabled {
        updates.insert(PROP_LOBBY.to_string(), flag(lobby));
    }
    if let Some(start) = patch.start_timestamp {
        updates.insert(PROP_START.to_string(), Some(start.to_string()));
    }
    if let Some(event) = patch.event_conversation {
        updates.insert(
            PROP_EVENT.to_string(),
            Some(if event { "event" } else { "standard" }.to_string()),
        );
    }
    if let Some(object_id) = &patch.object_id {
        updates.insert(PROP_OBJECT_ID.to_string(), text(object_id));
    }
    if let Some(users) = patch.add_users {
        updates.insert(PROP_ADD_USERS.to_string(), flag(users));
    }
    if let Some(guests) = patch.add_guests {
        updates.insert(PROP_ADD_GUESTS.to_string(), flag(guests));
    }
    // Older releases read one combined flag; keep it in step whenever either
    // split flag is written.
    if patch.add_users.is_some() || patch.add_guests.is_some() {
        let either = patch.add_users.unwrap_or(false) || patch.add_guests.unwrap_or(false);
        updates.insert(PROP_ADD_PARTICIPANTS.to_string(), flag(either));
    }
    if let Some(delegated) = patch.delegated {
        updates.insert(PROP_DELEGATED.to_string(), flag(delegated));
    }

    match patch.delegate_id.as_deref() {
        Some("") => {
            // Clearing the delegate disarms the whole delegation state.
            updates.insert(PROP_DELEGATE.to_string(), None);
            updates.insert(PROP_DELEGATE_NAME.to_string(), None);
            updates.insert(PROP_DELEGATE_READY.to_string(), None);
        }
        Some(delegate) => {
            updates.insert(PROP_DELEGATE.to_string(), Some(delegate.to_string()));
            if let Some(name) = &patch.delegate_name {
                updates.insert(PROP_DELEGATE_NAME.to_string(), text(name));
            }
            // The incoming delegation state decides whether to arm the ready
            // flag; the stored payload only fills in when the patch is silent.
            if patch.delegated.or(already_delegated) != Some(true) {
                updates.insert(PROP_DELEGATE_READY.to_string(), Some("TRUE".to_string()));
            }
        }
        None => {
            if let Some(name) = &patch.delegate_name {
                updates.insert(PROP_DELEGATE_NAME.to_string(), text(name));
            }
        }
    }
    updates
}
