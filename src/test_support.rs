//! Recording mocks for the port traits plus an engine builder over the
//! in-memory store.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::AccountConfig;
use crate::error::{SyncError, SyncResult};
use crate::ports::{
    CalendarItem, CalendarPort, Directory, DirectoryContact, EditorPort, EditorRef, EventFields,
    ItemKind, ParticipantSource, Room, RoomApi, RoomApiError, RoomApiResult,
};
use crate::store::MemoryStore;
use crate::sync::SyncEngine;
use crate::util::lock;

/// Install a test log subscriber once; `RUST_LOG` filters output.
pub fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Build a minimal payload with the given properties in one VEVENT block.
pub fn payload_with(props: &[(&str, &str)]) -> String {
    let mut lines = vec![
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        "BEGIN:VEVENT".to_string(),
        "UID:uid-1".to_string(),
    ];
    for (name, value) in props {
        lines.push(format!("{name}:{value}"));
    }
    lines.push("END:VEVENT".to_string());
    lines.push("END:VCALENDAR".to_string());
    lines.join("\r\n")
}

pub fn event_item(calendar_id: &str, id: &str, payload: &str) -> CalendarItem {
    CalendarItem {
        calendar_id: calendar_id.to_string(),
        id: id.to_string(),
        kind: ItemKind::Event,
        payload: payload.to_string(),
    }
}

#[derive(Default)]
pub struct MockRoomApi {
    created: Mutex<Vec<(String, bool)>>,
    deleted: Mutex<Vec<String>>,
    lobby: Mutex<Vec<(String, bool, i64)>>,
    participants: Mutex<Vec<(String, String, ParticipantSource)>>,
    transfers: Mutex<Vec<(String, String)>>,
    fail_delete: Mutex<Option<RoomApiError>>,
    fail_add: Mutex<Option<RoomApiError>>,
    fail_transfer: Mutex<Option<RoomApiError>>,
    add_delay: Mutex<Option<Duration>>,
}

impl MockRoomApi {
    pub fn deleted_rooms(&self) -> Vec<String> {
        lock(&self.deleted).clone()
    }

    pub fn lobby_updates(&self) -> Vec<(String, bool, i64)> {
        lock(&self.lobby).clone()
    }

    pub fn participants(&self) -> Vec<(String, String, ParticipantSource)> {
        lock(&self.participants).clone()
    }

    pub fn transfers(&self) -> Vec<(String, String)> {
        lock(&self.transfers).clone()
    }

    pub fn fail_delete(&self, err: RoomApiError) {
        *lock(&self.fail_delete) = Some(err);
    }

    pub fn fail_add_participant(&self, err: RoomApiError) {
        *lock(&self.fail_add) = Some(err);
    }

    pub fn fail_transfer(&self, err: RoomApiError) {
        *lock(&self.fail_transfer) = Some(err);
    }

    /// Make `add_participant` yield for `delay` so overlap is observable.
    pub fn delay_add_participant(&self, delay: Duration) {
        *lock(&self.add_delay) = Some(delay);
    }
}

#[async_trait]
impl RoomApi for MockRoomApi {
    async fn create_room(&self, name: &str, event_conversation: bool) -> RoomApiResult<Room> {
        let token = {
            let mut created = lock(&self.created);
            created.push((name.to_string(), event_conversation));
            format!("room{}", created.len())
        };
        Ok(Room {
            url: format!("https://cloud.example.com/call/{token}"),
            token,
        })
    }

    async fn delete_room(&self, token: &str) -> RoomApiResult<()> {
        lock(&self.deleted).push(token.to_string());
        match lock(&self.fail_delete).clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn update_lobby(
        &self,
        token: &str,
        enabled: bool,
        start_timestamp: i64,
    ) -> RoomApiResult<()> {
        lock(&self.lobby).push((token.to_string(), enabled, start_timestamp));
        Ok(())
    }

    async fn add_participant(
        &self,
        token: &str,
        actor_id: &str,
        source: ParticipantSource,
    ) -> RoomApiResult<()> {
        let delay = *lock(&self.add_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = lock(&self.fail_add).clone() {
            return Err(err);
        }
        lock(&self.participants).push((token.to_string(), actor_id.to_string(), source));
        Ok(())
    }

    async fn transfer_ownership(&self, token: &str, new_owner: &str) -> RoomApiResult<()> {
        if let Some(err) = lock(&self.fail_transfer).clone() {
            return Err(err);
        }
        lock(&self.transfers).push((token.to_string(), new_owner.to_string()));
        Ok(())
    }
}

pub struct MockDirectory {
    contacts: Vec<DirectoryContact>,
    fail: bool,
}

impl MockDirectory {
    pub fn with_contacts(pairs: &[(&str, &str)]) -> Self {
        MockDirectory {
            contacts: pairs
                .iter()
                .map(|(email, id)| DirectoryContact {
                    email_lower: email.to_ascii_lowercase(),
                    id: id.to_string(),
                })
                .collect(),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        MockDirectory {
            contacts: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl Directory for MockDirectory {
    async fn contacts(&self) -> RoomApiResult<Vec<DirectoryContact>> {
        if self.fail {
            return Err(RoomApiError::Transport("directory down".into()));
        }
        Ok(self.contacts.clone())
    }
}

#[derive(Default)]
pub struct MockCalendar {
    updates: Mutex<Vec<(String, String, String)>>,
}

impl MockCalendar {
    pub fn updates(&self) -> Vec<(String, String, String)> {
        lock(&self.updates).clone()
    }
}

#[async_trait]
impl CalendarPort for MockCalendar {
    async fn update_item(&self, calendar_id: &str, item_id: &str, payload: &str) -> SyncResult<()> {
        lock(&self.updates).push((
            calendar_id.to_string(),
            item_id.to_string(),
            payload.to_string(),
        ));
        Ok(())
    }
}

#[derive(Default)]
pub struct MockEditor {
    fields: Mutex<Vec<(EditorRef, EventFields)>>,
    properties: Mutex<Vec<(EditorRef, BTreeMap<String, Option<String>>)>>,
    cleanups: Mutex<Vec<String>>,
    fail_properties: Mutex<bool>,
    fail_cleanup: Mutex<bool>,
}

impl MockEditor {
    pub fn applied_fields(&self) -> Vec<(EditorRef, EventFields)> {
        lock(&self.fields).clone()
    }

    pub fn properties(&self) -> Vec<(EditorRef, BTreeMap<String, Option<String>>)> {
        lock(&self.properties).clone()
    }

    pub fn cleanup_registrations(&self) -> Vec<String> {
        lock(&self.cleanups).clone()
    }

    pub fn fail_properties(&self, fail: bool) {
        *lock(&self.fail_properties) = fail;
    }

    pub fn fail_cleanup(&self, fail: bool) {
        *lock(&self.fail_cleanup) = fail;
    }
}

#[async_trait]
impl EditorPort for MockEditor {
    async fn apply_event_fields(&self, editor: &EditorRef, fields: &EventFields) -> SyncResult<()> {
        lock(&self.fields).push((editor.clone(), fields.clone()));
        Ok(())
    }

    async fn set_item_properties(
        &self,
        editor: &EditorRef,
        properties: &BTreeMap<String, Option<String>>,
    ) -> SyncResult<()> {
        if *lock(&self.fail_properties) {
            return Err(SyncError::Editor("property write refused".into()));
        }
        lock(&self.properties).push((editor.clone(), properties.clone()));
        Ok(())
    }

    async fn register_room_cleanup(&self, _editor: &EditorRef, token: &str) -> SyncResult<()> {
        if *lock(&self.fail_cleanup) {
            return Err(SyncError::Editor("cleanup registration refused".into()));
        }
        lock(&self.cleanups).push(token.to_string());
        Ok(())
    }
}

/// A fully wired engine over recording mocks and an in-memory store.
pub struct TestEngine {
    pub engine: SyncEngine,
    pub api: Arc<MockRoomApi>,
    pub calendar: Arc<MockCalendar>,
    pub editor: Arc<MockEditor>,
    pub store: Arc<MemoryStore>,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_directory(MockDirectory::with_contacts(&[(
            "alice@example.com",
            "alice",
        )]))
    }

    pub fn with_directory(directory: MockDirectory) -> Self {
        init_tracing();
        let api = Arc::new(MockRoomApi::default());
        let directory = Arc::new(directory);
        let calendar = Arc::new(MockCalendar::default());
        let editor = Arc::new(MockEditor::default());
        let store = Arc::new(MemoryStore::new());
        let engine = SyncEngine::new(
            AccountConfig::new("https://cloud.example.com", "alice"),
            api.clone(),
            directory,
            calendar.clone(),
            editor.clone(),
            store.clone(),
        );
        TestEngine {
            engine,
            api,
            calendar,
            editor,
            store,
        }
    }
}
