//! Lifecycle synchronizer: keeps the remote room consistent with the event.
//!
//! `SyncEngine` is the context object everything hangs off: caches, in-flight
//! guards, the cleanup scheduler, the editor session registry, and the port
//! implementations. The host integration feeds it create/update/delete
//! notifications from the calendar; everything else follows from the
//! metadata embedded in the payload.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use talksync_core::ics::metadata::{PROP_DELEGATE_READY, PROP_DELEGATED, PROP_START};
use talksync_core::{apply_updates, extract, extract_attendees};

use crate::cache::{EventTokenCache, RoomMetaCache, RoomMetaUpdate};
use crate::cleanup::CleanupScheduler;
use crate::config::AccountConfig;
use crate::delegation::{DelegationOutcome, delegate_room};
use crate::error::SyncResult;
use crate::invitees::sync_invitees;
use crate::ports::{CalendarItem, CalendarPort, Directory, EditorPort, ItemKind, RoomApi};
use crate::session::SessionStore;
use crate::store::KeyValueStore;
use crate::util::{InFlight, short_id, short_token};

/// Result of one remote-affecting step. Skips are expected outcomes, not
/// errors; callers use the reason to tell "nothing to do" from "failed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome", content = "reason")]
pub enum Outcome {
    Applied,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    /// The lobby is switched off in the payload or the cached room state.
    LobbyDisabled,
    /// Delegation has completed and someone else owns the room now.
    DelegateMismatch,
    /// The delegate is the acting user.
    SameUser,
    /// The cached lobby state already matches.
    StartUnchanged,
    /// Another run for this token is still in flight.
    InFlight,
    NoAttendees,
    SyncDisabled,
}

pub struct SyncEngine {
    pub(crate) config: AccountConfig,
    pub(crate) api: Arc<dyn RoomApi>,
    pub(crate) directory: Arc<dyn Directory>,
    pub(crate) calendar: Arc<dyn CalendarPort>,
    pub(crate) editor: Arc<dyn EditorPort>,
    pub(crate) rooms: Arc<RoomMetaCache>,
    pub(crate) events: Arc<EventTokenCache>,
    pub(crate) cleanup: CleanupScheduler,
    pub(crate) sessions: SessionStore,
    invitee_guard: InFlight,
    delegation_guard: InFlight,
}

impl SyncEngine {
    pub fn new(
        config: AccountConfig,
        api: Arc<dyn RoomApi>,
        directory: Arc<dyn Directory>,
        calendar: Arc<dyn CalendarPort>,
        editor: Arc<dyn EditorPort>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let rooms = Arc::new(RoomMetaCache::new(store.clone()));
        let events = Arc::new(EventTokenCache::new(store));
        let cleanup = CleanupScheduler::new(api.clone(), rooms.clone(), events.clone());
        SyncEngine {
            config,
            api,
            directory,
            calendar,
            editor,
            rooms,
            events,
            cleanup,
            sessions: SessionStore::new(),
            invitee_guard: InFlight::default(),
            delegation_guard: InFlight::default(),
        }
    }

    /// Populate the caches from the persistent store. Call once at startup.
    pub async fn load(&self) {
        self.rooms.load().await;
        self.events.load().await;
    }

    pub fn cleanup(&self) -> &CleanupScheduler {
        &self.cleanup
    }

    /// Calendar item created or updated.
    pub async fn on_upsert(&self, item: &CalendarItem) -> SyncResult<()> {
        if item.kind != ItemKind::Event {
            return Ok(());
        }
        let meta = extract(&item.payload);
        let Some(token) = meta.token.clone() else {
            return Ok(());
        };
        debug!(
            token = %short_token(&token),
            item = %short_id(&item.id),
            "event upsert"
        );

        // The save proves the event (and its room) is real; either this or
        // the editor's own `persisted` signal cancels the pending delete.
        self.cleanup.cancel(&token, "calendar saved");

        self.events
            .set(
                &item.calendar_id,
                &item.id,
                &token,
                meta.url.as_deref().unwrap_or_default(),
            )
            .await;

        // Lobby/start push. Payload values win where present; the cached
        // room state fills the gaps, since the lobby may have been switched
        // off through `trackRoom` without the property ever reaching the
        // payload.
        if let Some(start) = meta.start_timestamp {
            let outcome = self
                .lobby_update_with(
                    &token,
                    start,
                    meta.lobby_enabled,
                    meta.delegate_id.as_deref(),
                    meta.delegated,
                )
                .await;
            match outcome {
                Ok(Outcome::Applied) => {}
                Ok(Outcome::Skipped(reason)) => {
                    debug!(token = %short_token(&token), reason = ?reason, "lobby update skipped")
                }
                Err(err) => {
                    warn!(token = %short_token(&token), error = %err, "lobby update failed")
                }
            }
        }

        // Merge everything the payload knows into the room cache.
        let cache_update = RoomMetaUpdate {
            lobby_enabled: meta.lobby_enabled,
            event_conversation: meta.event_conversation,
            start_timestamp: meta.start_timestamp,
            delegate_id: meta.delegate_id.clone(),
            // A delegate without a display name is shown by id.
            delegate_name: meta
                .delegate_name
                .clone()
                .or_else(|| meta.delegate_id.clone()),
            delegated: meta.delegated,
        };
        if !cache_update.is_empty() {
            self.rooms.update(&token, cache_update).await;
        }

        // Keep the override start in step with DTSTART so later edits read a
        // current value. Patches accumulate in `payload` so a later patch in
        // this run never clobbers an earlier one.
        let mut payload = item.payload.clone();
        if let Some(from_dt) = meta.start_from_dt
            && meta.start_prop.is_none_or(|prop| (prop - from_dt).abs() >= 1)
        {
            let mut updates = BTreeMap::new();
            updates.insert(PROP_START.to_string(), Some(from_dt.to_string()));
            let patched = apply_updates(&payload, &updates);
            if patched.changed {
                match self
                    .calendar
                    .update_item(&item.calendar_id, &item.id, &patched.payload)
                    .await
                {
                    Ok(()) => payload = patched.payload,
                    Err(err) => {
                        warn!(token = %short_token(&token), error = %err, "start write-back failed")
                    }
                }
            }
        }

        if meta.add_users == Some(true) || meta.add_guests == Some(true) {
            let outcome = self
                .run_invitee_sync(
                    &token,
                    &payload,
                    meta.add_users == Some(true),
                    meta.add_guests == Some(true),
                    meta.delegate_id.as_deref(),
                    meta.delegated,
                )
                .await;
            if let Outcome::Skipped(reason) = outcome {
                debug!(token = %short_token(&token), reason = ?reason, "invitee sync skipped");
            }
        }

        // Delegation gate: armed ready flag, or no ready flag at all (events
        // from before the flag existed). An explicit FALSE means "not yet".
        if let Some(delegate) = meta.delegate_id.as_deref()
            && meta.delegated != Some(true)
            && (meta.delegate_ready == Some(true) || !meta.delegate_ready_known)
        {
            let skipped = self
                .run_delegation(
                    item,
                    &payload,
                    &token,
                    delegate,
                    meta.delegate_name.as_deref(),
                )
                .await;
            if let Some(reason) = skipped {
                debug!(token = %short_token(&token), reason = ?reason, "delegation skipped");
            }
        }

        Ok(())
    }

    /// Calendar item deleted.
    pub async fn on_remove(&self, calendar_id: &str, item_id: &str) -> SyncResult<()> {
        let Some(entry) = self.events.get(calendar_id, item_id) else {
            return Ok(());
        };
        let token = entry.token;
        let cached = self.rooms.get(&token).unwrap_or_default();

        let delegated_away = cached.delegated == Some(true)
            && cached
                .delegate_id
                .as_deref()
                .is_some_and(|delegate| !self.is_current_user(delegate));
        if delegated_away {
            debug!(token = %short_token(&token), "room delegated away, keeping it");
        } else if let Err(err) = self.api.delete_room(&token).await {
            // A non-owner removing their own calendar copy is expected to be
            // refused; anything else is worth a warning.
            if err.is_forbidden() {
                debug!(token = %short_token(&token), "room deletion refused (not the owner)");
            } else {
                warn!(token = %short_token(&token), error = %err, "room deletion failed");
            }
        } else {
            info!(token = %short_token(&token), "room deleted with its event");
        }

        self.rooms.remove(&token).await;
        self.events.remove(calendar_id, item_id).await;
        Ok(())
    }

    /// Push a lobby/start update for a tracked room. `lobby_enabled` is the
    /// caller's view where it has one; cached room state fills anything the
    /// caller does not know.
    pub async fn apply_lobby_update(
        &self,
        token: &str,
        lobby_enabled: Option<bool>,
        start_timestamp: i64,
    ) -> SyncResult<Outcome> {
        self.lobby_update_with(token, start_timestamp, lobby_enabled, None, None)
            .await
    }

    async fn lobby_update_with(
        &self,
        token: &str,
        start_timestamp: i64,
        lobby_enabled: Option<bool>,
        delegate_id: Option<&str>,
        delegated: Option<bool>,
    ) -> SyncResult<Outcome> {
        let cached = self.rooms.get(token).unwrap_or_default();

        // A lobby switched off through either channel stays off.
        if lobby_enabled == Some(false) || cached.lobby_enabled == Some(false) {
            return Ok(Outcome::Skipped(SkipReason::LobbyDisabled));
        }

        // Once delegation has completed, the room belongs to the delegate.
        // Until then the original owner may still act.
        let delegate = delegate_id.or(cached.delegate_id.as_deref());
        let delegated = delegated == Some(true) || cached.delegated == Some(true);
        if delegated && delegate.is_some_and(|delegate| !self.is_current_user(delegate)) {
            return Ok(Outcome::Skipped(SkipReason::DelegateMismatch));
        }

        if cached.start_timestamp == Some(start_timestamp) {
            return Ok(Outcome::Skipped(SkipReason::StartUnchanged));
        }

        self.api.update_lobby(token, true, start_timestamp).await?;
        self.rooms
            .update(
                token,
                RoomMetaUpdate {
                    lobby_enabled: Some(true),
                    start_timestamp: Some(start_timestamp),
                    ..Default::default()
                },
            )
            .await;
        info!(
            token = %short_token(token),
            start = start_timestamp,
            "lobby updated"
        );
        Ok(Outcome::Applied)
    }

    async fn run_invitee_sync(
        &self,
        token: &str,
        payload: &str,
        add_users: bool,
        add_guests: bool,
        delegate_id: Option<&str>,
        delegated: Option<bool>,
    ) -> Outcome {
        if !add_users && !add_guests {
            return Outcome::Skipped(SkipReason::SyncDisabled);
        }
        if delegated == Some(true)
            && delegate_id.is_some_and(|delegate| !self.is_current_user(delegate))
        {
            return Outcome::Skipped(SkipReason::DelegateMismatch);
        }
        let attendees = extract_attendees(payload);
        if attendees.is_empty() {
            return Outcome::Skipped(SkipReason::NoAttendees);
        }
        if !self.invitee_guard.try_acquire(token) {
            return Outcome::Skipped(SkipReason::InFlight);
        }
        sync_invitees(
            self.api.as_ref(),
            self.directory.as_ref(),
            token,
            &attendees,
            add_users,
            add_guests,
        )
        .await;
        self.invitee_guard.release(token);
        Outcome::Applied
    }

    async fn run_delegation(
        &self,
        item: &CalendarItem,
        payload: &str,
        token: &str,
        delegate: &str,
        delegate_name: Option<&str>,
    ) -> Option<SkipReason> {
        if !self.delegation_guard.try_acquire(token) {
            return Some(SkipReason::InFlight);
        }
        let result = delegate_room(
            self.api.as_ref(),
            self.rooms.as_ref(),
            &self.config.user_id_normalized(),
            token,
            delegate,
            delegate_name,
        )
        .await;
        self.delegation_guard.release(token);

        match result {
            Ok(DelegationOutcome::Completed) => {
                // Record completion in the payload and disarm the ready flag
                // so the next upsert does not delegate again.
                let mut updates = BTreeMap::new();
                updates.insert(PROP_DELEGATED.to_string(), Some("TRUE".to_string()));
                updates.insert(PROP_DELEGATE_READY.to_string(), None);
                let patched = apply_updates(payload, &updates);
                if patched.changed
                    && let Err(err) = self
                        .calendar
                        .update_item(&item.calendar_id, &item.id, &patched.payload)
                        .await
                {
                    warn!(token = %short_token(token), error = %err, "delegation write-back failed");
                }
                None
            }
            Ok(DelegationOutcome::SameUser) => Some(SkipReason::SameUser),
            Err(err) => {
                warn!(token = %short_token(token), error = %err, "delegation failed");
                None
            }
        }
    }

    pub(crate) fn is_current_user(&self, user: &str) -> bool {
        user.trim()
            .eq_ignore_ascii_case(&self.config.user_id_normalized())
    }
}
