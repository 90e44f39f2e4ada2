//! Ownership transfer of a room to a delegate user.

use tracing::info;

use crate::cache::{RoomMetaCache, RoomMetaUpdate};
use crate::error::SyncResult;
use crate::ports::RoomApi;
use crate::util::short_token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegationOutcome {
    Completed,
    /// The delegate is the acting user; there is nothing to transfer.
    SameUser,
}

/// Transfer room ownership to `delegate_id` and record the completed
/// delegation in the room cache.
pub async fn delegate_room(
    api: &dyn RoomApi,
    rooms: &RoomMetaCache,
    current_user: &str,
    token: &str,
    delegate_id: &str,
    delegate_name: Option<&str>,
) -> SyncResult<DelegationOutcome> {
    let delegate = delegate_id.trim();
    if delegate.eq_ignore_ascii_case(current_user) {
        return Ok(DelegationOutcome::SameUser);
    }

    api.transfer_ownership(token, delegate).await?;
    rooms
        .update(
            token,
            RoomMetaUpdate {
                delegated: Some(true),
                delegate_id: Some(delegate.to_string()),
                // Name-less delegates are shown by id.
                delegate_name: Some(delegate_name.unwrap_or(delegate).to_string()),
                ..Default::default()
            },
        )
        .await;
    info!(token = %short_token(token), delegate, "room ownership transferred");
    Ok(DelegationOutcome::Completed)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ports::RoomApiError;
    use crate::store::MemoryStore;
    use crate::test_support::MockRoomApi;

    fn rooms() -> RoomMetaCache {
        RoomMetaCache::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn transfers_and_marks_the_room_delegated() {
        let api = MockRoomApi::default();
        let rooms = rooms();

        let outcome = delegate_room(&api, &rooms, "alice", "tok", "bob", Some("Bob B."))
            .await
            .unwrap();

        assert_eq!(outcome, DelegationOutcome::Completed);
        assert_eq!(api.transfers(), vec![("tok".to_string(), "bob".to_string())]);
        let meta = rooms.get("tok").unwrap();
        assert_eq!(meta.delegated, Some(true));
        assert_eq!(meta.delegate_id.as_deref(), Some("bob"));
        assert_eq!(meta.delegate_name.as_deref(), Some("Bob B."));
    }

    #[tokio::test]
    async fn nameless_delegate_is_recorded_under_the_id() {
        let api = MockRoomApi::default();
        let rooms = rooms();

        delegate_room(&api, &rooms, "alice", "tok", "bob", None)
            .await
            .unwrap();

        assert_eq!(rooms.get("tok").unwrap().delegate_name.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn same_user_is_a_skip_without_remote_calls() {
        let api = MockRoomApi::default();
        let rooms = rooms();

        let outcome = delegate_room(&api, &rooms, "alice", "tok", " Alice ", None)
            .await
            .unwrap();

        assert_eq!(outcome, DelegationOutcome::SameUser);
        assert!(api.transfers().is_empty());
        assert!(rooms.get("tok").is_none());
    }

    #[tokio::test]
    async fn transfer_failure_leaves_the_cache_untouched() {
        let api = MockRoomApi::default();
        api.fail_transfer(RoomApiError::Status {
            status: 500,
            message: "boom".into(),
        });
        let rooms = rooms();

        let result = delegate_room(&api, &rooms, "alice", "tok", "bob", None).await;
        assert!(result.is_err());
        assert!(rooms.get("tok").is_none());
    }
}
