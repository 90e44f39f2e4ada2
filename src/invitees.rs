//! Adds event attendees to a room as participants.
//!
//! Each attendee address is resolved against the server directory: a match
//! means an internal user (added by user id), no match means an external
//! guest (added by email). The two classes are controlled by independent
//! flags; an internal user is never downgraded to a guest when only guests
//! are enabled.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{info, warn};

use crate::ports::{Directory, ParticipantSource, RoomApi};
use crate::util::short_token;

/// Per-class counts of one invitee sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteeSummary {
    pub users_added: u32,
    pub users_failed: u32,
    pub guests_added: u32,
    pub guests_failed: u32,
    pub skipped: u32,
}

/// Add `attendees` to the room behind `token`. Individual participant
/// failures are counted, not escalated; a directory outage degrades every
/// attendee to the guest class.
pub async fn sync_invitees(
    api: &dyn RoomApi,
    directory: &dyn Directory,
    token: &str,
    attendees: &[String],
    add_users: bool,
    add_guests: bool,
) -> InviteeSummary {
    let mut summary = InviteeSummary::default();
    if attendees.is_empty() {
        return summary;
    }

    let user_ids: HashMap<String, String> = match directory.contacts().await {
        Ok(contacts) => contacts
            .into_iter()
            .map(|contact| (contact.email_lower, contact.id))
            .collect(),
        Err(err) => {
            warn!(token = %short_token(token), error = %err, "directory lookup failed, treating attendees as guests");
            HashMap::new()
        }
    };

    for attendee in attendees {
        match user_ids.get(&attendee.to_ascii_lowercase()) {
            Some(user_id) => {
                if !add_users {
                    summary.skipped += 1;
                    continue;
                }
                match api
                    .add_participant(token, user_id, ParticipantSource::Users)
                    .await
                {
                    Ok(()) => summary.users_added += 1,
                    Err(err) => {
                        summary.users_failed += 1;
                        warn!(token = %short_token(token), user = %user_id, error = %err, "adding user failed");
                    }
                }
            }
            None => {
                if !add_guests {
                    summary.skipped += 1;
                    continue;
                }
                match api
                    .add_participant(token, attendee, ParticipantSource::Emails)
                    .await
                {
                    Ok(()) => summary.guests_added += 1,
                    Err(err) => {
                        summary.guests_failed += 1;
                        warn!(token = %short_token(token), error = %err, "adding guest failed");
                    }
                }
            }
        }
    }

    info!(
        token = %short_token(token),
        users_added = summary.users_added,
        users_failed = summary.users_failed,
        guests_added = summary.guests_added,
        guests_failed = summary.guests_failed,
        skipped = summary.skipped,
        "invitee sync finished"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::RoomApiError;
    use crate::test_support::{MockDirectory, MockRoomApi};

    fn attendees(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn classifies_users_and_guests_via_the_directory() {
        let api = MockRoomApi::default();
        let directory = MockDirectory::with_contacts(&[("alice@example.com", "alice")]);

        let summary = sync_invitees(
            &api,
            &directory,
            "tok",
            &attendees(&["Alice@Example.com", "guest@elsewhere.org"]),
            true,
            true,
        )
        .await;

        assert_eq!(summary.users_added, 1);
        assert_eq!(summary.guests_added, 1);
        assert_eq!(
            api.participants(),
            vec![
                ("tok".to_string(), "alice".to_string(), ParticipantSource::Users),
                (
                    "tok".to_string(),
                    "guest@elsewhere.org".to_string(),
                    ParticipantSource::Emails
                ),
            ]
        );
    }

    #[tokio::test]
    async fn disabled_class_is_skipped_not_reclassified() {
        let api = MockRoomApi::default();
        let directory = MockDirectory::with_contacts(&[("alice@example.com", "alice")]);

        // Users disabled: the internal user is skipped even though guests
        // are enabled.
        let summary = sync_invitees(
            &api,
            &directory,
            "tok",
            &attendees(&["alice@example.com", "guest@elsewhere.org"]),
            false,
            true,
        )
        .await;

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.guests_added, 1);
        assert_eq!(api.participants().len(), 1);
    }

    #[tokio::test]
    async fn participant_failures_are_counted_not_escalated() {
        let api = MockRoomApi::default();
        api.fail_add_participant(RoomApiError::Transport("down".into()));
        let directory = MockDirectory::with_contacts(&[]);

        let summary = sync_invitees(
            &api,
            &directory,
            "tok",
            &attendees(&["guest@elsewhere.org"]),
            true,
            true,
        )
        .await;

        assert_eq!(summary.guests_failed, 1);
        assert_eq!(summary.guests_added, 0);
    }

    #[tokio::test]
    async fn directory_outage_degrades_to_guests() {
        let api = MockRoomApi::default();
        let directory = MockDirectory::failing();

        let summary = sync_invitees(
            &api,
            &directory,
            "tok",
            &attendees(&["alice@example.com"]),
            true,
            true,
        )
        .await;

        assert_eq!(summary.guests_added, 1);
        assert_eq!(summary.users_added, 0);
    }
}
