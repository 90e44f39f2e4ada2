//! Structured room metadata extracted from an event payload.
//!
//! The editor offers no per-event storage API, so everything the engine needs
//! to know about a room is smuggled into `X-NCTALK-*` properties of the first
//! VEVENT block. This module turns a raw payload into the typed record the
//! synchronizer works with.

use std::collections::HashMap;

use serde::Serialize;

use crate::ics::codec::{parse_line, unescape_text, unfold};
use crate::ics::time::{parse_boolean_property, parse_date_time, parse_integer_property};
use crate::ics::{BEGIN_VEVENT, END_VEVENT};

pub const PROP_TOKEN: &str = "X-NCTALK-TOKEN";
pub const PROP_URL: &str = "X-NCTALK-URL";
pub const PROP_LOBBY: &str = "X-NCTALK-LOBBY";
pub const PROP_START: &str = "X-NCTALK-START";
pub const PROP_EVENT: &str = "X-NCTALK-EVENT";
pub const PROP_OBJECT_ID: &str = "X-NCTALK-OBJECTID";
pub const PROP_ADD_USERS: &str = "X-NCTALK-ADD-USERS";
pub const PROP_ADD_GUESTS: &str = "X-NCTALK-ADD-GUESTS";
/// Legacy combined flag, written by versions that predate the split
/// users/guests flags. Read when neither split flag is present.
pub const PROP_ADD_PARTICIPANTS: &str = "X-NCTALK-ADD-PARTICIPANTS";
pub const PROP_DELEGATE: &str = "X-NCTALK-DELEGATE";
pub const PROP_DELEGATE_NAME: &str = "X-NCTALK-DELEGATE-NAME";
pub const PROP_DELEGATED: &str = "X-NCTALK-DELEGATED";
pub const PROP_DELEGATE_READY: &str = "X-NCTALK-DELEGATE-READY";

/// Placeholder base used when a payload carries a token but no URL.
const FALLBACK_CALL_BASE: &str = "https://nextcloud.local/call/";

/// Room metadata as read from one payload. Tri-state booleans are `None` when
/// the property is absent or unparseable.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    pub token: Option<String>,
    pub url: Option<String>,
    pub title: String,
    pub lobby_enabled: Option<bool>,
    /// Override start written by the engine (unix seconds).
    pub start_prop: Option<i64>,
    /// Start derived from DTSTART.
    pub start_from_dt: Option<i64>,
    /// Effective start: override wins over the date-derived value.
    pub start_timestamp: Option<i64>,
    pub end_timestamp: Option<i64>,
    pub event_conversation: Option<bool>,
    pub object_id: Option<String>,
    pub add_users: Option<bool>,
    pub add_guests: Option<bool>,
    pub delegate_id: Option<String>,
    pub delegate_name: Option<String>,
    pub delegated: Option<bool>,
    pub delegate_ready: Option<bool>,
    /// Whether the ready property was present at all. Events created before
    /// the property existed must be told apart from an explicit FALSE.
    pub delegate_ready_known: bool,
}

/// What the editor dialog shows about the event itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSnapshot {
    pub title: String,
    pub location: String,
    pub description: String,
    pub start_timestamp: Option<i64>,
    pub end_timestamp: Option<i64>,
}

/// A DTSTART/DTEND value with its optional TZID parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DtValue {
    pub value: String,
    pub tzid: Option<String>,
}

/// Unescaped property map plus start/end fields of the first VEVENT.
#[derive(Debug, Default)]
pub struct EventData {
    pub props: HashMap<String, String>,
    pub dt_start: Option<DtValue>,
    pub dt_end: Option<DtValue>,
}

/// Read the first VEVENT block into an unescaped property map. Repeated
/// properties keep the last value; lines without a colon are skipped.
pub fn parse_event_data(payload: &str) -> EventData {
    let mut data = EventData::default();
    if payload.is_empty() {
        return data;
    }
    let unfolded = unfold(payload);
    let mut in_event = false;
    for line in unfolded.lines() {
        if line.is_empty() {
            continue;
        }
        if line == BEGIN_VEVENT {
            in_event = true;
            continue;
        }
        if line == END_VEVENT {
            if in_event {
                break;
            }
            continue;
        }
        if !in_event {
            continue;
        }
        let Some(parsed) = parse_line(line) else {
            continue;
        };
        match parsed.name.as_str() {
            "DTSTART" => {
                data.dt_start = Some(DtValue {
                    value: parsed.value.clone(),
                    tzid: parsed.params.get("TZID").cloned(),
                });
            }
            "DTEND" => {
                data.dt_end = Some(DtValue {
                    value: parsed.value.clone(),
                    tzid: parsed.params.get("TZID").cloned(),
                });
            }
            _ => {}
        }
        data.props.insert(parsed.name, unescape_text(&parsed.value));
    }
    data
}

/// Build the room metadata record for a payload.
pub fn extract(payload: &str) -> EventMetadata {
    let data = parse_event_data(payload);
    let props = &data.props;

    let link = resolve_room_link(props);
    let start_prop = props.get(PROP_START).and_then(|v| parse_integer_property(v));
    let start_from_dt = data
        .dt_start
        .as_ref()
        .and_then(|dt| parse_date_time(&dt.value, dt.tzid.as_deref()));
    let end_timestamp = data
        .dt_end
        .as_ref()
        .and_then(|dt| parse_date_time(&dt.value, dt.tzid.as_deref()));

    let has_add_users = props.contains_key(PROP_ADD_USERS);
    let has_add_guests = props.contains_key(PROP_ADD_GUESTS);
    let mut add_users = props.get(PROP_ADD_USERS).and_then(|v| parse_boolean_property(v));
    let mut add_guests = props
        .get(PROP_ADD_GUESTS)
        .and_then(|v| parse_boolean_property(v));
    if !has_add_users && !has_add_guests {
        let legacy = props
            .get(PROP_ADD_PARTICIPANTS)
            .and_then(|v| parse_boolean_property(v));
        if legacy.is_some() {
            add_users = legacy;
            add_guests = legacy;
        }
    }

    EventMetadata {
        token: link.as_ref().map(|l| l.token.clone()),
        url: link.map(|l| l.url),
        title: props.get("SUMMARY").cloned().unwrap_or_default(),
        lobby_enabled: props.get(PROP_LOBBY).and_then(|v| parse_boolean_property(v)),
        start_prop,
        start_from_dt,
        start_timestamp: start_prop.or(start_from_dt),
        end_timestamp,
        event_conversation: props
            .get(PROP_EVENT)
            .map(|v| v.trim().eq_ignore_ascii_case("event")),
        object_id: props.get(PROP_OBJECT_ID).filter(|v| !v.is_empty()).cloned(),
        add_users,
        add_guests,
        delegate_id: props.get(PROP_DELEGATE).filter(|v| !v.is_empty()).cloned(),
        delegate_name: props
            .get(PROP_DELEGATE_NAME)
            .filter(|v| !v.is_empty())
            .cloned(),
        delegated: props
            .get(PROP_DELEGATED)
            .and_then(|v| parse_boolean_property(v)),
        delegate_ready: props
            .get(PROP_DELEGATE_READY)
            .and_then(|v| parse_boolean_property(v)),
        delegate_ready_known: props.contains_key(PROP_DELEGATE_READY),
    }
}

/// Build the editor-facing snapshot of the event fields.
pub fn event_snapshot(payload: &str) -> EventSnapshot {
    let data = parse_event_data(payload);
    EventSnapshot {
        title: data.props.get("SUMMARY").cloned().unwrap_or_default(),
        location: data.props.get("LOCATION").cloned().unwrap_or_default(),
        description: data.props.get("DESCRIPTION").cloned().unwrap_or_default(),
        start_timestamp: data
            .dt_start
            .as_ref()
            .and_then(|dt| parse_date_time(&dt.value, dt.tzid.as_deref())),
        end_timestamp: data
            .dt_end
            .as_ref()
            .and_then(|dt| parse_date_time(&dt.value, dt.tzid.as_deref())),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RoomLink {
    url: String,
    token: String,
}

/// Prefer the explicit token property; otherwise scan the free-text fields
/// for a room join link. Rooms created directly against the remote API are
/// only linked via such a URL.
fn resolve_room_link(props: &HashMap<String, String>) -> Option<RoomLink> {
    if let Some(token) = props.get(PROP_TOKEN).filter(|t| !t.is_empty()) {
        let url = props
            .get(PROP_URL)
            .filter(|u| !u.is_empty())
            .cloned()
            .unwrap_or_else(|| format!("{FALLBACK_CALL_BASE}{token}"));
        return Some(RoomLink {
            url,
            token: token.clone(),
        });
    }
    for field in ["LOCATION", "DESCRIPTION", "URL", "SUMMARY"] {
        if let Some(text) = props.get(field)
            && let Some(link) = scan_room_link(text)
        {
            return Some(link);
        }
    }
    None
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Find the first `http(s)://…/call/<token>` link in free text.
fn scan_room_link(text: &str) -> Option<RoomLink> {
    for (idx, _) in text.match_indices("/call/") {
        let before = &text[..idx];
        let scheme_start = match (before.rfind("https://"), before.rfind("http://")) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let Some(start) = scheme_start else {
            continue;
        };
        // The link must be one uninterrupted run of URL characters.
        if text[start..idx]
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '<' | '>'))
        {
            continue;
        }
        let token_start = idx + "/call/".len();
        let token_end = text[token_start..]
            .char_indices()
            .find(|(_, c)| !is_token_char(*c))
            .map_or(text.len(), |(i, _)| token_start + i);
        if token_end == token_start {
            continue;
        }
        return Some(RoomLink {
            url: text[start..token_end].to_string(),
            token: text[token_start..token_end].to_string(),
        });
    }
    None
}

/// Extract an email address from a calendar address value (`mailto:` prefix
/// and surrounding angle brackets stripped).
fn email_from_cal_address(value: &str) -> Option<String> {
    let mut cleaned = unescape_text(value).trim().to_string();
    if cleaned.is_empty() {
        return None;
    }
    if cleaned.to_ascii_lowercase().starts_with("mailto:") {
        cleaned = cleaned["mailto:".len()..].trim().to_string();
    }
    let cleaned = cleaned.trim_matches(|c| c == '<' || c == '>');
    let candidate: String = cleaned
        .chars()
        .skip_while(|c| c.is_whitespace() || matches!(c, '<' | '>' | '"'))
        .take_while(|c| !c.is_whitespace() && !matches!(c, '<' | '>' | '"'))
        .collect();
    if candidate.contains('@') && !candidate.starts_with('@') && !candidate.ends_with('@') {
        Some(candidate)
    } else {
        None
    }
}

/// Attendee addresses of the first VEVENT, deduplicated case-insensitively
/// while keeping the first-seen casing.
pub fn extract_attendees(payload: &str) -> Vec<String> {
    if payload.is_empty() {
        return Vec::new();
    }
    let unfolded = unfold(payload);
    let mut in_event = false;
    let mut seen_keys = Vec::new();
    let mut out = Vec::new();
    for line in unfolded.lines() {
        if line == BEGIN_VEVENT {
            in_event = true;
            continue;
        }
        if line == END_VEVENT {
            if in_event {
                break;
            }
            continue;
        }
        if !in_event {
            continue;
        }
        let Some(parsed) = parse_line(line) else {
            continue;
        };
        if parsed.name != "ATTENDEE" {
            continue;
        }
        let email = email_from_cal_address(&parsed.value)
            .or_else(|| parsed.params.get("EMAIL").and_then(|v| email_from_cal_address(v)));
        let Some(email) = email else {
            continue;
        };
        let key = email.to_ascii_lowercase();
        if !seen_keys.contains(&key) {
            seen_keys.push(key);
            out.push(email);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nBEGIN:VEVENT\r\nUID:evt-1\r\nSUMMARY:Planning\r\nDTSTART;TZID=Europe/Berlin:20250115T090000\r\nDTEND;TZID=Europe/Berlin:20250115T100000\r\nX-NCTALK-TOKEN:abc123\r\nX-NCTALK-URL:https://cloud.example.com/call/abc123\r\nX-NCTALK-LOBBY:TRUE\r\nX-NCTALK-START:1736928000\r\nX-NCTALK-EVENT:event\r\nX-NCTALK-DELEGATE:alice\r\nX-NCTALK-DELEGATE-NAME:Alice A.\r\nX-NCTALK-DELEGATE-READY:FALSE\r\nEND:VEVENT\r\nEND:VCALENDAR";

    #[test]
    fn extracts_the_field_table() {
        let meta = extract(PAYLOAD);
        assert_eq!(meta.token.as_deref(), Some("abc123"));
        assert_eq!(
            meta.url.as_deref(),
            Some("https://cloud.example.com/call/abc123")
        );
        assert_eq!(meta.title, "Planning");
        assert_eq!(meta.lobby_enabled, Some(true));
        assert_eq!(meta.start_prop, Some(1736928000));
        assert_eq!(meta.start_from_dt, Some(1736928000));
        assert_eq!(meta.event_conversation, Some(true));
        assert_eq!(meta.delegate_id.as_deref(), Some("alice"));
        assert_eq!(meta.delegate_name.as_deref(), Some("Alice A."));
        assert_eq!(meta.delegate_ready, Some(false));
        assert!(meta.delegate_ready_known);
        assert_eq!(meta.delegated, None);
    }

    #[test]
    fn override_start_wins_over_dtstart() {
        let payload = PAYLOAD.replace("X-NCTALK-START:1736928000", "X-NCTALK-START:1700000000");
        let meta = extract(&payload);
        assert_eq!(meta.start_timestamp, Some(1700000000));
        assert_eq!(meta.start_from_dt, Some(1736928000));
    }

    #[test]
    fn link_fallback_from_location_text() {
        let payload = "BEGIN:VEVENT\r\nSUMMARY:Call\r\nLOCATION:join us at https://cloud.example.com/call/ze77irq5 please\r\nEND:VEVENT";
        let meta = extract(payload);
        assert_eq!(meta.token.as_deref(), Some("ze77irq5"));
        assert_eq!(
            meta.url.as_deref(),
            Some("https://cloud.example.com/call/ze77irq5")
        );
    }

    #[test]
    fn token_without_url_gets_a_derived_url() {
        let payload = "BEGIN:VEVENT\r\nX-NCTALK-TOKEN:tok42\r\nEND:VEVENT";
        let meta = extract(payload);
        assert_eq!(meta.url.as_deref(), Some("https://nextcloud.local/call/tok42"));
    }

    #[test]
    fn missing_ready_flag_is_unknown_not_false() {
        let payload = "BEGIN:VEVENT\r\nX-NCTALK-TOKEN:t\r\nX-NCTALK-DELEGATE:bob\r\nEND:VEVENT";
        let meta = extract(payload);
        assert_eq!(meta.delegate_ready, None);
        assert!(!meta.delegate_ready_known);
    }

    #[test]
    fn legacy_add_participants_populates_both_flags() {
        let payload =
            "BEGIN:VEVENT\r\nX-NCTALK-TOKEN:t\r\nX-NCTALK-ADD-PARTICIPANTS:TRUE\r\nEND:VEVENT";
        let meta = extract(payload);
        assert_eq!(meta.add_users, Some(true));
        assert_eq!(meta.add_guests, Some(true));

        // A split flag disables the legacy fallback even when unparseable.
        let split = "BEGIN:VEVENT\r\nX-NCTALK-ADD-USERS:TRUE\r\nX-NCTALK-ADD-PARTICIPANTS:TRUE\r\nEND:VEVENT";
        let meta = extract(split);
        assert_eq!(meta.add_users, Some(true));
        assert_eq!(meta.add_guests, None);
    }

    #[test]
    fn only_the_first_event_block_is_read() {
        let payload = "BEGIN:VEVENT\r\nSUMMARY:First\r\nEND:VEVENT\r\nBEGIN:VEVENT\r\nX-NCTALK-TOKEN:second\r\nEND:VEVENT";
        let meta = extract(payload);
        assert!(meta.token.is_none());
        assert_eq!(meta.title, "First");
    }

    #[test]
    fn snapshot_unescapes_text_fields() {
        let payload = "BEGIN:VEVENT\r\nSUMMARY:A\\, B\r\nLOCATION:Room 1\r\nDESCRIPTION:line1\\nline2\r\nDTSTART:20250101T090000Z\r\nEND:VEVENT";
        let snap = event_snapshot(payload);
        assert_eq!(snap.title, "A, B");
        assert_eq!(snap.location, "Room 1");
        assert_eq!(snap.description, "line1\nline2");
        assert_eq!(snap.start_timestamp, Some(1735722000));
    }

    #[test]
    fn attendees_are_deduplicated_case_insensitively() {
        let payload = "BEGIN:VEVENT\r\nATTENDEE;CN=Alice:mailto:Alice@example.com\r\nATTENDEE:mailto:alice@example.com\r\nATTENDEE;EMAIL=bob@example.com:/principals/bob\r\nATTENDEE:mailto:\r\nEND:VEVENT";
        let attendees = extract_attendees(payload);
        assert_eq!(attendees, vec!["Alice@example.com", "bob@example.com"]);
    }

    #[test]
    fn folded_properties_are_read() {
        let payload = "BEGIN:VEVENT\r\nX-NCTALK-URL:https://cloud.example.com/call/abcde\r\n fghij\r\nX-NCTALK-TOKEN:abcdefghij\r\nEND:VEVENT";
        let meta = extract(payload);
        assert_eq!(
            meta.url.as_deref(),
            Some("https://cloud.example.com/call/abcdefghij")
        );
    }
}
