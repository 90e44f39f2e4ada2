//! Property patch engine: the single channel through which synchronization
//! state is persisted back into a payload.
//!
//! Only the first VEVENT block is touched. Updates are upserts keyed by
//! property name; a `None` value deletes the line. Lines outside the first
//! block, and properties nobody asked about, pass through in their original
//! order.

use std::collections::{BTreeMap, HashSet};

use crate::ics::codec::{escape_text, fold_line, parse_line, unescape_text, unfold};
use crate::ics::{BEGIN_VEVENT, END_VEVENT};

/// Result of applying a patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOutcome {
    pub payload: String,
    /// True iff the patched text differs from the input, comparing unescaped
    /// values so that re-encoding an unchanged value is not a change.
    pub changed: bool,
}

/// Apply a set of named-property upserts/deletions to the first event block.
///
/// Missing non-null properties are appended just before the block's end
/// marker. All emitted lines are re-folded at the standard limit.
pub fn apply_updates(payload: &str, updates: &BTreeMap<String, Option<String>>) -> PatchOutcome {
    if payload.is_empty() || updates.is_empty() {
        return PatchOutcome {
            payload: payload.to_string(),
            changed: false,
        };
    }
    let updates: BTreeMap<String, Option<String>> = updates
        .iter()
        .map(|(k, v)| (k.to_ascii_uppercase(), v.clone()))
        .collect();

    let unfolded = unfold(payload);
    let mut out: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut in_event = false;
    let mut event_index = 0u32;
    let mut changed = false;

    for line in unfolded.lines() {
        if line == BEGIN_VEVENT {
            in_event = true;
            event_index += 1;
            out.push(fold_line(line));
            continue;
        }
        if line == END_VEVENT && in_event && event_index == 1 {
            for (name, value) in &updates {
                if seen.contains(name.as_str()) {
                    continue;
                }
                if let Some(value) = value {
                    out.push(fold_line(&format!("{name}:{}", escape_text(value))));
                    changed = true;
                }
            }
            out.push(fold_line(line));
            in_event = false;
            continue;
        }
        if in_event && event_index == 1 {
            if let Some(parsed) = parse_line(line)
                && let Some(value) = updates.get(&parsed.name)
            {
                seen.insert(parsed.name.clone());
                let Some(desired) = value else {
                    // Requested deletion.
                    changed = true;
                    continue;
                };
                // Keep the original left side so parameters survive.
                let left = line.split_once(':').map_or(parsed.name.as_str(), |(l, _)| l);
                if unescape_text(&parsed.value) != *desired {
                    changed = true;
                }
                out.push(fold_line(&format!("{left}:{}", escape_text(desired))));
                continue;
            }
        }
        out.push(fold_line(line));
    }

    PatchOutcome {
        payload: out.join("\r\n"),
        changed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ics::metadata::extract;

    fn updates(pairs: &[(&str, Option<&str>)]) -> BTreeMap<String, Option<String>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect()
    }

    const PAYLOAD: &str = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nBEGIN:VEVENT\r\nUID:evt-1\r\nSUMMARY:Weekly sync\r\nDTSTART:20250101T090000Z\r\nEND:VEVENT\r\nEND:VCALENDAR";

    #[test]
    fn patch_then_extract_roundtrip() {
        let out = apply_updates(
            PAYLOAD,
            &updates(&[
                ("X-NCTALK-TOKEN", Some("abc123")),
                ("X-NCTALK-LOBBY", Some("TRUE")),
            ]),
        );
        assert!(out.changed);
        let meta = extract(&out.payload);
        assert_eq!(meta.token.as_deref(), Some("abc123"));
        assert_eq!(meta.lobby_enabled, Some(true));
        assert_eq!(meta.start_timestamp, Some(1735722000));
    }

    #[test]
    fn second_application_is_unchanged() {
        let ups = updates(&[("X-NCTALK-TOKEN", Some("abc123"))]);
        let first = apply_updates(PAYLOAD, &ups);
        assert!(first.changed);
        let second = apply_updates(&first.payload, &ups);
        assert!(!second.changed);
        assert_eq!(second.payload, first.payload);
    }

    #[test]
    fn null_value_deletes_the_line() {
        let with_token = apply_updates(PAYLOAD, &updates(&[("X-NCTALK-TOKEN", Some("abc123"))]));
        let removed = apply_updates(&with_token.payload, &updates(&[("X-NCTALK-TOKEN", None)]));
        assert!(removed.changed);
        assert!(extract(&removed.payload).token.is_none());
        // Deleting a property that is not there is a no-op.
        let again = apply_updates(&removed.payload, &updates(&[("X-NCTALK-TOKEN", None)]));
        assert!(!again.changed);
    }

    #[test]
    fn unrelated_lines_and_later_blocks_are_preserved() {
        let payload = "BEGIN:VCALENDAR\r\nBEGIN:VEVENT\r\nUID:first\r\nSUMMARY:Keep\\, me\r\nEND:VEVENT\r\nBEGIN:VEVENT\r\nUID:second\r\nSUMMARY:Untouched\r\nEND:VEVENT\r\nEND:VCALENDAR";
        let out = apply_updates(payload, &updates(&[("X-NCTALK-TOKEN", Some("tok"))]));
        assert!(out.changed);
        assert!(out.payload.contains("SUMMARY:Keep\\, me"));
        assert!(out.payload.contains("UID:second\r\nSUMMARY:Untouched"));
        // The token landed only in the first block.
        let first_end = out.payload.find("END:VEVENT").unwrap();
        assert!(out.payload[..first_end].contains("X-NCTALK-TOKEN:tok"));
        assert!(!out.payload[first_end..].contains("X-NCTALK-TOKEN"));
    }

    #[test]
    fn replacing_keeps_parameters() {
        let payload = "BEGIN:VEVENT\r\nDTSTART;TZID=Europe/Berlin:20250101T090000\r\nEND:VEVENT";
        let out = apply_updates(payload, &updates(&[("DTSTART", Some("20250102T090000"))]));
        assert!(out.changed);
        assert!(
            out.payload
                .contains("DTSTART;TZID=Europe/Berlin:20250102T090000")
        );
    }

    #[test]
    fn long_inserted_values_are_folded() {
        let long = "https://cloud.example.com/call/".to_string() + &"x".repeat(80);
        let out = apply_updates(PAYLOAD, &updates(&[("X-NCTALK-URL", Some(long.as_str()))]));
        assert!(out.payload.contains("\r\n "));
        assert_eq!(extract(&out.payload).url.as_deref(), Some(long.as_str()));
    }

    #[test]
    fn empty_update_map_is_identity() {
        let out = apply_updates(PAYLOAD, &BTreeMap::new());
        assert!(!out.changed);
        assert_eq!(out.payload, PAYLOAD);
    }
}
