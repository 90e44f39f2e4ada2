//! Payload layer for the talksync engine.
//!
//! Calendar editors give us an event only as serialized iCalendar text, so
//! every piece of room-sync state lives inside custom `X-NCTALK-*` properties
//! of that text. This crate holds the pure functions that read and rewrite
//! those properties without disturbing the rest of the payload:
//! - `ics::codec` for content-line primitives (unfold/fold/parse/escape)
//! - `ics::patch` for in-place property upserts and deletions
//! - `ics::time` for DATE/DATE-TIME and truthy-string parsing
//! - `ics::metadata` for the structured metadata record

pub mod ics;

pub use ics::metadata::{EventMetadata, EventSnapshot, event_snapshot, extract, extract_attendees};
pub use ics::patch::{PatchOutcome, apply_updates};
