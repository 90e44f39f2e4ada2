//! iCalendar content-line handling for the embedded payload format.

pub mod codec;
pub mod metadata;
pub mod patch;
pub mod time;

/// Marker opening the event block this system reads and writes.
pub const BEGIN_VEVENT: &str = "BEGIN:VEVENT";
/// Marker closing an event block.
pub const END_VEVENT: &str = "END:VEVENT";
