//! DATE / DATE-TIME resolution and tolerant property-value parsing.
//!
//! All truthy-string parsing in the workspace lives here; other modules must
//! not re-implement it.

use chrono::{LocalResult, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;

/// Parse an iCalendar DATE (`YYYYMMDD`) or DATE-TIME (`YYYYMMDDTHHMMSS[Z]`)
/// into unix seconds.
///
/// A trailing `Z` or a `tzid` of `UTC` is UTC. A named timezone resolves the
/// offset for that specific date (DST-aware); an unknown timezone id degrades
/// to a UTC interpretation rather than failing. Without any timezone the
/// value is interpreted in the local zone of the running process. Malformed
/// values yield `None`, never a panic.
pub fn parse_date_time(raw: &str, tzid: Option<&str>) -> Option<i64> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }
    let (naive, has_z) = parse_naive(value)?;

    let tzid = tzid.map(str::trim).filter(|t| !t.is_empty());
    if has_z || tzid.is_some_and(|t| t.eq_ignore_ascii_case("UTC")) {
        return Some(naive.and_utc().timestamp());
    }
    if let Some(tzid) = tzid {
        return match tzid.parse::<Tz>() {
            Ok(tz) => Some(resolve_local(tz.from_local_datetime(&naive), &naive)),
            // Offset lookup failed; fall back to the naive UTC reading.
            Err(_) => Some(naive.and_utc().timestamp()),
        };
    }
    Some(resolve_local(
        chrono::Local.from_local_datetime(&naive),
        &naive,
    ))
}

fn parse_naive(value: &str) -> Option<(NaiveDateTime, bool)> {
    let is_date_only = value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit());
    if is_date_only {
        let date = parse_date(value)?;
        return Some((date.and_hms_opt(0, 0, 0)?, false));
    }
    let has_z = value.ends_with('Z');
    let body = value.strip_suffix('Z').unwrap_or(value);
    if body.len() != 15 || body.as_bytes()[8] != b'T' {
        return None;
    }
    let (date_part, time_part) = (&body[..8], &body[9..]);
    if !time_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let date = parse_date(date_part)?;
    let hour: u32 = time_part[..2].parse().ok()?;
    let minute: u32 = time_part[2..4].parse().ok()?;
    let second: u32 = time_part[4..6].parse().ok()?;
    Some((date.and_hms_opt(hour, minute, second)?, has_z))
}

fn parse_date(digits: &str) -> Option<NaiveDate> {
    if digits.len() != 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: i32 = digits[..4].parse().ok()?;
    let month: u32 = digits[4..6].parse().ok()?;
    let day: u32 = digits[6..8].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn resolve_local<T: TimeZone>(result: LocalResult<chrono::DateTime<T>>, naive: &NaiveDateTime) -> i64 {
    match result {
        LocalResult::Single(dt) => dt.timestamp(),
        // Fall-back transition: take the earlier reading.
        LocalResult::Ambiguous(earliest, _) => earliest.timestamp(),
        // Spring-forward gap: the wall time does not exist; keep the naive
        // UTC reading so callers still get a usable instant.
        LocalResult::None => naive.and_utc().timestamp(),
    }
}

/// Parse a boolean-like property value: `true`/`1`/`yes` and
/// `false`/`0`/`no`, case-insensitive. Anything else is `None`, never a
/// guessed default.
pub fn parse_boolean_property(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Parse an integer-like property value; tolerates surrounding whitespace.
pub fn parse_integer_property(value: &str) -> Option<i64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<i64>().ok()
}
