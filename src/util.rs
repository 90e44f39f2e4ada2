//! Small shared helpers: log redaction, wall-clock access, locking.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

/// Shorten a room token for log output; tokens are capability-like and must
/// not appear in full in logs.
pub(crate) fn short_token(token: &str) -> String {
    const KEEP_START: usize = 4;
    const KEEP_END: usize = 3;
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= KEEP_START + KEEP_END + 3 {
        return token.to_string();
    }
    let start: String = chars[..KEEP_START].iter().collect();
    let end: String = chars[chars.len() - KEEP_END..].iter().collect();
    format!("{start}...{end}")
}

/// Shorten an arbitrary identifier for log output.
pub(crate) fn short_id(value: &str) -> String {
    const MAX: usize = 12;
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= MAX {
        return value.to_string();
    }
    let head: String = chars[..MAX].iter().collect();
    format!("{head}...")
}

/// Current wall-clock time in milliseconds.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Lock a mutex, recovering from poisoning instead of propagating the panic.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Token-keyed in-flight marker preventing two concurrent runs of the same
/// idempotent workflow. Check-and-insert is atomic under one lock.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    tokens: Mutex<HashSet<String>>,
}

impl InFlight {
    pub(crate) fn try_acquire(&self, token: &str) -> bool {
        lock(&self.tokens).insert(token.to_string())
    }

    pub(crate) fn release(&self, token: &str) {
        lock(&self.tokens).remove(token);
    }
}
