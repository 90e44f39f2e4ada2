//! Content-line primitives: unfolding, folding, line parsing and TEXT
//! escaping per the embedded format's rules.
//!
//! These are pure functions; everything else in the payload layer is built on
//! top of them. Folding is a character-count approximation of the 75-octet
//! rule, which is what the round-trip tests expect.

use std::collections::HashMap;

/// Default fold limit for emitted content lines.
pub const FOLD_LIMIT: usize = 75;

/// A parsed content line: `NAME;PARAM=VAL:value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentLine {
    pub name: String,
    pub params: HashMap<String, String>,
    pub value: String,
}

/// Collapse folded lines: a line break immediately followed by a space or tab
/// is removed.
pub fn unfold(text: &str) -> String {
    text.replace("\r\n ", "")
        .replace("\r\n\t", "")
        .replace("\n ", "")
        .replace("\n\t", "")
}

/// Split a content line into name, parameters and raw value.
///
/// Returns `None` for lines without a colon or without a property name. Names
/// and parameter keys are uppercased; the value is left as-is (still escaped).
pub fn parse_line(line: &str) -> Option<ContentLine> {
    let (left, value) = line.split_once(':')?;
    let mut parts = left.split(';');
    let name = parts.next()?;
    if name.is_empty() {
        return None;
    }
    let mut params = HashMap::new();
    for part in parts {
        if let Some((key, val)) = part.split_once('=')
            && !key.is_empty()
            && !val.is_empty()
        {
            params.insert(key.to_ascii_uppercase(), val.to_string());
        }
    }
    Some(ContentLine {
        name: name.to_ascii_uppercase(),
        params,
        value: value.to_string(),
    })
}

/// Undo TEXT escaping: `\\`, `\n`/`\N`, `\,` and `\;`.
pub fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(',') => out.push(','),
            Some(';') => out.push(';'),
            Some(other) => {
                // Unknown escape, keep it verbatim.
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Apply TEXT escaping for writing: backslash, line breaks, comma, semicolon.
pub fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => {
                // CRLF collapses to a single escaped newline.
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str("\\n");
            }
            '\n' => out.push_str("\\n"),
            ',' => out.push_str("\\,"),
            ';' => out.push_str("\\;"),
            other => out.push(other),
        }
    }
    out
}

/// Fold a content line at the default limit.
pub fn fold_line(line: &str) -> String {
    fold_line_at(line, FOLD_LIMIT)
}

/// Fold a content line by inserting `CRLF` + one leading space at fixed
/// character intervals. Continuation chunks are one character shorter to make
/// room for the leading space.
pub fn fold_line_at(line: &str, limit: usize) -> String {
    let limit = limit.max(2);
    let chars: Vec<char> = line.chars().collect();
    if chars.len() <= limit {
        return line.to_string();
    }
    let cont = limit - 1;
    let mut out = String::with_capacity(line.len() + 3 * (chars.len() / cont + 1));
    out.extend(&chars[..limit]);
    let mut pos = limit;
    while pos < chars.len() {
        out.push_str("\r\n ");
        let end = (pos + cont).min(chars.len());
        out.extend(&chars[pos..end]);
        pos = end;
    }
    out
}
