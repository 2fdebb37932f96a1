//! Shared text utilities for provider parsing.
//!
//! HTML scrapers in this crate work on raw markup with string markers, so the
//! extracted fragments still contain tags, entities, and control characters.
//! Everything funnels through [`normalize_text`] before it reaches a result.

use chrono::{DateTime, Utc};

// Decoded last-to-first so `&amp;lt;` comes out as `&lt;`, not `<`.
const ENTITY_TABLE: &[(&str, &str)] = &[
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&#39;", "'"),
    ("&apos;", "'"),
    ("&nbsp;", " "),
    ("&amp;", "&"),
];

/// Drop every `<...>` tag from a markup fragment, then decode the handful of
/// entities the engines actually emit.  Text after an unterminated tag is
/// discarded with the tag.
pub fn strip_html_tags(input: &str) -> String {
    let mut kept = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(open) = rest.find('<') {
        kept.push_str(&rest[..open]);
        match rest[open..].find('>') {
            Some(close) => rest = &rest[open + close + 1..],
            None => {
                rest = "";
                break;
            }
        }
    }
    kept.push_str(rest);

    let mut decoded = kept;
    for (entity, replacement) in ENTITY_TABLE {
        if decoded.contains(entity) {
            decoded = decoded.replace(entity, replacement);
        }
    }
    decoded
}

/// Strip tags, decode entities, drop control characters, collapse whitespace.
pub fn normalize_text(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }
    let stripped = strip_html_tags(raw);
    let cleaned: String = stripped.chars().filter(|ch| !ch.is_control()).collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Undo percent-encoding byte-wise (so multi-byte UTF-8 sequences survive),
/// mapping `+` to a space.  Malformed escapes pass through unchanged.
pub fn url_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut decoded: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut at = 0;
    while at < bytes.len() {
        match bytes[at] {
            b'+' => {
                decoded.push(b' ');
                at += 1;
            }
            b'%' => {
                if at + 2 < bytes.len()
                    && let Some(byte) = hex_pair(bytes[at + 1], bytes[at + 2])
                {
                    decoded.push(byte);
                    at += 3;
                } else {
                    decoded.push(b'%');
                    at += 1;
                }
            }
            other => {
                decoded.push(other);
                at += 1;
            }
        }
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

fn hex_pair(high: u8, low: u8) -> Option<u8> {
    let high = (high as char).to_digit(16)?;
    let low = (low as char).to_digit(16)?;
    Some((high * 16 + low) as u8)
}

/// Percent-decode a URL and re-join spaces with `+`, the form most engines
/// accept back.  Empty input stays empty.
pub fn normalize_url(url: &str) -> String {
    if url.is_empty() {
        return String::new();
    }
    url_decode(url).replace(' ', "+")
}

/// Normalize a unix timestamp to ISO-8601.  Strings pass through unchanged.
pub fn normalize_date_from_unix(unix: i64) -> String {
    DateTime::<Utc>::from_timestamp(unix, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

/// Extract the text between `marker` and `end` in `haystack`, starting the
/// scan at the first occurrence of `marker`.  Returns `None` when either
/// bound is missing.
pub fn between<'a>(haystack: &'a str, marker: &str, end: &str) -> Option<&'a str> {
    let start = haystack.find(marker)? + marker.len();
    let rest = &haystack[start..];
    let stop = rest.find(end)?;
    Some(&rest[..stop])
}

/// Collect every occurrence of the text between `marker` and `end`.
pub fn between_all<'a>(haystack: &'a str, marker: &str, end: &str) -> Vec<&'a str> {
    let mut out = Vec::new();
    let mut rest = haystack;
    while let Some(pos) = rest.find(marker) {
        let after = &rest[pos + marker.len()..];
        match after.find(end) {
            Some(stop) => {
                out.push(&after[..stop]);
                rest = &after[stop + end.len()..];
            }
            None => break,
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
