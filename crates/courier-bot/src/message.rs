//! Canonical inbound message types and mention handling.
//!
//! Transport parsers in [`crate::ingest`] produce [`IncomingMessage`] values;
//! everything downstream is transport-agnostic except where the router
//! explicitly branches on [`Transport`].

use serde_json::Value;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The messaging transport a message arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Signal,
    WhatsApp,
    Telegram,
}

impl Transport {
    pub fn as_str(self) -> &'static str {
        match self {
            Transport::Signal => "signal",
            Transport::WhatsApp => "whatsapp",
            Transport::Telegram => "telegram",
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user tag inside message text: byte span plus at least one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionSpan {
    /// Byte offset of the span start within the message text.
    pub start: usize,
    /// Byte length of the span.  Always greater than zero.
    pub length: usize,
    /// Phone number of the mentioned account, when known.
    pub number: Option<String>,
    /// Stable account id (uuid/aci), when known.
    pub uuid: Option<String>,
}

/// Where a reply should go: a direct peer, a group, or both (group message
/// where the sender is kept for DM fallback).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Target {
    pub recipient: Option<String>,
    pub group_id: Option<String>,
}

impl Target {
    pub fn direct(recipient: impl Into<String>) -> Self {
        Self {
            recipient: Some(recipient.into()),
            group_id: None,
        }
    }

    pub fn group(recipient: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            recipient: Some(recipient.into()),
            group_id: Some(group_id.into()),
        }
    }
}

/// A normalized inbound message.  Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub sender: String,
    pub text: String,
    pub timestamp: i64,
    pub target: Target,
    pub transport: Transport,
    pub mentions: Vec<MentionSpan>,
    /// True when transport metadata already marks the bot as addressee
    /// (Telegram mention entities or reply-to-bot).
    pub directed_to_bot: bool,
}

impl IncomingMessage {
    /// Conversation scope key: `group:<gid>` or `dm:<sender>`.
    pub fn conversation_key(&self) -> String {
        match &self.target.group_id {
            Some(group_id) => format!("group:{group_id}"),
            None => format!("dm:{}", self.sender),
        }
    }
}

/// Cache key for webhook-level deduplication.
pub fn dedupe_key(message: &IncomingMessage) -> String {
    format!(
        "{}|{}|{}",
        message.sender,
        message.timestamp,
        message.text.trim()
    )
}

// ---------------------------------------------------------------------------
// Mention handling
// ---------------------------------------------------------------------------

/// True when any mention span targets the bot's number or stable id.
pub fn metadata_mentions_bot(
    message: &IncomingMessage,
    bot_number: &str,
    bot_uuid: Option<&str>,
) -> bool {
    let normalized_bot_number = normalize_number(bot_number);
    let normalized_bot_uuid = bot_uuid.map(|id| id.trim().to_lowercase());

    message.mentions.iter().any(|mention| {
        if let Some(number) = &mention.number
            && normalize_number(number) == normalized_bot_number
        {
            return true;
        }
        if let (Some(uuid), Some(bot_uuid)) = (&mention.uuid, &normalized_bot_uuid)
            && uuid.trim().to_lowercase() == *bot_uuid
        {
            return true;
        }
        false
    })
}

/// Remove the byte ranges covered by mention spans and collapse whitespace.
/// Spans that fall outside the text or off char boundaries are skipped.
pub fn strip_mention_spans(text: &str, mentions: &[MentionSpan]) -> String {
    let mut cleaned = text.to_owned();
    let mut spans: Vec<&MentionSpan> = mentions.iter().collect();
    spans.sort_by(|a, b| b.start.cmp(&a.start));

    for mention in spans {
        let start = mention.start;
        let end = mention.start + mention.length;
        if end <= start
            || end > cleaned.len()
            || !cleaned.is_char_boundary(start)
            || !cleaned.is_char_boundary(end)
        {
            continue;
        }
        cleaned = format!("{} {}", &cleaned[..start], &cleaned[end..]);
    }

    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_number(value: &str) -> String {
    value
        .chars()
        .filter(|ch| ch.is_ascii_digit() || *ch == '+')
        .collect()
}

// ---------------------------------------------------------------------------
// Tolerant JSON tree extractors
// ---------------------------------------------------------------------------

/// View a value as an object, treating everything else as empty.
pub(crate) fn as_object(value: Option<&Value>) -> Option<&serde_json::Map<String, Value>> {
    value.and_then(|v| v.as_object())
}

/// First non-empty string among the named keys of an object.
pub(crate) fn first_non_empty_str<'a>(
    object: Option<&'a serde_json::Map<String, Value>>,
    keys: &[&str],
) -> Option<&'a str> {
    let object = object?;
    for key in keys {
        if let Some(Value::String(s)) = object.get(*key)
            && !s.trim().is_empty()
        {
            return Some(s.as_str());
        }
    }
    None
}

/// Integer from either a JSON number or a numeric string.
pub(crate) fn as_int(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn message_with_mentions(text: &str, mentions: Vec<MentionSpan>) -> IncomingMessage {
        IncomingMessage {
            sender: "+15550001111".into(),
            text: text.into(),
            timestamp: 1_730_000_000_000,
            target: Target::direct("+15550001111"),
            transport: Transport::Signal,
            mentions,
            directed_to_bot: false,
        }
    }

    #[test]
    fn conversation_key_distinguishes_scopes() {
        let mut message = message_with_mentions("hi", vec![]);
        assert_eq!(message.conversation_key(), "dm:+15550001111");
        message.target = Target::group("+15550001111", "group-1");
        assert_eq!(message.conversation_key(), "group:group-1");
    }

    #[test]
    fn dedupe_key_trims_text() {
        let message = message_with_mentions("  hello  ", vec![]);
        assert_eq!(dedupe_key(&message), "+15550001111|1730000000000|hello");
    }

    #[test]
    fn dedupe_key_is_stable_for_equal_input() {
        let a = message_with_mentions("same", vec![]);
        let b = message_with_mentions("same", vec![]);
        assert_eq!(dedupe_key(&a), dedupe_key(&b));
    }

    #[test]
    fn metadata_mentions_match_number_digits() {
        let message = message_with_mentions(
            "@bot hi",
            vec![MentionSpan {
                start: 0,
                length: 4,
                number: Some("+1 (555) 000-2222".into()),
                uuid: None,
            }],
        );
        assert!(metadata_mentions_bot(&message, "+15550002222", None));
        assert!(!metadata_mentions_bot(&message, "+15550009999", None));
    }

    #[test]
    fn metadata_mentions_match_uuid_case_insensitively() {
        let message = message_with_mentions(
            "@bot hi",
            vec![MentionSpan {
                start: 0,
                length: 4,
                number: None,
                uuid: Some("ABCD-1234".into()),
            }],
        );
        assert!(metadata_mentions_bot(&message, "", Some("abcd-1234")));
        assert!(!metadata_mentions_bot(&message, "", None));
    }

    #[test]
    fn strip_mention_spans_removes_ranges() {
        let mentions = vec![MentionSpan {
            start: 0,
            length: 4,
            number: Some("+1".into()),
            uuid: None,
        }];
        assert_eq!(strip_mention_spans("@bot what is up", &mentions), "what is up");
    }

    #[test]
    fn strip_mention_spans_skips_out_of_range() {
        let mentions = vec![MentionSpan {
            start: 10,
            length: 50,
            number: Some("+1".into()),
            uuid: None,
        }];
        assert_eq!(strip_mention_spans("short", &mentions), "short");
    }

    #[test]
    fn extractors_tolerate_shape_mismatches() {
        let value = serde_json::json!({"a": "", "b": "x", "n": "42", "m": 7});
        let object = value.as_object();
        assert_eq!(first_non_empty_str(object, &["a", "b"]), Some("x"));
        assert_eq!(first_non_empty_str(object, &["a"]), None);
        assert_eq!(as_int(value.get("n")), Some(42));
        assert_eq!(as_int(value.get("m")), Some(7));
        assert_eq!(as_int(value.get("a")), None);
        assert!(as_object(value.get("a")).is_none());
    }
}
