//! Signal CLI REST bridge webhook parsing.

use serde_json::Value;

use crate::message::{
    IncomingMessage, MentionSpan, Target, Transport, as_int, as_object, first_non_empty_str,
};

/// Parse a Signal bridge webhook envelope.
///
/// The envelope may sit at `payload.params.envelope`, `payload.envelope`, or
/// be the payload itself.  Mentions come from `dataMessage.mentions` and/or
/// `dataMessage.bodyRanges`, with several legacy key aliases per field.
pub fn parse_signal_webhook(payload: &Value) -> Option<IncomingMessage> {
    let envelope = resolve_envelope(payload);
    let data_message = as_object(envelope.get("dataMessage"));

    let sender = first_non_empty_str(Some(envelope), &["sourceNumber", "source"])?.to_owned();

    let text = first_non_empty_str(data_message, &["message"])
        .or_else(|| first_non_empty_str(Some(envelope), &["message"]))?
        .to_owned();

    let group_info = data_message.and_then(|dm| as_object(dm.get("groupInfo")));
    let group_id = first_non_empty_str(group_info, &["groupId", "groupIdHex"]).map(str::to_owned);

    let timestamp = data_message
        .and_then(|dm| as_int(dm.get("timestamp")))
        .or_else(|| as_int(envelope.get("timestamp")))
        .unwrap_or(0);

    let mentions = data_message.map(extract_mentions).unwrap_or_default();

    Some(IncomingMessage {
        target: Target {
            recipient: Some(sender.clone()),
            group_id,
        },
        sender,
        text,
        timestamp,
        transport: Transport::Signal,
        mentions,
        // Signal addressing is decided later from the mention spans.
        directed_to_bot: false,
    })
}

fn resolve_envelope(payload: &Value) -> &serde_json::Map<String, Value> {
    static EMPTY: std::sync::LazyLock<serde_json::Map<String, Value>> =
        std::sync::LazyLock::new(serde_json::Map::new);

    if let Some(params) = as_object(payload.get("params"))
        && let Some(envelope) = as_object(params.get("envelope"))
        && !envelope.is_empty()
    {
        return envelope;
    }
    if let Some(envelope) = as_object(payload.get("envelope"))
        && !envelope.is_empty()
    {
        return envelope;
    }
    payload.as_object().unwrap_or(&EMPTY)
}

fn extract_mentions(data_message: &serde_json::Map<String, Value>) -> Vec<MentionSpan> {
    let mut mentions = Vec::new();
    for key in ["mentions", "bodyRanges"] {
        if let Some(Value::Array(items)) = data_message.get(key) {
            for item in items {
                if let Some(mention) = parse_mention(item) {
                    mentions.push(mention);
                }
            }
        }
    }
    mentions
}

fn parse_mention(value: &Value) -> Option<MentionSpan> {
    let object = value.as_object()?;

    let start = as_int(object.get("start"))?;
    let length = as_int(object.get("length"))?;
    if start < 0 || length <= 0 {
        return None;
    }

    let number = first_non_empty_str(
        Some(object),
        &[
            "number",
            "recipientNumber",
            "recipient",
            "phoneNumber",
            "sourceNumber",
            "mentionNumber",
        ],
    )
    .map(str::to_owned);
    let uuid = first_non_empty_str(
        Some(object),
        &["uuid", "recipientUuid", "mentionUuid", "aci", "mentionAci"],
    )
    .map(str::to_owned);

    if number.is_none() && uuid.is_none() {
        return None;
    }

    Some(MentionSpan {
        start: start as usize,
        length: length as usize,
        number,
        uuid,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_plain_envelope() {
        let payload = json!({
            "envelope": {
                "sourceNumber": "+15550002222",
                "timestamp": 1_730_000_000_001i64,
                "dataMessage": {
                    "message": "@bot what is the summary?",
                    "timestamp": 1_730_000_000_001i64,
                    "groupInfo": {"groupId": "group-1"}
                }
            }
        });
        let parsed = parse_signal_webhook(&payload).expect("message");
        assert_eq!(parsed.sender, "+15550002222");
        assert_eq!(parsed.text, "@bot what is the summary?");
        assert_eq!(parsed.timestamp, 1_730_000_000_001);
        assert_eq!(parsed.target.group_id.as_deref(), Some("group-1"));
        assert_eq!(parsed.target.recipient.as_deref(), Some("+15550002222"));
    }

    #[test]
    fn parses_jsonrpc_nested_envelope() {
        let payload = json!({
            "params": {
                "envelope": {
                    "source": "+15550002222",
                    "timestamp": 7,
                    "dataMessage": {"message": "hi"}
                }
            }
        });
        let parsed = parse_signal_webhook(&payload).expect("message");
        assert_eq!(parsed.sender, "+15550002222");
        assert_eq!(parsed.timestamp, 7);
        assert!(parsed.target.group_id.is_none());
    }

    #[test]
    fn falls_back_to_envelope_message_and_timestamp() {
        let payload = json!({
            "envelope": {
                "sourceNumber": "+15550002222",
                "timestamp": 9,
                "message": "top-level text",
                "dataMessage": {}
            }
        });
        let parsed = parse_signal_webhook(&payload).expect("message");
        assert_eq!(parsed.text, "top-level text");
        assert_eq!(parsed.timestamp, 9);
    }

    #[test]
    fn rejects_payloads_without_sender_or_text() {
        assert!(parse_signal_webhook(&json!({"envelope": {"dataMessage": {"message": "x"}}}))
            .is_none());
        assert!(
            parse_signal_webhook(&json!({"envelope": {"sourceNumber": "+1"}})).is_none()
        );
        assert!(parse_signal_webhook(&json!({"method": "receive"})).is_none());
    }

    #[test]
    fn extracts_mentions_from_both_lists() {
        let payload = json!({
            "envelope": {
                "sourceNumber": "+15550002222",
                "timestamp": 1,
                "dataMessage": {
                    "message": "@bot hello",
                    "mentions": [
                        {"start": 0, "length": 4, "number": "+15550009999"}
                    ],
                    "bodyRanges": [
                        {"start": 0, "length": 4, "recipientUuid": "abc-def"}
                    ]
                }
            }
        });
        let parsed = parse_signal_webhook(&payload).expect("message");
        assert_eq!(parsed.mentions.len(), 2);
        assert_eq!(parsed.mentions[0].number.as_deref(), Some("+15550009999"));
        assert_eq!(parsed.mentions[1].uuid.as_deref(), Some("abc-def"));
    }

    #[test]
    fn rejects_invalid_mention_spans() {
        assert!(parse_mention(&json!({"start": -1, "length": 3, "number": "+1"})).is_none());
        assert!(parse_mention(&json!({"start": 0, "length": 0, "number": "+1"})).is_none());
        assert!(parse_mention(&json!({"start": 0, "length": 4})).is_none());
        assert!(parse_mention(&json!("not an object")).is_none());
    }

    #[test]
    fn mention_spans_accept_string_offsets() {
        let mention =
            parse_mention(&json!({"start": "0", "length": "4", "number": "+1"})).expect("span");
        assert_eq!(mention.start, 0);
        assert_eq!(mention.length, 4);
    }
}
