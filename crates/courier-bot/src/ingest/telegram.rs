//! Telegram Bot API update parsing.

use serde_json::Value;

use crate::message::{IncomingMessage, Target, Transport, as_int, as_object, first_non_empty_str};

/// Parse a Telegram `Update` payload (`message` or `edited_message`).
///
/// `directed_to_bot` is true iff a mention entity selects `@<bot_username>`
/// or the message replies to a message sent by the bot.
pub fn parse_telegram_webhook(
    payload: &Value,
    bot_username: Option<&str>,
) -> Option<IncomingMessage> {
    let update = payload.as_object()?;
    let message = as_object(update.get("message"))
        .or_else(|| as_object(update.get("edited_message")))
        .filter(|m| !m.is_empty())?;

    let text = first_non_empty_str(Some(message), &["text", "caption"])?.to_owned();

    let from = as_object(message.get("from"));
    let chat = as_object(message.get("chat"));
    let sender = coerce_id(from.and_then(|f| f.get("id")))?;
    let chat_id = coerce_id(chat.and_then(|c| c.get("id")))?;

    let chat_type = first_non_empty_str(chat, &["type"]).unwrap_or("");
    let is_group = matches!(chat_type, "group" | "supergroup");
    let timestamp = as_int(message.get("date")).unwrap_or(0);

    let directed_to_bot = is_directed_to_bot(message, &text, bot_username);

    let target = if is_group {
        Target::group(sender.clone(), chat_id)
    } else {
        Target::direct(chat_id)
    };

    Some(IncomingMessage {
        sender,
        text,
        timestamp,
        target,
        transport: Transport::Telegram,
        mentions: Vec::new(),
        directed_to_bot,
    })
}

fn is_directed_to_bot(
    message: &serde_json::Map<String, Value>,
    text: &str,
    bot_username: Option<&str>,
) -> bool {
    let Some(normalized_username) = normalize_username(bot_username) else {
        return false;
    };

    if entities_mention_username(message, text, &normalized_username) {
        return true;
    }

    // A reply to one of the bot's own messages also counts as addressing it.
    let reply_from = as_object(message.get("reply_to_message"))
        .and_then(|reply| as_object(reply.get("from")));
    let Some(reply_from) = reply_from else {
        return false;
    };
    if !reply_from
        .get("is_bot")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
    {
        return false;
    }

    normalize_username(first_non_empty_str(Some(reply_from), &["username"]))
        .is_some_and(|reply_username| reply_username == normalized_username)
}

fn entities_mention_username(
    message: &serde_json::Map<String, Value>,
    text: &str,
    normalized_username: &str,
) -> bool {
    let Some(Value::Array(entities)) = message.get("entities") else {
        return false;
    };

    for raw_entity in entities {
        let Some(entity) = raw_entity.as_object() else {
            continue;
        };
        if first_non_empty_str(Some(entity), &["type"]) != Some("mention") {
            continue;
        }
        let (Some(offset), Some(length)) =
            (as_int(entity.get("offset")), as_int(entity.get("length")))
        else {
            continue;
        };
        if offset < 0 || length <= 0 {
            continue;
        }
        let (start, end) = (offset as usize, (offset + length) as usize);
        if end > text.len() || !text.is_char_boundary(start) || !text.is_char_boundary(end) {
            continue;
        }
        let mention_text = text[start..end].trim().to_lowercase();
        if mention_text == format!("@{normalized_username}") {
            return true;
        }
    }

    false
}

fn coerce_id(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Number(n) => n.as_i64().map(|id| id.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
        _ => None,
    }
}

fn normalize_username(value: Option<&str>) -> Option<String> {
    let normalized = value?.trim().to_lowercase();
    let normalized = normalized.strip_prefix('@').unwrap_or(&normalized);
    if normalized.is_empty() {
        None
    } else {
        Some(normalized.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn group_update(text: &str, entities: Value) -> Value {
        json!({
            "update_id": 1,
            "message": {
                "text": text,
                "date": 1_730_000_000,
                "from": {"id": 42, "username": "alice"},
                "chat": {"id": -100, "type": "supergroup"},
                "entities": entities
            }
        })
    }

    #[test]
    fn parses_private_message() {
        let payload = json!({
            "message": {
                "text": "hello",
                "date": 5,
                "from": {"id": 42},
                "chat": {"id": 42, "type": "private"}
            }
        });
        let parsed = parse_telegram_webhook(&payload, Some("courierbot")).expect("message");
        assert_eq!(parsed.sender, "42");
        assert_eq!(parsed.target.recipient.as_deref(), Some("42"));
        assert!(parsed.target.group_id.is_none());
        assert!(!parsed.directed_to_bot);
    }

    #[test]
    fn parses_edited_message_and_caption() {
        let payload = json!({
            "edited_message": {
                "caption": "a photo caption",
                "date": 5,
                "from": {"id": 7},
                "chat": {"id": 7, "type": "private"}
            }
        });
        let parsed = parse_telegram_webhook(&payload, None).expect("message");
        assert_eq!(parsed.text, "a photo caption");
    }

    #[test]
    fn group_scope_keeps_sender_for_fallback() {
        let payload = group_update("@courierbot hi", json!([]));
        let parsed = parse_telegram_webhook(&payload, Some("courierbot")).expect("message");
        assert_eq!(parsed.sender, "42");
        assert_eq!(parsed.target.group_id.as_deref(), Some("-100"));
        assert_eq!(parsed.target.recipient.as_deref(), Some("42"));
    }

    #[test]
    fn mention_entity_directs_to_bot() {
        let payload = group_update(
            "@courierbot hi",
            json!([{"type": "mention", "offset": 0, "length": 11}]),
        );
        let parsed = parse_telegram_webhook(&payload, Some("courierbot")).expect("message");
        assert!(parsed.directed_to_bot);

        // Wrong username does not fire.
        let parsed = parse_telegram_webhook(&payload, Some("otherbot")).expect("message");
        assert!(!parsed.directed_to_bot);
    }

    #[test]
    fn reply_to_bot_directs_to_bot() {
        let payload = json!({
            "message": {
                "text": "and then?",
                "date": 5,
                "from": {"id": 42},
                "chat": {"id": -100, "type": "group"},
                "reply_to_message": {
                    "from": {"id": 99, "is_bot": true, "username": "CourierBot"}
                }
            }
        });
        let parsed = parse_telegram_webhook(&payload, Some("courierbot")).expect("message");
        assert!(parsed.directed_to_bot);
    }

    #[test]
    fn reply_to_other_bot_does_not_direct() {
        let payload = json!({
            "message": {
                "text": "and then?",
                "date": 5,
                "from": {"id": 42},
                "chat": {"id": -100, "type": "group"},
                "reply_to_message": {
                    "from": {"id": 99, "is_bot": true, "username": "someoneelse"}
                }
            }
        });
        let parsed = parse_telegram_webhook(&payload, Some("courierbot")).expect("message");
        assert!(!parsed.directed_to_bot);
    }

    #[test]
    fn rejects_non_text_updates() {
        assert!(parse_telegram_webhook(&json!({"update_id": 1}), None).is_none());
        let payload = json!({
            "message": {"date": 5, "from": {"id": 1}, "chat": {"id": 1, "type": "private"}}
        });
        assert!(parse_telegram_webhook(&payload, None).is_none());
    }

    #[test]
    fn out_of_bounds_entities_are_ignored() {
        let payload = group_update(
            "@courierbot",
            json!([{"type": "mention", "offset": 0, "length": 400}]),
        );
        let parsed = parse_telegram_webhook(&payload, Some("courierbot")).expect("message");
        assert!(!parsed.directed_to_bot);
    }
}
