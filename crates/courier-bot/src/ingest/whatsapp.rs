//! WhatsApp bridge event parsing.

use serde_json::Value;

use crate::message::{IncomingMessage, Target, Transport, as_int, as_object, first_non_empty_str};

/// Parse a WhatsApp bridge event.
///
/// The event body may be at `payload.event`, `payload.data`, or be the
/// payload itself.  Group scope is marked by an `isGroup` flag or a chat id
/// ending in `@g.us`.
pub fn parse_whatsapp_webhook(payload: &Value) -> Option<IncomingMessage> {
    let event = resolve_event(payload)?;
    let message_data = as_object(event.get("message"));

    let sender = first_non_empty_str(Some(event), &["from", "sender", "fromNumber", "author"])
        .or_else(|| first_non_empty_str(message_data, &["from", "sender", "author"]))?
        .to_owned();

    let text = first_non_empty_str(message_data, &["text", "body", "message"])
        .or_else(|| first_non_empty_str(Some(event), &["text", "body", "message"]))?
        .to_owned();

    let chat_id = first_non_empty_str(
        Some(event),
        &["chatId", "chat_id", "conversation", "thread"],
    )
    .or_else(|| {
        first_non_empty_str(
            message_data,
            &["chatId", "chat_id", "conversation", "thread"],
        )
    })
    .map(str::to_owned);

    let mut is_group = event
        .get("isGroup")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if !is_group && let Some(ref chat_id) = chat_id {
        is_group = chat_id.ends_with("@g.us");
    }

    let timestamp = as_int(event.get("timestamp"))
        .or_else(|| message_data.and_then(|m| as_int(m.get("timestamp"))))
        .unwrap_or(0);

    let target = Target {
        recipient: Some(sender.clone()),
        group_id: if is_group { chat_id } else { None },
    };

    Some(IncomingMessage {
        sender,
        text,
        timestamp,
        target,
        transport: Transport::WhatsApp,
        mentions: Vec::new(),
        directed_to_bot: false,
    })
}

fn resolve_event(payload: &Value) -> Option<&serde_json::Map<String, Value>> {
    if let Some(event) = as_object(payload.get("event")) {
        return Some(event);
    }
    if let Some(data) = as_object(payload.get("data")) {
        return Some(data);
    }
    payload.as_object()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
