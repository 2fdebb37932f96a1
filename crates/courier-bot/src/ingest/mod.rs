//! Transport-specific webhook payload parsers.
//!
//! Inbound bodies are arbitrary JSON trees with several legacy field aliases
//! per transport.  Each parser returns `None` for anything it cannot shape
//! into an [`IncomingMessage`]; the router maps that to
//! `ignored/unsupported_event`.

mod signal;
mod telegram;
mod whatsapp;

pub use signal::parse_signal_webhook;
pub use telegram::parse_telegram_webhook;
pub use whatsapp::parse_whatsapp_webhook;

use serde_json::Value;

use crate::message::{IncomingMessage, Transport};

/// Parse a webhook body, dispatching on the endpoint's transport hint.
/// Without a hint the payload is tried against every parser in turn.
pub fn parse_incoming_webhook(
    payload: &Value,
    transport_hint: Option<Transport>,
    telegram_bot_username: Option<&str>,
) -> Option<IncomingMessage> {
    match transport_hint {
        Some(Transport::Signal) => parse_signal_webhook(payload),
        Some(Transport::WhatsApp) => parse_whatsapp_webhook(payload),
        Some(Transport::Telegram) => parse_telegram_webhook(payload, telegram_bot_username),
        None => parse_signal_webhook(payload)
            .or_else(|| parse_telegram_webhook(payload, telegram_bot_username))
            .or_else(|| parse_whatsapp_webhook(payload)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hintless_parse_tries_every_transport() {
        let signal = json!({
            "envelope": {
                "sourceNumber": "+15550002222",
                "timestamp": 1,
                "dataMessage": {"message": "hi", "timestamp": 1}
            }
        });
        let parsed = parse_incoming_webhook(&signal, None, None).expect("signal");
        assert_eq!(parsed.transport, Transport::Signal);

        let telegram = json!({
            "message": {
                "text": "hi",
                "date": 1,
                "from": {"id": 42},
                "chat": {"id": 42, "type": "private"}
            }
        });
        let parsed = parse_incoming_webhook(&telegram, None, Some("bot")).expect("telegram");
        assert_eq!(parsed.transport, Transport::Telegram);

        assert!(parse_incoming_webhook(&json!({"noise": true}), None, None).is_none());
    }
}
