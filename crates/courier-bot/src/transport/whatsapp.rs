//! WhatsApp bridge send client.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};

use crate::message::Target;
use crate::transport::{MessengerClient, SendError, compact_detail};

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// WhatsApp bridge client.
pub struct WhatsAppClient {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl WhatsAppClient {
    pub fn new(base_url: &str, token: Option<String>, http: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            token,
            http,
        }
    }

    async fn post_json(&self, path: &str, payload: &Value, chat_id: &str) -> Result<(), SendError> {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.http.post(&url).json(payload).timeout(SEND_TIMEOUT);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|_| SendError::Network {
            transport: "whatsapp",
            recipient: chat_id.to_owned(),
        })?;

        let status = response.status().as_u16();
        if status < 400 {
            return Ok(());
        }
        let detail = compact_detail(&response.text().await.unwrap_or_default());
        Err(SendError::Status {
            transport: "whatsapp",
            status,
            recipient: chat_id.to_owned(),
            detail,
        })
    }
}

fn target_chat_id(target: &Target) -> Result<&str, SendError> {
    target
        .group_id
        .as_deref()
        .or(target.recipient.as_deref())
        .ok_or(SendError::MissingTarget {
            transport: "whatsapp",
        })
}

#[async_trait]
impl MessengerClient for WhatsAppClient {
    async fn send_text(
        &self,
        target: &Target,
        message: &str,
        _fallback_recipient: Option<&str>,
    ) -> Result<(), SendError> {
        let chat_id = target_chat_id(target)?;
        self.post_json(
            "/send/text",
            &json!({"chatId": chat_id, "text": message}),
            chat_id,
        )
        .await
    }

    async fn send_image(
        &self,
        target: &Target,
        image_bytes: &[u8],
        content_type: &str,
        caption: Option<&str>,
        _fallback_recipient: Option<&str>,
    ) -> Result<(), SendError> {
        let chat_id = target_chat_id(target)?;
        let mut payload = json!({
            "chatId": chat_id,
            "imageBase64": BASE64.encode(image_bytes),
            "mimeType": content_type,
        });
        if let Some(caption) = caption
            && let Some(map) = payload.as_object_mut()
        {
            map.insert("caption".to_owned(), json!(caption));
        }
        self.post_json("/send/image", &payload, chat_id).await
    }
}
