//! Telegram Bot API send client.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::message::Target;
use crate::transport::{MessengerClient, SendError, compact_detail};

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Telegram Bot API client.
pub struct TelegramClient {
    base_url: String,
    bot_token: String,
    http: reqwest::Client,
}

impl TelegramClient {
    pub fn new(bot_token: &str, http: reqwest::Client) -> Self {
        Self::with_base_url(bot_token, http, "https://api.telegram.org")
    }

    pub fn with_base_url(bot_token: &str, http: reqwest::Client, base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            bot_token: bot_token.trim().to_owned(),
            http,
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.bot_token, method)
    }

    async fn check(&self, response: reqwest::Response, chat_id: &str) -> Result<(), SendError> {
        let status = response.status().as_u16();
        if status < 400 {
            return Ok(());
        }
        let detail = compact_detail(&response.text().await.unwrap_or_default());
        Err(SendError::Status {
            transport: "telegram",
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
            transport: "telegram",
        })
}

fn photo_filename(content_type: &str) -> &'static str {
    if content_type.contains("png") {
        "image.png"
    } else if content_type.contains("jpeg") || content_type.contains("jpg") {
        "image.jpg"
    } else if content_type.contains("webp") {
        "image.webp"
    } else {
        "image.bin"
    }
}

#[async_trait]
impl MessengerClient for TelegramClient {
    async fn send_text(
        &self,
        target: &Target,
        message: &str,
        _fallback_recipient: Option<&str>,
    ) -> Result<(), SendError> {
        let chat_id = target_chat_id(target)?;
        let response = self
            .http
            .post(self.method_url("sendMessage"))
            .json(&json!({"chat_id": chat_id, "text": message}))
            .timeout(SEND_TIMEOUT)
            .send()
            .await
            .map_err(|_| SendError::Network {
                transport: "telegram",
                recipient: chat_id.to_owned(),
            })?;
        self.check(response, chat_id).await
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

        let part = reqwest::multipart::Part::bytes(image_bytes.to_vec())
            .file_name(photo_filename(content_type))
            .mime_str(content_type)
            .map_err(|_| SendError::Status {
                transport: "telegram",
                status: 0,
                recipient: chat_id.to_owned(),
                detail: format!("invalid content type: {content_type}"),
            })?;

        let mut form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_owned())
            .part("photo", part);
        if let Some(caption) = caption {
            form = form.text("caption", caption.to_owned());
        }

        let response = self
            .http
            .post(self.method_url("sendPhoto"))
            .multipart(form)
            .timeout(SEND_TIMEOUT)
            .send()
            .await
            .map_err(|_| SendError::Network {
                transport: "telegram",
                recipient: chat_id.to_owned(),
            })?;
        self.check(response, chat_id).await
    }
}
