//! Chat-completion and image-generation oracle clients.
//!
//! Both speak the OpenRouter-compatible `/chat/completions` API.  Errors are
//! classified into fixed user-visible message families; callers surface
//! `user_message()` directly to the chat without inspecting the variant.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use tracing::debug;

use crate::config::Settings;

const MAX_DETAIL_CHARS: usize = 240;
const RETRY_ATTEMPTS: u32 = 3;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Chat oracle failure with its user-visible message.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{user_message}")]
pub struct ChatReplyError {
    pub user_message: String,
    pub status_code: Option<u16>,
}

impl ChatReplyError {
    pub fn new(user_message: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
            status_code: None,
        }
    }

    pub fn with_status(user_message: impl Into<String>, status_code: u16) -> Self {
        Self {
            user_message: user_message.into(),
            status_code: Some(status_code),
        }
    }

    pub fn timeout() -> Self {
        Self::new("Chat service timed out. Try again.")
    }
}

/// Image oracle failure with its user-visible message.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{user_message}")]
pub struct ImageGenerationError {
    pub user_message: String,
    pub status_code: Option<u16>,
}

impl ImageGenerationError {
    pub fn new(user_message: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
            status_code: None,
        }
    }

    pub fn with_status(user_message: impl Into<String>, status_code: u16) -> Self {
        Self {
            user_message: user_message.into(),
            status_code: Some(status_code),
        }
    }

    pub fn timeout() -> Self {
        Self::new("Image generation timed out. Try again.")
    }
}

// ---------------------------------------------------------------------------
// Traits (seams for the router and service tests)
// ---------------------------------------------------------------------------

/// "Generate a reply from a message list" oracle.
#[async_trait]
pub trait ChatOracle: Send + Sync {
    async fn generate_reply(&self, messages: &[Value]) -> Result<String, ChatReplyError>;
}

/// Image generation oracle.
#[async_trait]
pub trait ImageOracle: Send + Sync {
    async fn generate_images(
        &self,
        prompt: &str,
        model: &str,
    ) -> Result<Vec<(Vec<u8>, String)>, ImageGenerationError>;
}

// ---------------------------------------------------------------------------
// Chat client
// ---------------------------------------------------------------------------

/// OpenRouter-compatible chat completion client.
pub struct OpenRouterChatClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: std::time::Duration,
    max_output_tokens: u32,
    temperature: f64,
    http_referer: Option<String>,
    app_title: Option<String>,
}

impl OpenRouterChatClient {
    pub fn from_settings(settings: &Settings, http: reqwest::Client) -> Self {
        Self {
            http,
            api_key: settings.openrouter_chat_api_key.clone(),
            model: settings.openrouter_model.clone(),
            base_url: settings.openrouter_base_url.trim_end_matches('/').to_owned(),
            timeout: std::time::Duration::from_secs_f64(settings.openrouter_timeout_seconds),
            max_output_tokens: settings.openrouter_max_output_tokens,
            temperature: settings.chat_temperature,
            http_referer: settings.openrouter_http_referer.clone(),
            app_title: settings.openrouter_app_title.clone(),
        }
    }

    fn request(&self, payload: &Value) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(self.timeout)
            .bearer_auth(&self.api_key)
            .json(payload);
        if let Some(referer) = &self.http_referer {
            builder = builder.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.app_title {
            builder = builder.header("X-Title", title);
        }
        builder
    }
}

#[async_trait]
impl ChatOracle for OpenRouterChatClient {
    async fn generate_reply(&self, messages: &[Value]) -> Result<String, ChatReplyError> {
        let payload = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_output_tokens,
            "temperature": self.temperature,
        });

        for attempt in 0..RETRY_ATTEMPTS {
            let response = match self.request(&payload).send().await {
                Ok(response) => response,
                Err(err) => {
                    if attempt + 1 == RETRY_ATTEMPTS {
                        return Err(ChatReplyError::timeout());
                    }
                    debug!(error = %err, attempt, "chat request failed, retrying");
                    backoff(attempt).await;
                    continue;
                }
            };

            let status = response.status().as_u16();
            if status < 400 {
                let body: Value = response
                    .json()
                    .await
                    .map_err(|_| ChatReplyError::new("Chat service returned invalid JSON."))?;
                return extract_reply_text(&body);
            }

            if matches!(status, 429 | 500 | 502 | 503 | 504) && attempt + 1 < RETRY_ATTEMPTS {
                backoff(attempt).await;
                continue;
            }

            if matches!(status, 401 | 403) {
                return Err(ChatReplyError::with_status(
                    "Chat service authorization failed.",
                    status,
                ));
            }

            let detail = extract_response_detail(response).await;
            return Err(ChatReplyError::with_status(
                format!("Chat reply failed: {detail}"),
                status,
            ));
        }

        Err(ChatReplyError::new("Chat service failed unexpectedly."))
    }
}

// ---------------------------------------------------------------------------
// Image client
// ---------------------------------------------------------------------------

/// OpenRouter-compatible image generation client.
pub struct OpenRouterImageClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: std::time::Duration,
    http_referer: Option<String>,
    app_title: Option<String>,
}

impl OpenRouterImageClient {
    pub fn from_settings(settings: &Settings, http: reqwest::Client) -> Option<Self> {
        let api_key = settings.openrouter_image_api_key.clone()?;
        Some(Self {
            http,
            api_key,
            base_url: settings.openrouter_base_url.trim_end_matches('/').to_owned(),
            timeout: std::time::Duration::from_secs_f64(settings.openrouter_image_timeout_seconds),
            http_referer: settings.openrouter_http_referer.clone(),
            app_title: settings.openrouter_app_title.clone(),
        })
    }

    fn request(&self, payload: &Value) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(self.timeout)
            .bearer_auth(&self.api_key)
            .json(payload);
        if let Some(referer) = &self.http_referer {
            builder = builder.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.app_title {
            builder = builder.header("X-Title", title);
        }
        builder
    }

    async fn resolve_image(&self, image_ref: &str) -> Result<(Vec<u8>, String), ImageGenerationError> {
        if image_ref.starts_with("data:") {
            return decode_data_image_url(image_ref);
        }

        if image_ref.starts_with("https://") || image_ref.starts_with("http://") {
            let response = self
                .http
                .get(image_ref)
                .timeout(self.timeout)
                .send()
                .await
                .map_err(|_| ImageGenerationError::timeout())?;

            let status = response.status().as_u16();
            if status >= 400 {
                return Err(ImageGenerationError::with_status(
                    format!("Image generation failed: status {status}"),
                    status,
                ));
            }

            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.split(';').next().unwrap_or("").trim().to_owned())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "image/png".to_owned());

            let bytes = response
                .bytes()
                .await
                .map_err(|_| ImageGenerationError::new("Image service returned an empty image."))?;
            if bytes.is_empty() {
                return Err(ImageGenerationError::new(
                    "Image service returned an empty image.",
                ));
            }
            return Ok((bytes.to_vec(), content_type));
        }

        Err(ImageGenerationError::new(
            "Image service returned an invalid image payload.",
        ))
    }
}

#[async_trait]
impl ImageOracle for OpenRouterImageClient {
    async fn generate_images(
        &self,
        prompt: &str,
        model: &str,
    ) -> Result<Vec<(Vec<u8>, String)>, ImageGenerationError> {
        let payload = json!({
            "model": model,
            "messages": [{"role": "user", "content": prompt}],
            "modalities": ["image"],
        });

        for attempt in 0..RETRY_ATTEMPTS {
            let response = match self.request(&payload).send().await {
                Ok(response) => response,
                Err(err) => {
                    if attempt + 1 == RETRY_ATTEMPTS {
                        return Err(ImageGenerationError::timeout());
                    }
                    debug!(error = %err, attempt, "image request failed, retrying");
                    backoff(attempt).await;
                    continue;
                }
            };

            let status = response.status().as_u16();
            if status < 400 {
                let body: Value = response.json().await.map_err(|_| {
                    ImageGenerationError::new("Image service returned invalid JSON.")
                })?;
                let refs = extract_image_references(&body)?;

                let mut results = Vec::new();
                let mut last_error = None;
                for image_ref in refs {
                    match self.resolve_image(&image_ref).await {
                        Ok(resolved) => results.push(resolved),
                        Err(err) => last_error = Some(err),
                    }
                }
                if !results.is_empty() {
                    return Ok(results);
                }
                return Err(last_error.unwrap_or_else(|| {
                    ImageGenerationError::new("Image service returned an invalid image payload.")
                }));
            }

            if matches!(status, 429 | 500 | 502 | 503 | 504) && attempt + 1 < RETRY_ATTEMPTS {
                backoff(attempt).await;
                continue;
            }

            if matches!(status, 401 | 403) {
                return Err(ImageGenerationError::with_status(
                    "Image service authorization failed.",
                    status,
                ));
            }

            let detail = extract_response_detail(response).await;
            return Err(ImageGenerationError::with_status(
                format!("Image generation failed: {detail}"),
                status,
            ));
        }

        Err(ImageGenerationError::new(
            "Image generation failed unexpectedly.",
        ))
    }
}

// ---------------------------------------------------------------------------
// Payload extraction
// ---------------------------------------------------------------------------

async fn backoff(attempt: u32) {
    let millis = 500 * u64::from(attempt + 1);
    tokio::time::sleep(std::time::Duration::from_millis(millis)).await;
}

fn extract_reply_text(payload: &Value) -> Result<String, ChatReplyError> {
    let message = payload
        .pointer("/choices/0/message")
        .ok_or_else(|| ChatReplyError::new("Chat service returned an empty reply."))?;

    let content = extract_content_text(message.get("content"));
    if content.is_empty() {
        return Err(ChatReplyError::new("Chat service returned an empty reply."));
    }
    Ok(content)
}

fn extract_content_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.split_whitespace().collect::<Vec<_>>().join(" "),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        _ => String::new(),
    }
}

fn extract_image_references(payload: &Value) -> Result<Vec<String>, ImageGenerationError> {
    let images = payload
        .pointer("/choices/0/message/images")
        .and_then(|v| v.as_array())
        .filter(|images| !images.is_empty())
        .ok_or_else(|| {
            ImageGenerationError::new("Image service returned an empty image payload.")
        })?;

    Ok(images
        .iter()
        .filter_map(extract_image_reference)
        .collect())
}

fn extract_image_reference(item: &Value) -> Option<String> {
    let object = item.as_object()?;

    match object.get("image_url") {
        Some(Value::Object(image_url)) => {
            for key in ["url", "image_url"] {
                if let Some(Value::String(s)) = image_url.get(key)
                    && !s.trim().is_empty()
                {
                    return Some(s.trim().to_owned());
                }
            }
        }
        Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.trim().to_owned()),
        _ => {}
    }

    for key in ["url", "image"] {
        if let Some(Value::String(s)) = object.get(key)
            && !s.trim().is_empty()
        {
            return Some(s.trim().to_owned());
        }
    }
    None
}

fn decode_data_image_url(image_ref: &str) -> Result<(Vec<u8>, String), ImageGenerationError> {
    let Some((prefix, data)) = image_ref.split_once(',') else {
        return Err(ImageGenerationError::new(
            "Image service returned an invalid image payload.",
        ));
    };
    if data.trim().is_empty() {
        return Err(ImageGenerationError::new(
            "Image service returned an invalid image payload.",
        ));
    }
    if !prefix.to_lowercase().contains(";base64") {
        return Err(ImageGenerationError::new(
            "Image service returned invalid base64 image data.",
        ));
    }

    let metadata = prefix.strip_prefix("data:").unwrap_or(prefix);
    let content_type = metadata
        .split(';')
        .next()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or("image/png")
        .to_owned();

    let bytes = BASE64.decode(data.trim()).map_err(|_| {
        ImageGenerationError::new("Image service returned invalid base64 image data.")
    })?;
    if bytes.is_empty() {
        return Err(ImageGenerationError::new(
            "Image service returned an empty image.",
        ));
    }

    Ok((bytes, content_type))
}

async fn extract_response_detail(response: reqwest::Response) -> String {
    let detail = match response.json::<Value>().await {
        Ok(Value::Object(map)) => map
            .get("error")
            .or_else(|| map.get("message"))
            .or_else(|| map.get("detail"))
            .map(value_to_detail)
            .unwrap_or_else(|| serde_json::to_string(&map).unwrap_or_default()),
        Ok(other) => value_to_detail(&other),
        Err(_) => String::new(),
    };

    let detail = detail.split_whitespace().collect::<Vec<_>>().join(" ");
    if detail.is_empty() {
        return "No error detail".to_owned();
    }
    if detail.chars().count() > MAX_DETAIL_CHARS {
        let truncated: String = detail.chars().take(MAX_DETAIL_CHARS).collect();
        return format!("{truncated}...");
    }
    detail
}

fn value_to_detail(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reply_text_extracts_string_content() {
        let payload = json!({
            "choices": [{"message": {"content": "  hello\n world  "}}]
        });
        assert_eq!(extract_reply_text(&payload).unwrap(), "hello world");
    }

    #[test]
    fn reply_text_extracts_part_arrays() {
        let payload = json!({
            "choices": [{"message": {"content": [
                {"type": "text", "text": "part one"},
                {"type": "text", "text": "  "},
                {"type": "text", "text": "part two"}
            ]}}]
        });
        assert_eq!(extract_reply_text(&payload).unwrap(), "part one part two");
    }

    #[test]
    fn reply_text_rejects_empty_payloads() {
        assert!(extract_reply_text(&json!({})).is_err());
        assert!(extract_reply_text(&json!({"choices": []})).is_err());
        assert!(
            extract_reply_text(&json!({"choices": [{"message": {"content": ""}}]})).is_err()
        );
    }

    #[test]
    fn image_references_cover_all_shapes() {
        assert_eq!(
            extract_image_reference(&json!({"image_url": {"url": "https://a"}})),
            Some("https://a".into())
        );
        assert_eq!(
            extract_image_reference(&json!({"image_url": "https://b"})),
            Some("https://b".into())
        );
        assert_eq!(
            extract_image_reference(&json!({"url": "https://c"})),
            Some("https://c".into())
        );
        assert_eq!(
            extract_image_reference(&json!({"image": "data:image/png;base64,xx"})),
            Some("data:image/png;base64,xx".into())
        );
        assert_eq!(extract_image_reference(&json!({"other": 1})), None);
    }

    #[test]
    fn empty_image_list_is_an_error() {
        let payload = json!({"choices": [{"message": {"images": []}}]});
        assert!(extract_image_references(&payload).is_err());
        assert!(extract_image_references(&json!({})).is_err());
    }

    #[test]
    fn data_url_decoding_roundtrips() {
        let bytes = b"fake image bytes";
        let encoded = BASE64.encode(bytes);
        let data_url = format!("data:image/jpeg;base64,{encoded}");
        let (decoded, content_type) = decode_data_image_url(&data_url).unwrap();
        assert_eq!(decoded, bytes);
        assert_eq!(content_type, "image/jpeg");
    }

    #[test]
    fn data_url_without_base64_marker_fails() {
        let err = decode_data_image_url("data:image/png,rawdata").unwrap_err();
        assert!(err.user_message.contains("base64"));
    }

    #[test]
    fn data_url_without_comma_fails() {
        assert!(decode_data_image_url("data:image/png;base64").is_err());
    }

    #[test]
    fn error_messages_are_fixed_strings() {
        assert_eq!(
            ChatReplyError::timeout().user_message,
            "Chat service timed out. Try again."
        );
        assert_eq!(
            ImageGenerationError::timeout().user_message,
            "Image generation timed out. Try again."
        );
    }
}
