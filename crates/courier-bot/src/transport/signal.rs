//! Signal CLI REST bridge send client.
//!
//! Group sends walk the resolver's candidate list: a 400 advances to the
//! next candidate, anything else is fatal for the whole send.  When every
//! candidate 400s and a fallback recipient is available, one DM attempt is
//! made before surfacing the group error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::group_resolver::GroupResolver;
use crate::message::Target;
use crate::transport::{MessengerClient, SendError, compact_detail, suffix_for_content_type};

const SEND_TIMEOUT: Duration = Duration::from_secs(30);
const NETWORK_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Signal bridge client.
pub struct SignalClient {
    base_url: String,
    sender_number: String,
    http: reqwest::Client,
    group_resolver: Arc<GroupResolver>,
}

impl SignalClient {
    pub fn new(
        base_url: &str,
        sender_number: &str,
        http: reqwest::Client,
        group_resolver: Arc<GroupResolver>,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            sender_number: sender_number.to_owned(),
            http,
            group_resolver,
        }
    }

    async fn post_with_retry(
        &self,
        target: &Target,
        payload: Value,
        fallback_recipient: Option<&str>,
    ) -> Result<(), SendError> {
        if let Some(group_id) = &target.group_id {
            let resolved = self.group_resolver.resolve(group_id).await;
            let mut last_error: Option<SendError> = None;

            for recipient in &resolved.recipients {
                match self.post_to_recipient(recipient, &payload).await {
                    Ok(()) => return Ok(()),
                    Err(err) if err.status_code() == Some(400) => {
                        last_error = Some(err);
                        continue;
                    }
                    Err(err) => return Err(err),
                }
            }

            let Some(last_error) = last_error else {
                return Err(SendError::MissingTarget {
                    transport: "signal",
                });
            };

            if let Some(fallback) = fallback_recipient {
                warn!(
                    group_id = %group_id,
                    fallback_recipient = %fallback,
                    candidate_count = resolved.recipients.len(),
                    "group send failed on every candidate, trying DM fallback"
                );
                match self.post_to_recipient(fallback, &payload).await {
                    Ok(()) => {
                        info!(group_id = %group_id, fallback_recipient = %fallback, "DM fallback delivered");
                        return Ok(());
                    }
                    Err(err) => {
                        warn!(group_id = %group_id, error = %err, "DM fallback failed");
                    }
                }
            }

            let final_candidate = resolved
                .recipients
                .last()
                .cloned()
                .unwrap_or_default();
            return Err(SendError::GroupExhausted {
                source: Box::new(last_error),
                cache_refreshed: resolved.cache_refreshed,
                candidate_count: resolved.recipients.len(),
                final_candidate,
            });
        }

        match &target.recipient {
            Some(recipient) => self.post_to_recipient(recipient, &payload).await,
            None => Err(SendError::MissingTarget {
                transport: "signal",
            }),
        }
    }

    async fn post_to_recipient(&self, recipient: &str, payload: &Value) -> Result<(), SendError> {
        let url = format!("{}/v2/send", self.base_url);
        let mut body = json!({
            "number": self.sender_number,
            "recipients": [recipient],
        });
        if let (Some(body_map), Some(payload_map)) = (body.as_object_mut(), payload.as_object()) {
            for (key, value) in payload_map {
                body_map.insert(key.clone(), value.clone());
            }
        }

        // Two attempts for network errors; one extra retry for a 5xx on the
        // first attempt.
        for attempt in 0..2 {
            let response = match self
                .http
                .post(&url)
                .json(&body)
                .timeout(SEND_TIMEOUT)
                .send()
                .await
            {
                Ok(response) => response,
                Err(_) if attempt == 0 => {
                    tokio::time::sleep(NETWORK_RETRY_DELAY).await;
                    continue;
                }
                Err(_) => {
                    return Err(SendError::Network {
                        transport: "signal",
                        recipient: recipient.to_owned(),
                    });
                }
            };

            let status = response.status().as_u16();
            if status < 400 {
                return Ok(());
            }

            if (500..600).contains(&status) && attempt == 0 {
                tokio::time::sleep(NETWORK_RETRY_DELAY).await;
                continue;
            }

            let detail = extract_detail(response).await;
            return Err(SendError::Status {
                transport: "signal",
                status,
                recipient: recipient.to_owned(),
                detail,
            });
        }

        Err(SendError::Network {
            transport: "signal",
            recipient: recipient.to_owned(),
        })
    }
}

async fn extract_detail(response: reqwest::Response) -> String {
    match response.json::<Value>().await {
        Ok(Value::Object(map)) => {
            let detail = map
                .get("error")
                .or_else(|| map.get("message"))
                .or_else(|| map.get("msg"))
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| Value::Object(map.clone()).to_string());
            compact_detail(&detail)
        }
        Ok(other) => compact_detail(&other.to_string()),
        Err(_) => compact_detail(""),
    }
}

#[async_trait]
impl MessengerClient for SignalClient {
    async fn send_text(
        &self,
        target: &Target,
        message: &str,
        fallback_recipient: Option<&str>,
    ) -> Result<(), SendError> {
        self.post_with_retry(target, json!({"message": message}), fallback_recipient)
            .await
    }

    async fn send_image(
        &self,
        target: &Target,
        image_bytes: &[u8],
        content_type: &str,
        caption: Option<&str>,
        fallback_recipient: Option<&str>,
    ) -> Result<(), SendError> {
        let ext = suffix_for_content_type(content_type);
        let attachment = format!(
            "data:{content_type};filename=image.{ext};base64,{}",
            BASE64.encode(image_bytes)
        );
        let mut payload = json!({"base64_attachments": [attachment]});
        if let Some(caption) = caption
            && let Some(map) = payload.as_object_mut()
        {
            map.insert("message".to_owned(), json!(caption));
        }
        self.post_with_retry(target, payload, fallback_recipient)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_data_url_is_well_formed() {
        let encoded = BASE64.encode(b"img");
        let attachment = format!("data:image/png;filename=image.png;base64,{encoded}");
        assert!(attachment.starts_with("data:image/png;filename=image.png;base64,"));
        assert!(attachment.ends_with(&encoded));
    }
}
