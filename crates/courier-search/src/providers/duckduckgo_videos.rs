//! DuckDuckGo video search via the `v.js` JSON endpoint.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ProviderError, Result};
use crate::http::FingerprintClient;
use crate::provider::{ProviderResult, SearchProvider};
use crate::providers::duckduckgo::fetch_vqd;
use crate::text::normalize_text;

const RESULT_LIMIT: usize = 10;

/// DuckDuckGo video search via JSON API (`v.js`).
pub struct DuckDuckGoVideosProvider {
    client: FingerprintClient,
    region: String,
}

impl DuckDuckGoVideosProvider {
    pub fn new() -> Self {
        Self {
            client: FingerprintClient::new(),
            region: "us-en".to_owned(),
        }
    }
}

impl Default for DuckDuckGoVideosProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoVideosProvider {
    fn name(&self) -> &'static str {
        "duckduckgo_videos"
    }

    async fn search(&self, query: &str) -> Result<Vec<ProviderResult>> {
        let vqd = fetch_vqd(&self.client, query, "duckduckgo_videos").await?;

        let resp = self
            .client
            .get(
                "https://duckduckgo.com/v.js",
                &[
                    ("l", self.region.as_str()),
                    ("o", "json"),
                    ("q", query),
                    ("vqd", &vqd),
                    ("f", ",,,"),
                    ("p", "-1"),
                ],
                &[],
            )
            .await?;

        if !resp.is_success() {
            return Err(ProviderError::BadStatus {
                provider: "duckduckgo_videos",
                status: resp.status,
            });
        }

        let data = resp.json("duckduckgo_videos")?;
        Ok(parse_videos_payload(&data))
    }
}

fn parse_videos_payload(data: &Value) -> Vec<ProviderResult> {
    let Some(items) = data.get("results").and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    let mut results = Vec::new();
    for item in items.iter().take(RESULT_LIMIT) {
        let title = normalize_text(item.get("title").and_then(|v| v.as_str()).unwrap_or(""));
        let content_url = item
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_owned();
        if content_url.is_empty() {
            continue;
        }
        let description = normalize_text(
            item.get("description")
                .and_then(|v| v.as_str())
                .unwrap_or(""),
        );
        let duration = item
            .get("duration")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let publisher = item
            .get("publisher")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let uploader = item
            .get("uploader")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let published = item
            .get("published")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let thumbnail = item
            .get("images")
            .and_then(|v| v.get("medium").or_else(|| v.get("small")))
            .and_then(|v| v.as_str())
            .map(str::to_owned);

        let by = if uploader.is_empty() { publisher } else { uploader };
        let mut snippet_parts = Vec::new();
        if !by.is_empty() {
            snippet_parts.push(format!("by {by}"));
        }
        if !duration.is_empty() {
            snippet_parts.push(format!("[{duration}]"));
        }
        if !published.is_empty() {
            snippet_parts.push(format!("({published})"));
        }
        if !description.is_empty() {
            snippet_parts.push(description);
        }

        results.push(ProviderResult {
            title,
            url: content_url,
            snippet: snippet_parts.join(" "),
            source: Some("DuckDuckGo Videos".to_owned()),
            date: None,
            image_url: thumbnail,
        });
    }

    results
}
