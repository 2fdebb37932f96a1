//! DuckDuckGo image search via the `i.js` JSON endpoint.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ProviderError, Result};
use crate::http::FingerprintClient;
use crate::provider::{ProviderResult, SearchProvider};
use crate::providers::duckduckgo::fetch_vqd;
use crate::text::{normalize_text, normalize_url};

const RESULT_LIMIT: usize = 10;

/// DuckDuckGo image search via JSON API (`i.js`).
pub struct DuckDuckGoImagesProvider {
    client: FingerprintClient,
    region: String,
}

impl DuckDuckGoImagesProvider {
    pub fn new() -> Self {
        Self {
            client: FingerprintClient::new(),
            region: "us-en".to_owned(),
        }
    }
}

impl Default for DuckDuckGoImagesProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoImagesProvider {
    fn name(&self) -> &'static str {
        "duckduckgo_images"
    }

    async fn search(&self, query: &str) -> Result<Vec<ProviderResult>> {
        let vqd = fetch_vqd(&self.client, query, "duckduckgo_images").await?;

        let resp = self
            .client
            .get(
                "https://duckduckgo.com/i.js",
                &[
                    ("o", "json"),
                    ("q", query),
                    ("l", self.region.as_str()),
                    ("vqd", &vqd),
                    ("p", "1"),
                ],
                &[
                    ("Referer", "https://duckduckgo.com/"),
                    ("Sec-Fetch-Mode", "cors"),
                ],
            )
            .await?;

        if !resp.is_success() {
            return Err(ProviderError::BadStatus {
                provider: "duckduckgo_images",
                status: resp.status,
            });
        }

        let data = resp.json("duckduckgo_images")?;
        Ok(parse_images_payload(&data))
    }
}

fn parse_images_payload(data: &Value) -> Vec<ProviderResult> {
    let Some(items) = data.get("results").and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    let mut results = Vec::new();
    for item in items.iter().take(RESULT_LIMIT) {
        let title = normalize_text(item.get("title").and_then(|v| v.as_str()).unwrap_or(""));
        let image_url = normalize_url(item.get("image").and_then(|v| v.as_str()).unwrap_or(""));
        let thumbnail =
            normalize_url(item.get("thumbnail").and_then(|v| v.as_str()).unwrap_or(""));
        let source_url = normalize_url(item.get("url").and_then(|v| v.as_str()).unwrap_or(""));
        let width = item.get("width").and_then(|v| v.as_u64());
        let height = item.get("height").and_then(|v| v.as_u64());
        let source = item
            .get("source")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let url = if image_url.is_empty() {
            source_url
        } else {
            image_url.clone()
        };
        if url.is_empty() {
            continue;
        }

        let mut snippet_parts = Vec::new();
        if let (Some(w), Some(h)) = (width, height) {
            snippet_parts.push(format!("{w}x{h}"));
        }
        if !source.is_empty() {
            snippet_parts.push(format!("Source: {source}"));
        }
        if !thumbnail.is_empty() {
            snippet_parts.push(format!("Thumbnail: {thumbnail}"));
        }

        results.push(ProviderResult {
            title,
            url,
            snippet: snippet_parts.join(" | "),
            source: Some("DuckDuckGo Images".to_owned()),
            date: None,
            image_url: if image_url.is_empty() {
                None
            } else {
                Some(image_url)
            },
        });
    }

    results
}
