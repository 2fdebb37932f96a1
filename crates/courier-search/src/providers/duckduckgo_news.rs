//! DuckDuckGo news search via the `news.js` JSON endpoint.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ProviderError, Result};
use crate::http::FingerprintClient;
use crate::provider::{ProviderResult, SearchProvider};
use crate::providers::duckduckgo::fetch_vqd;
use crate::text::{normalize_date_from_unix, normalize_text, normalize_url};

const RESULT_LIMIT: usize = 10;

/// DuckDuckGo news search via JSON API (`news.js`).
pub struct DuckDuckGoNewsProvider {
    client: FingerprintClient,
    region: String,
}

impl DuckDuckGoNewsProvider {
    pub fn new() -> Self {
        Self {
            client: FingerprintClient::new(),
            region: "us-en".to_owned(),
        }
    }
}

impl Default for DuckDuckGoNewsProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoNewsProvider {
    fn name(&self) -> &'static str {
        "duckduckgo_news"
    }

    async fn search(&self, query: &str) -> Result<Vec<ProviderResult>> {
        let vqd = fetch_vqd(&self.client, query, "duckduckgo_news").await?;

        let resp = self
            .client
            .get(
                "https://duckduckgo.com/news.js",
                &[
                    ("l", self.region.as_str()),
                    ("o", "json"),
                    ("noamp", "1"),
                    ("q", query),
                    ("vqd", &vqd),
                    ("p", "-1"),
                ],
                &[],
            )
            .await?;

        if !resp.is_success() {
            return Err(ProviderError::BadStatus {
                provider: "duckduckgo_news",
                status: resp.status,
            });
        }

        let data = resp.json("duckduckgo_news")?;
        Ok(parse_news_payload(&data))
    }
}

fn parse_news_payload(data: &Value) -> Vec<ProviderResult> {
    let Some(items) = data.get("results").and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    let mut results = Vec::new();
    for item in items.iter().take(RESULT_LIMIT) {
        let title = normalize_text(item.get("title").and_then(|v| v.as_str()).unwrap_or(""));
        let url = normalize_url(item.get("url").and_then(|v| v.as_str()).unwrap_or(""));
        if url.is_empty() {
            continue;
        }
        let body = normalize_text(item.get("excerpt").and_then(|v| v.as_str()).unwrap_or(""));
        let date = match item.get("date") {
            Some(Value::Number(n)) => n.as_i64().map(normalize_date_from_unix),
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            _ => None,
        };
        let source = item
            .get("source")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let mut snippet_parts = Vec::new();
        if !source.is_empty() {
            snippet_parts.push(format!("[{source}]"));
        }
        if let Some(ref d) = date {
            snippet_parts.push(format!("({d})"));
        }
        if !body.is_empty() {
            snippet_parts.push(body);
        }

        results.push(ProviderResult {
            title,
            url,
            snippet: snippet_parts.join(" "),
            source: Some("DuckDuckGo News".to_owned()),
            date,
            image_url: None,
        });
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_news_payload_builds_snippets() {
        let data = json!({
            "results": [
                {
                    "title": "Big <b>story</b>",
                    "url": "https://news.example/a",
                    "excerpt": "It happened.",
                    "date": 1_730_000_000,
                    "source": "Example Wire"
                }
            ]
        });
        let results = parse_news_payload(&data);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Big story");
        assert!(results[0].snippet.starts_with("[Example Wire] (2024-10-27"));
        assert!(results[0].snippet.ends_with("It happened."));
    }

    #[test]
    fn parse_news_payload_skips_urlless_items() {
        let data = json!({"results": [{"title": "No link", "url": ""}]});
        assert!(parse_news_payload(&data).is_empty());
    }

    #[test]
    fn parse_news_payload_tolerates_missing_results() {
        assert!(parse_news_payload(&json!({})).is_empty());
    }
}
