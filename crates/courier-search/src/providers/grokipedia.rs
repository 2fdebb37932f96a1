//! Grokipedia lookup via the typeahead JSON API.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ProviderError, Result};
use crate::http::FingerprintClient;
use crate::provider::{ProviderResult, SearchProvider};
use crate::providers::wikipedia::cap_chars;

const SNIPPET_CAP: usize = 500;

/// Grokipedia text search via JSON API.
pub struct GrokipediaProvider {
    client: FingerprintClient,
}

impl GrokipediaProvider {
    pub fn new() -> Self {
        Self {
            client: FingerprintClient::new(),
        }
    }
}

impl Default for GrokipediaProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchProvider for GrokipediaProvider {
    fn name(&self) -> &'static str {
        "grokipedia"
    }

    async fn search(&self, query: &str) -> Result<Vec<ProviderResult>> {
        let resp = self
            .client
            .get(
                "https://grokipedia.com/api/typeahead",
                &[("query", query), ("limit", "1")],
                &[],
            )
            .await?;

        if !resp.is_success() {
            return Err(ProviderError::BadStatus {
                provider: "grokipedia",
                status: resp.status,
            });
        }

        let data = resp.json("grokipedia")?;
        Ok(parse_typeahead(&data))
    }
}

fn parse_typeahead(data: &Value) -> Vec<ProviderResult> {
    let Some(item) = data
        .get("results")
        .and_then(|v| v.as_array())
        .and_then(|items| items.first())
    else {
        return Vec::new();
    };

    let title = item
        .get("title")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .trim_matches('_')
        .to_owned();
    let mut body = item
        .get("snippet")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    // The snippet leads with a heading block separated by a blank line.
    if let Some((_, rest)) = body.split_once("\n\n") {
        body = rest;
    }
    let slug = item
        .get("slug")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    if slug.is_empty() {
        return Vec::new();
    }

    vec![ProviderResult::text(
        title,
        format!("https://grokipedia.com/page/{slug}"),
        cap_chars(body, SNIPPET_CAP),
        "Grokipedia",
    )]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn typeahead_parses_first_result() {
        let data = json!({
            "results": [{
                "title": "_Ada_Lovelace_",
                "snippet": "Heading\n\nThe real body.",
                "slug": "Ada_Lovelace"
            }]
        });
        let results = parse_typeahead(&data);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Ada_Lovelace");
        assert_eq!(results[0].url, "https://grokipedia.com/page/Ada_Lovelace");
        assert_eq!(results[0].snippet, "The real body.");
    }

    #[test]
    fn typeahead_requires_slug() {
        let data = json!({"results": [{"title": "x", "snippet": "y"}]});
        assert!(parse_typeahead(&data).is_empty());
        assert!(parse_typeahead(&json!({})).is_empty());
    }
}
