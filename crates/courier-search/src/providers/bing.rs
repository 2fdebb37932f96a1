//! Bing text search via HTML scraping.

use async_trait::async_trait;

use crate::error::{ProviderError, Result};
use crate::http::{FingerprintClient, random_browser_user_agent};
use crate::provider::{ProviderResult, SearchProvider};
use crate::text::normalize_text;

/// Bing text search via HTML scraping of the `b_algo` result blocks.
pub struct BingProvider {
    client: FingerprintClient,
}

impl BingProvider {
    pub fn new() -> Self {
        Self {
            client: FingerprintClient::with_user_agent(random_browser_user_agent()),
        }
    }
}

impl Default for BingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchProvider for BingProvider {
    fn name(&self) -> &'static str {
        "bing"
    }

    async fn search(&self, query: &str) -> Result<Vec<ProviderResult>> {
        let resp = self
            .client
            .get("https://www.bing.com/search", &[("q", query)], &[])
            .await?;

        if !resp.is_success() {
            return Err(ProviderError::BadStatus {
                provider: "bing",
                status: resp.status,
            });
        }

        Ok(parse_bing_results(&resp.text()))
    }
}

// ---------------------------------------------------------------------------
// HTML parsing
// ---------------------------------------------------------------------------

fn parse_bing_results(html: &str) -> Vec<ProviderResult> {
    let mut results = Vec::new();

    for chunk in html.split("class=\"b_algo\"").skip(1) {
        // Each organic block leads with <h2><a href="...">Title</a></h2>.
        let Some(h2_pos) = chunk.find("<h2") else {
            continue;
        };
        let block = &chunk[h2_pos..];

        let Some(href_start) = block.find("href=\"") else {
            continue;
        };
        let after_href = &block[href_start + "href=\"".len()..];
        let Some(href_end) = after_href.find('"') else {
            continue;
        };
        let url = after_href[..href_end].to_owned();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            continue;
        }

        let title = match block.find("</h2>") {
            Some(h2_end) => normalize_text(&block[..h2_end]),
            None => continue,
        };

        // Caption paragraph, when present.
        let snippet = block
            .find("<p")
            .and_then(|p_start| {
                let after_p = &block[p_start..];
                after_p.find("</p>").map(|p_end| normalize_text(&after_p[..p_end]))
            })
            .unwrap_or_default();

        if !title.is_empty() {
            results.push(ProviderResult::text(title, url, snippet, "Bing"));
        }
    }

    results
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
