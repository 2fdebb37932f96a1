//! Yandex site-search via HTML scraping.

use async_trait::async_trait;
use rand::Rng;

use crate::error::{ProviderError, Result};
use crate::http::{FingerprintClient, random_browser_user_agent};
use crate::provider::{ProviderResult, SearchProvider};
use crate::text::{between, normalize_text, normalize_url};

/// Yandex text search via HTML scraping.
pub struct YandexProvider {
    client: FingerprintClient,
}

impl YandexProvider {
    pub fn new() -> Self {
        Self {
            client: FingerprintClient::with_user_agent(random_browser_user_agent()),
        }
    }
}

impl Default for YandexProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchProvider for YandexProvider {
    fn name(&self) -> &'static str {
        "yandex"
    }

    async fn search(&self, query: &str) -> Result<Vec<ProviderResult>> {
        let searchid = rand::rng().random_range(1_000_000..=9_999_999u32).to_string();
        let resp = self
            .client
            .get(
                "https://yandex.com/search/site/",
                &[("text", query), ("web", "1"), ("searchid", &searchid)],
                &[],
            )
            .await?;

        if !resp.is_success() {
            return Err(ProviderError::BadStatus {
                provider: "yandex",
                status: resp.status,
            });
        }

        Ok(parse_yandex_results(&resp.text()))
    }
}

// ---------------------------------------------------------------------------
// HTML parsing
// ---------------------------------------------------------------------------

fn parse_yandex_results(html: &str) -> Vec<ProviderResult> {
    let mut results: Vec<ProviderResult> = Vec::new();
    let mut seen_urls = std::collections::HashSet::new();

    // "serp-item" recurs inside BEM class names, so the same card can be
    // visited more than once; the URL set collapses those repeats.
    for chunk in html.split("serp-item").skip(1) {
        let Some(h3_pos) = chunk.find("<h3") else {
            continue;
        };
        let block = &chunk[h3_pos..];

        let Some(href) = between(block, "href=\"", "\"") else {
            continue;
        };
        let title = block
            .find("</h3>")
            .map(|end| normalize_text(&block[..end]))
            .unwrap_or_default();

        let body = block
            .find("text")
            .and_then(|pos| {
                let after = &block[pos..];
                let start = after.find('>')? + 1;
                let end = after[start..].find("</div>")?;
                Some(normalize_text(&after[start..start + end]))
            })
            .unwrap_or_default();

        let url = normalize_url(href);
        if url.is_empty() || !seen_urls.insert(url.clone()) {
            continue;
        }

        results.push(ProviderResult::text(title, url, body, "Yandex"));
    }

    results
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
