//! Yahoo text search via HTML scraping.

use async_trait::async_trait;
use rand::Rng;
use rand::distr::Alphanumeric;

use crate::error::{ProviderError, Result};
use crate::http::{FingerprintClient, random_browser_user_agent};
use crate::provider::{ProviderResult, SearchProvider};
use crate::text::{between, normalize_text, normalize_url, url_decode};

/// Yahoo text search via HTML scraping.
pub struct YahooProvider {
    client: FingerprintClient,
}

impl YahooProvider {
    pub fn new() -> Self {
        Self {
            client: FingerprintClient::with_user_agent(random_browser_user_agent()),
        }
    }
}

impl Default for YahooProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchProvider for YahooProvider {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    async fn search(&self, query: &str) -> Result<Vec<ProviderResult>> {
        // Yahoo result pages live under randomized URL tokens.
        let search_url = format!(
            "https://search.yahoo.com/search;_ylt={};_ylu={}",
            random_token(24),
            random_token(47),
        );

        let resp = self.client.get(&search_url, &[("p", query)], &[]).await?;

        if !resp.is_success() {
            return Err(ProviderError::BadStatus {
                provider: "yahoo",
                status: resp.status,
            });
        }

        Ok(parse_yahoo_results(&resp.text()))
    }
}

fn random_token(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

// ---------------------------------------------------------------------------
// HTML parsing
// ---------------------------------------------------------------------------

fn parse_yahoo_results(html: &str) -> Vec<ProviderResult> {
    let mut results = Vec::new();

    for chunk in html.split("relsrch").skip(1) {
        let Some(title_block_pos) = chunk.find("Title") else {
            continue;
        };
        let title_block = &chunk[title_block_pos..];

        let Some(href) = between(title_block, "href=\"", "\"") else {
            continue;
        };

        // Skip Bing ad clicks that Yahoo mixes in.
        if href.starts_with("https://www.bing.com/aclick?") {
            continue;
        }

        let title = title_block
            .find("<h3")
            .and_then(|h3| {
                let after = &title_block[h3..];
                after.find("</h3>").map(|end| normalize_text(&after[..end]))
            })
            .unwrap_or_default();

        let body = chunk
            .find("Text")
            .and_then(|pos| {
                let after = &chunk[pos..];
                let start = after.find('>')? + 1;
                let end = after[start..].find("</div>")?;
                Some(normalize_text(&after[start..start + end]))
            })
            .unwrap_or_default();

        let unwrapped = if href.contains("/RU=") {
            extract_yahoo_url(href)
        } else {
            href.to_owned()
        };
        let url = normalize_url(&unwrapped);
        if url.is_empty() {
            continue;
        }

        results.push(ProviderResult::text(title, url, body, "Yahoo"));
    }

    results
}

/// Unwrap Yahoo's `/RU=<encoded>/RK=.../RS=...` redirect wrapper.
pub(crate) fn extract_yahoo_url(wrapped: &str) -> String {
    let Some((_, tail)) = wrapped.split_once("/RU=") else {
        return wrapped.to_owned();
    };
    let encoded = tail
        .split("/RK=")
        .next()
        .unwrap_or(tail)
        .split("/RS=")
        .next()
        .unwrap_or(tail);
    url_decode(encoded)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_token_has_requested_length() {
        assert_eq!(random_token(24).len(), 24);
        assert_eq!(random_token(47).len(), 47);
    }

    #[test]
    fn extract_yahoo_url_unwraps_redirects() {
        let wrapped =
            "https://r.search.yahoo.com/_ylt=x/RU=https%3a%2f%2fexample.com%2fpage/RK=2/RS=abc";
        assert_eq!(extract_yahoo_url(wrapped), "https://example.com/page");
    }

    #[test]
    fn parse_results_extracts_title_and_body() {
        let html = r#"
            <div class="dd algo relsrch">
              <div class="compTitle Title"><a href="https://example.com/hit"><h3>Yahoo Hit</h3></a></div>
              <div class="compText Text">Body of the result.</div>
            </div>
        "#;
        let results = parse_yahoo_results(html);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Yahoo Hit");
        assert_eq!(results[0].url, "https://example.com/hit");
        assert!(results[0].snippet.contains("Body of the result."));
    }

    #[test]
    fn parse_results_filters_ad_clicks() {
        let html = r#"
            <div class="relsrch">
              <div class="Title"><a href="https://www.bing.com/aclick?x=1"><h3>Ad</h3></a></div>
            </div>
        "#;
        assert!(parse_yahoo_results(html).is_empty());
    }
}
