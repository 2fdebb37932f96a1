//! Lolcow wiki lookups (MediaWiki instances under wiki.lolcow.city).

use async_trait::async_trait;

use crate::error::{ProviderError, Result};
use crate::http::FingerprintClient;
use crate::provider::{ProviderResult, SearchProvider};
use crate::providers::wikipedia::{cap_chars, extract_first_page_text, parse_opensearch};

const SNIPPET_CAP: usize = 500;
const WIKI_USER_AGENT: &str = "courier-search/0.1.0 (https://github.com/courier-bot/courier; bot)";

/// Search provider for a single lolcow MediaWiki instance.
pub struct LolcowProvider {
    client: FingerprintClient,
    name: &'static str,
    source: &'static str,
    base_url: &'static str,
}

impl LolcowProvider {
    /// The Cyraxx wiki.
    pub fn cyraxx() -> Self {
        Self {
            client: FingerprintClient::with_user_agent(WIKI_USER_AGENT),
            name: "lolcow_cyraxx",
            source: "Cyraxx Wiki",
            base_url: "https://wiki.lolcow.city/cyraxx/api.php",
        }
    }

    /// The Daniel Larson wiki.
    pub fn larson() -> Self {
        Self {
            client: FingerprintClient::with_user_agent(WIKI_USER_AGENT),
            name: "lolcow_larson",
            source: "Daniel Larson Wiki",
            base_url: "https://wiki.lolcow.city/daniel-larson/api.php",
        }
    }

    async fn get_extract(&self, title: &str) -> String {
        let resp = self
            .client
            .get(
                self.base_url,
                &[
                    ("action", "query"),
                    ("format", "json"),
                    ("prop", "extracts"),
                    ("titles", title),
                    ("explaintext", "1"),
                    ("exintro", "1"),
                    ("redirects", "1"),
                ],
                &[],
            )
            .await;

        let Ok(resp) = resp else {
            return String::new();
        };
        match resp.json(self.name) {
            Ok(data) => extract_first_page_text(&data),
            Err(_) => String::new(),
        }
    }
}

#[async_trait]
impl SearchProvider for LolcowProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn search(&self, query: &str) -> Result<Vec<ProviderResult>> {
        let resp = self
            .client
            .get(
                self.base_url,
                &[
                    ("action", "opensearch"),
                    ("profile", "fuzzy"),
                    ("limit", "1"),
                    ("search", query),
                ],
                &[],
            )
            .await?;

        if !resp.is_success() {
            return Err(ProviderError::BadStatus {
                provider: self.name,
                status: resp.status,
            });
        }

        let data = resp.json(self.name)?;
        let Some((title, article_url)) = parse_opensearch(&data) else {
            return Ok(Vec::new());
        };

        let snippet = self.get_extract(&title).await;
        if snippet.contains("may refer to:") {
            return Ok(Vec::new());
        }

        Ok(vec![ProviderResult::text(
            title,
            article_url,
            cap_chars(&snippet, SNIPPET_CAP),
            self.source,
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_identity() {
        let cyraxx = LolcowProvider::cyraxx();
        assert_eq!(cyraxx.name(), "lolcow_cyraxx");
        assert!(cyraxx.base_url.contains("/cyraxx/"));

        let larson = LolcowProvider::larson();
        assert_eq!(larson.name(), "lolcow_larson");
        assert!(larson.base_url.contains("/daniel-larson/"));
        assert_eq!(larson.source, "Daniel Larson Wiki");
    }
}
