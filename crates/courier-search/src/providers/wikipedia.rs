//! Wikipedia search via the MediaWiki opensearch + extracts APIs.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ProviderError, Result};
use crate::http::FingerprintClient;
use crate::provider::{ProviderResult, SearchProvider};

const SNIPPET_CAP: usize = 500;

// Wikipedia requires a descriptive User-Agent.
const WIKI_USER_AGENT: &str = "courier-search/0.1.0 (https://github.com/courier-bot/courier; bot)";

/// Wikipedia article lookup: opensearch for the best title, then the intro
/// extract as the snippet.
pub struct WikipediaProvider {
    client: FingerprintClient,
    lang: String,
}

impl WikipediaProvider {
    pub fn new() -> Self {
        Self::with_lang("en")
    }

    pub fn with_lang(lang: &str) -> Self {
        Self {
            client: FingerprintClient::with_user_agent(WIKI_USER_AGENT),
            lang: lang.to_owned(),
        }
    }

    async fn get_extract(&self, title: &str) -> String {
        let url = format!("https://{}.wikipedia.org/w/api.php", self.lang);
        let resp = self
            .client
            .get(
                &url,
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
        let Ok(data) = resp.json("wikipedia") else {
            return String::new();
        };
        extract_first_page_text(&data)
    }
}

impl Default for WikipediaProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchProvider for WikipediaProvider {
    fn name(&self) -> &'static str {
        "wikipedia"
    }

    async fn search(&self, query: &str) -> Result<Vec<ProviderResult>> {
        let url = format!("https://{}.wikipedia.org/w/api.php", self.lang);
        let resp = self
            .client
            .get(
                &url,
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
                provider: "wikipedia",
                status: resp.status,
            });
        }

        let data = resp.json("wikipedia")?;
        let Some((title, article_url)) = parse_opensearch(&data) else {
            return Ok(Vec::new());
        };

        let snippet = self.get_extract(&title).await;
        // A disambiguation page is not a usable answer.
        if snippet.contains("may refer to:") {
            return Ok(Vec::new());
        }

        Ok(vec![ProviderResult::text(
            title,
            article_url,
            cap_chars(&snippet, SNIPPET_CAP),
            "Wikipedia",
        )])
    }
}

// ---------------------------------------------------------------------------
// Payload parsing (shared with the MediaWiki-backed wiki providers)
// ---------------------------------------------------------------------------

/// Opensearch format: `[query, [titles], [descriptions], [urls]]`.
pub(crate) fn parse_opensearch(data: &Value) -> Option<(String, String)> {
    let array = data.as_array()?;
    if array.len() < 4 {
        return None;
    }
    let title = array[1].as_array()?.first()?.as_str()?.to_owned();
    let url = array[3].as_array()?.first()?.as_str()?.to_owned();
    if title.is_empty() || url.is_empty() {
        return None;
    }
    Some((title, url))
}

/// Pull the `extract` text of the first page in a `query/pages` payload.
pub(crate) fn extract_first_page_text(data: &Value) -> String {
    data.pointer("/query/pages")
        .and_then(|pages| pages.as_object())
        .and_then(|pages| pages.values().next())
        .and_then(|page| page.get("extract"))
        .and_then(|extract| extract.as_str())
        .unwrap_or_default()
        .to_owned()
}

pub(crate) fn cap_chars(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        return text.to_owned();
    }
    text.chars().take(cap).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn opensearch_payload_parses() {
        let data = json!([
            "ada lovelace",
            ["Ada Lovelace"],
            [""],
            ["https://en.wikipedia.org/wiki/Ada_Lovelace"]
        ]);
        let (title, url) = parse_opensearch(&data).expect("hit");
        assert_eq!(title, "Ada Lovelace");
        assert_eq!(url, "https://en.wikipedia.org/wiki/Ada_Lovelace");
    }

    #[test]
    fn opensearch_rejects_empty_hits() {
        assert!(parse_opensearch(&json!(["q", [], [], []])).is_none());
        assert!(parse_opensearch(&json!({})).is_none());
    }

    #[test]
    fn extract_reads_first_page() {
        let data = json!({
            "query": {"pages": {"123": {"extract": "Ada Lovelace was a mathematician."}}}
        });
        assert_eq!(
            extract_first_page_text(&data),
            "Ada Lovelace was a mathematician."
        );
        assert_eq!(extract_first_page_text(&json!({})), "");
    }

    #[test]
    fn cap_chars_respects_unicode() {
        assert_eq!(cap_chars("héllo", 3), "hél");
        assert_eq!(cap_chars("ok", 10), "ok");
    }
}
