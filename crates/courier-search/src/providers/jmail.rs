//! JMail (Epstein email archive) search.
//!
//! jmail.world is a Next.js app; the search page streams an RSC payload in
//! which result threads appear as `EFTA########` document ids.  Each thread
//! page then carries the usable metadata in its `<title>`, `og:description`,
//! and JSON-LD blocks.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::error::{ProviderError, Result};
use crate::http::FingerprintClient;
use crate::provider::{ProviderResult, SearchProvider};
use crate::text::{between, normalize_text};

const RESULT_LIMIT: usize = 10;
const SITE_DESC_MARKER: &str = "Interactive archive of Jeffrey Epstein";

static EFTA_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"EFTA[0-9]{8}").expect("static regex"));
static DATE_PUBLISHED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""datePublished":"(.*?)""#).expect("static regex"));
static OG_DESCRIPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"property="og:description"\s+content="(.*?)""#).expect("static regex")
});
static ARTICLE_DESCRIPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""@type":"Article".*?"description":"(.*?)""#).expect("static regex")
});
static QUOTED_BLOB_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""(.*?)""#).expect("static regex"));

/// JMail search provider extracting data from Next.js RSC payloads.
pub struct JmailProvider {
    client: FingerprintClient,
}

impl JmailProvider {
    pub fn new() -> Self {
        Self {
            client: FingerprintClient::with_user_agent(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            ),
        }
    }

    async fn fetch_thread_details(&self, doc_id: &str) -> Option<ProviderResult> {
        let url = format!("https://jmail.world/thread/{doc_id}?view=inbox");
        let resp = self.client.get(&url, &[], &[]).await.ok()?;
        if !resp.is_success() {
            return None;
        }
        let html = resp.text();
        if html.is_empty() {
            return None;
        }
        Some(parse_thread_page(doc_id, &html))
    }
}

impl Default for JmailProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchProvider for JmailProvider {
    fn name(&self) -> &'static str {
        "jmail"
    }

    async fn search(&self, query: &str) -> Result<Vec<ProviderResult>> {
        // The RSC variant of the search page embeds the thread ids directly.
        let resp = self
            .client
            .get(
                "https://jmail.world/search",
                &[("q", query)],
                &[
                    ("Accept", "text/x-component"),
                    (
                        "Next-Router-State-Tree",
                        "%5B%22%22%2C%7B%22children%22%3A%5B%22(joogle)%22%2C%7B%22children%22%3A%5B%22search%22%2C%7B%22children%22%3A%5B%22__PAGE__%22%2C%7B%7D%5D%7D%5D%7D%5D%7D%5D",
                    ),
                ],
            )
            .await?;

        if !resp.is_success() {
            return Err(ProviderError::BadStatus {
                provider: "jmail",
                status: resp.status,
            });
        }

        let body = resp.text();
        let doc_ids: BTreeSet<String> = EFTA_ID_RE
            .find_iter(&body)
            .map(|m| m.as_str().to_owned())
            .collect();
        debug!(count = doc_ids.len(), "jmail thread ids extracted");

        let mut results = Vec::new();
        for doc_id in doc_ids.into_iter().take(RESULT_LIMIT) {
            if let Some(result) = self.fetch_thread_details(&doc_id).await {
                results.push(result);
            }
        }
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// Thread page parsing
// ---------------------------------------------------------------------------

fn parse_thread_page(doc_id: &str, html: &str) -> ProviderResult {
    let title = between(html, "<title>", "</title>")
        .map(|t| normalize_text(&t.replace("— Epstein Emails", "")))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| format!("JMail Email {doc_id}"));

    let date = DATE_PUBLISHED_RE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().split('T').next().unwrap_or("").to_owned())
        .filter(|d| !d.is_empty());

    // Body: og:description, then JSON-LD Article description, then any
    // long-ish clean string that is not the site-wide blurb.
    let mut body = OG_DESCRIPTION_RE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| unescape_json_fragment(m.as_str()))
        .filter(|text| !text.contains(SITE_DESC_MARKER))
        .map(|text| normalize_text(&text))
        .unwrap_or_default();

    if body.is_empty() {
        body = ARTICLE_DESCRIPTION_RE
            .captures(html)
            .and_then(|c| c.get(1))
            .map(|m| unescape_json_fragment(m.as_str()))
            .filter(|text| !text.contains(SITE_DESC_MARKER))
            .map(|text| normalize_text(&text))
            .unwrap_or_default();
    }

    if body.is_empty() {
        for captures in QUOTED_BLOB_RE.captures_iter(html) {
            let Some(blob) = captures.get(1) else {
                continue;
            };
            let text = normalize_text(&unescape_json_fragment(blob.as_str()));
            if text.len() > 50
                && !text.contains(SITE_DESC_MARKER)
                && !text.contains('{')
                && !text.contains('[')
                && !text.starts_with('$')
                && !text.starts_with("animation:")
            {
                body = text;
                break;
            }
        }
    }

    ProviderResult {
        title,
        url: format!("https://jmail.world/thread/{doc_id}"),
        snippet: body,
        source: Some("JMail".to_owned()),
        date,
        image_url: None,
    }
}

/// Undo the `\uXXXX` and `\"`-style escapes found in inline JSON fragments.
fn unescape_json_fragment(fragment: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{fragment}\"")).unwrap_or_else(|_| {
        fragment
            .replace("\\\"", "\"")
            .replace("\\n", " ")
            .replace("\\t", " ")
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn efta_ids_are_extracted_and_deduped() {
        let body = "x EFTA02639428 y EFTA02639428 z EFTA00000001";
        let ids: BTreeSet<String> = EFTA_ID_RE
            .find_iter(body)
            .map(|m| m.as_str().to_owned())
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("EFTA00000001"));
    }

    #[test]
    fn thread_page_prefers_og_description() {
        let html = concat!(
            "<title>Re: dinner — Epstein Emails</title>",
            r#"<meta property="og:description" content="From J to G about dinner plans."/>"#,
            r#"<script>{"datePublished":"2013-11-11T16:31:14.000Z"}</script>"#,
        );
        let result = parse_thread_page("EFTA02639428", html);
        assert_eq!(result.title, "Re: dinner");
        assert_eq!(result.snippet, "From J to G about dinner plans.");
        assert_eq!(result.date.as_deref(), Some("2013-11-11"));
        assert_eq!(result.url, "https://jmail.world/thread/EFTA02639428");
    }

    #[test]
    fn thread_page_skips_site_wide_description() {
        let html = concat!(
            "<title>T</title>",
            r#"<meta property="og:description" content="Interactive archive of Jeffrey Epstein emails."/>"#,
            r#"{"@type":"Article","x":1,"description":"Actual thread body text."}"#,
        );
        let result = parse_thread_page("EFTA00000002", html);
        assert_eq!(result.snippet, "Actual thread body text.");
    }

    #[test]
    fn thread_page_falls_back_to_doc_id_title() {
        let result = parse_thread_page("EFTA00000003", "<html></html>");
        assert_eq!(result.title, "JMail Email EFTA00000003");
        assert_eq!(result.snippet, "");
    }

    #[test]
    fn json_fragment_unescaping() {
        assert_eq!(unescape_json_fragment("a \\\"quote\\\""), "a \"quote\"");
        assert_eq!(unescape_json_fragment("plain"), "plain");
    }
}
