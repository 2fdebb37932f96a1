//! Google text search via HTML scraping.
//!
//! Google serves a simplified results page to legacy Opera Mini user agents,
//! which is far easier to scrape than the full page.  Randomized HTTP/2
//! sessions tend to die with HPACK table-size errors against Google, so this
//! provider forces HTTP/1.1 from the start.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use rand::seq::IndexedRandom;

use crate::error::{ProviderError, Result};
use crate::http::FingerprintClient;
use crate::provider::{ProviderResult, SearchProvider};
use crate::text::{normalize_text, normalize_url};

const SNIPPET_CAP: usize = 300;

/// Google text search via HTML scraping.
pub struct GoogleProvider {
    client: FingerprintClient,
    region: String,
}

impl GoogleProvider {
    pub fn new() -> Self {
        Self::with_region("us-en")
    }

    pub fn with_region(region: &str) -> Self {
        Self {
            client: FingerprintClient::with_options(
                Some(&opera_mini_user_agent()),
                Duration::from_secs(10),
                false,
            ),
            region: region.to_owned(),
        }
    }
}

impl Default for GoogleProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchProvider for GoogleProvider {
    fn name(&self) -> &'static str {
        "google"
    }

    async fn search(&self, query: &str) -> Result<Vec<ProviderResult>> {
        let (country, lang) = self.region.split_once('-').unwrap_or(("us", "en"));
        let hl = format!("{lang}-{}", country.to_uppercase());
        let lr = format!("lang_{lang}");
        let cr = format!("country{}", country.to_uppercase());

        let resp = self
            .client
            .get(
                "https://www.google.com/search",
                &[("q", query), ("hl", &hl), ("lr", &lr), ("cr", &cr)],
                &[],
            )
            .await?;

        if !resp.is_success() {
            return Err(ProviderError::BadStatus {
                provider: "google",
                status: resp.status,
            });
        }

        Ok(parse_google_results(&resp.text()))
    }
}

// ---------------------------------------------------------------------------
// User-Agent generation
// ---------------------------------------------------------------------------

/// Build a randomized Opera Mini User-Agent string.
fn opera_mini_user_agent() -> String {
    const PATTERNS: &[&str] = &[
        "Opera/9.80 (J2ME/MIDP; Opera Mini/{v}/{b}; U; {l}) Presto/{p} Version/{f}",
        "Opera/9.80 (Android; Linux; Opera Mobi/{b}; U; {l}) Presto/{p} Version/{f}",
        "Opera/9.80 (iPhone; Opera Mini/{v}/{b}; U; {l}) Presto/{p} Version/{f}",
        "Opera/9.80 (iPad; Opera Mini/{v}/{b}; U; {l}) Presto/{p} Version/{f}",
    ];
    const MINI_VERSIONS: &[&str] = &["4.0", "5.0.17381", "7.1.32444", "9.80"];
    const MOBI_BUILDS: &[&str] = &["27", "447", "ADR-1011151731"];
    const BUILDS: &[&str] = &["18.678", "24.743", "503"];
    const PRESTOS: &[&str] = &["2.6.35", "2.7.60", "2.8.119"];
    const FINALS: &[&str] = &["10.00", "11.10", "12.16"];
    const LANGS: &[&str] = &["en-US", "en-GB", "de-DE", "fr-FR", "es-ES", "ru-RU", "zh-CN"];

    let mut rng = rand::rng();
    let pattern = PATTERNS[rng.random_range(0..PATTERNS.len())];
    let build = if pattern.contains("Opera Mobi") {
        MOBI_BUILDS.choose(&mut rng).copied()
    } else {
        BUILDS.choose(&mut rng).copied()
    };

    pattern
        .replace(
            "{v}",
            MINI_VERSIONS.choose(&mut rng).copied().unwrap_or("5.0.17381"),
        )
        .replace("{b}", build.unwrap_or("503"))
        .replace("{l}", LANGS.choose(&mut rng).copied().unwrap_or("en-US"))
        .replace("{p}", PRESTOS.choose(&mut rng).copied().unwrap_or("2.6.35"))
        .replace("{f}", FINALS.choose(&mut rng).copied().unwrap_or("11.10"))
}

// ---------------------------------------------------------------------------
// HTML parsing
// ---------------------------------------------------------------------------

fn parse_google_results(html: &str) -> Vec<ProviderResult> {
    let mut results = Vec::new();
    let mut rest = html;

    while let Some(anchor_pos) = rest.find("<a href=\"") {
        let after_href = &rest[anchor_pos + "<a href=\"".len()..];
        let Some(href_end) = after_href.find('"') else {
            break;
        };
        let raw_href = &after_href[..href_end];

        let Some(anchor_end) = after_href.find("</a>") else {
            break;
        };
        let anchor_body = &after_href[href_end..anchor_end];

        // Only anchors wrapping an <h3> are organic results.
        if anchor_body.contains("<h3") {
            let title = normalize_text(anchor_body);
            let href = unwrap_google_redirect(raw_href);
            let href = normalize_url(&href);

            if !href.is_empty() && !href.starts_with('/') {
                // The snippet follows the anchor; grab the text run up to the
                // next result anchor.
                let after_anchor = &after_href[anchor_end + "</a>".len()..];
                let window_end = after_anchor.find("<a href=\"").unwrap_or(after_anchor.len());
                let mut snippet = normalize_text(&after_anchor[..window_end]);
                if snippet.len() > SNIPPET_CAP {
                    snippet = truncate_on_char_boundary(&snippet, SNIPPET_CAP);
                }

                results.push(ProviderResult::text(title, href, snippet, "Google"));
            }
        }

        rest = &after_href[anchor_end + "</a>".len()..];
    }

    results
}

/// Extract the real URL from a Google `/url?q=` redirect.
fn unwrap_google_redirect(href: &str) -> String {
    if let Some(stripped) = href.strip_prefix("/url?q=") {
        return stripped
            .split('&')
            .next()
            .unwrap_or(stripped)
            .to_owned();
    }
    href.to_owned()
}

fn truncate_on_char_boundary(text: &str, cap: usize) -> String {
    let mut end = cap;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].trim_end().to_owned()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opera_ua_has_presto_fragment() {
        let ua = opera_mini_user_agent();
        assert!(ua.starts_with("Opera/9.80"));
        assert!(ua.contains("Presto/"));
    }

    #[test]
    fn parse_results_reads_h3_anchors() {
        let html = r#"
            <a href="/url?q=https://example.com/page&amp;sa=U"><h3>Example Page</h3></a>
            <div>Snippet text about the example page.</div>
            <a href="/settings">Settings</a>
            <a href="https://other.example/x"><h3>Other</h3></a>
            <div>Other snippet.</div>
        "#;
        let results = parse_google_results(html);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].url, "https://example.com/page");
        assert_eq!(results[0].title, "Example Page");
        assert!(results[0].snippet.contains("Snippet text"));
        assert_eq!(results[1].url, "https://other.example/x");
    }

    #[test]
    fn parse_results_skips_relative_links() {
        let html = r#"<a href="/search?q=x"><h3>More</h3></a>"#;
        assert!(parse_google_results(html).is_empty());
    }

    #[test]
    fn redirect_unwrapping() {
        assert_eq!(
            unwrap_google_redirect("/url?q=https://a.example/b&sa=U&ved=1"),
            "https://a.example/b"
        );
        assert_eq!(
            unwrap_google_redirect("https://direct.example"),
            "https://direct.example"
        );
    }
}
