//! Bing news search via the infinite-scroll AJAX endpoint.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use regex::Regex;

use crate::error::{ProviderError, Result};
use crate::http::{FingerprintClient, random_browser_user_agent};
use crate::provider::{ProviderResult, SearchProvider};
use crate::text::{between, normalize_text};

const RESULT_LIMIT: usize = 10;

static RELATIVE_DAYS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d+)\s*(days|tagen|jours|giorni|dias|días|дн\.|день)?\b")
        .expect("static regex")
});

/// Bing news search via HTML scraping.
pub struct BingNewsProvider {
    client: FingerprintClient,
}

impl BingNewsProvider {
    pub fn new() -> Self {
        Self {
            client: FingerprintClient::with_user_agent(random_browser_user_agent()),
        }
    }
}

impl Default for BingNewsProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchProvider for BingNewsProvider {
    fn name(&self) -> &'static str {
        "bing_news"
    }

    async fn search(&self, query: &str) -> Result<Vec<ProviderResult>> {
        let resp = self
            .client
            .get(
                "https://www.bing.com/news/infinitescrollajax",
                &[
                    ("q", query),
                    ("InfiniteScroll", "1"),
                    ("first", "1"),
                    ("SFX", "1"),
                ],
                &[],
            )
            .await?;

        if !resp.is_success() {
            return Err(ProviderError::BadStatus {
                provider: "bing_news",
                status: resp.status,
            });
        }

        Ok(parse_bing_news(&resp.text()))
    }
}

// ---------------------------------------------------------------------------
// HTML parsing
// ---------------------------------------------------------------------------

fn parse_bing_news(html: &str) -> Vec<ProviderResult> {
    let mut results = Vec::new();

    for chunk in html.split("class=\"newsitem").skip(1) {
        if results.len() >= RESULT_LIMIT {
            break;
        }

        // The news card carries its metadata as element attributes.
        let tag_end = chunk.find('>').unwrap_or(chunk.len());
        let tag = &chunk[..tag_end];

        let title = attribute_value(tag, "data-title").unwrap_or_default();
        let url = attribute_value(tag, "url").unwrap_or_default();
        let source = attribute_value(tag, "data-author").unwrap_or_default();
        if url.is_empty() {
            continue;
        }

        let body = between(chunk, "class=\"snippet\"", "</div>")
            .map(normalize_text)
            .unwrap_or_default();
        let raw_date = between(chunk, "aria-label=\"", "\"")
            .map(str::trim)
            .unwrap_or_default();
        let date = if raw_date.is_empty() {
            None
        } else {
            Some(extract_date(raw_date))
        };

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
            title: normalize_text(&title),
            url,
            snippet: snippet_parts.join(" "),
            source: Some("Bing News".to_owned()),
            date,
            image_url: None,
        });
    }

    results
}

fn attribute_value(tag: &str, name: &str) -> Option<String> {
    let marker = format!("{name}=\"");
    between(tag, &marker, "\"").map(str::to_owned)
}

/// Normalize Bing's date strings.  Absolute dates map to ISO-8601; relative
/// "N days" strings are resolved against the current time; anything else
/// passes through.
fn extract_date(pub_date: &str) -> String {
    for format in ["%d.%m.%Y", "%m/%d/%Y", "%d/%m/%Y"] {
        if let Ok(date) = chrono::NaiveDate::parse_from_str(pub_date, format) {
            return date.format("%Y-%m-%dT00:00:00+00:00").to_string();
        }
    }

    if let Some(captures) = RELATIVE_DAYS_RE.captures(pub_date)
        && let Some(days) = captures.get(1).and_then(|m| m.as_str().parse::<i64>().ok())
    {
        let dt = Utc::now() - Duration::days(days);
        return dt.format("%Y-%m-%dT%H:%M:%S+00:00").to_string();
    }

    pub_date.to_owned()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_news_reads_card_attributes() {
        let html = r#"
            <div class="newsitem cardcommon" data-title="Breaking Story" url="https://news.example/a" data-author="Example Times">
            <div class="snippet">Something happened today.</div>
            <span aria-label="2 days">2d</span>
            </div>
        "#;
        let results = parse_bing_news(html);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Breaking Story");
        assert_eq!(results[0].url, "https://news.example/a");
        assert!(results[0].snippet.starts_with("[Example Times]"));
        assert!(results[0].snippet.contains("Something happened today."));
        assert!(results[0].date.is_some());
    }

    #[test]
    fn parse_news_skips_urlless_cards() {
        let html = r#"<div class="newsitem" data-title="No link"></div>"#;
        assert!(parse_bing_news(html).is_empty());
    }

    #[test]
    fn extract_date_parses_absolute_formats() {
        assert!(extract_date("11/25/2024").starts_with("2024-11-25"));
        assert!(extract_date("25.11.2024").starts_with("2024-11-25"));
    }

    #[test]
    fn extract_date_resolves_relative_days() {
        let resolved = extract_date("3 days");
        // An ISO timestamp, not the raw string.
        assert!(resolved.contains('T'));
    }

    #[test]
    fn extract_date_passes_through_unknown() {
        assert_eq!(extract_date("yesterday-ish"), "yesterday-ish");
    }
}
