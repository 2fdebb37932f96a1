//! Yahoo News search via HTML scraping.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use regex::Regex;

use crate::error::{ProviderError, Result};
use crate::http::{FingerprintClient, random_browser_user_agent};
use crate::provider::{ProviderResult, SearchProvider};
use crate::providers::yahoo::extract_yahoo_url;
use crate::text::{between, normalize_text, normalize_url};

const RESULT_LIMIT: usize = 10;

static RELATIVE_AGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d+)\s*(year|month|week|day|hour|minute)s?\b").expect("static regex")
});

/// Yahoo News search via HTML scraping.
pub struct YahooNewsProvider {
    client: FingerprintClient,
}

impl YahooNewsProvider {
    pub fn new() -> Self {
        Self {
            client: FingerprintClient::with_user_agent(random_browser_user_agent()),
        }
    }
}

impl Default for YahooNewsProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchProvider for YahooNewsProvider {
    fn name(&self) -> &'static str {
        "yahoo_news"
    }

    async fn search(&self, query: &str) -> Result<Vec<ProviderResult>> {
        let resp = self
            .client
            .get(
                "https://news.search.yahoo.com/search",
                &[("p", query)],
                &[],
            )
            .await?;

        if !resp.is_success() {
            return Err(ProviderError::BadStatus {
                provider: "yahoo_news",
                status: resp.status,
            });
        }

        Ok(parse_yahoo_news(&resp.text()))
    }
}

// ---------------------------------------------------------------------------
// HTML parsing
// ---------------------------------------------------------------------------

fn parse_yahoo_news(html: &str) -> Vec<ProviderResult> {
    let mut results = Vec::new();

    // Result cards lead with an <h4> headline anchor.
    for chunk in html.split("<h4").skip(1) {
        if results.len() >= RESULT_LIMIT {
            break;
        }

        let Some(href) = between(chunk, "href=\"", "\"") else {
            continue;
        };
        let title = chunk
            .find('>')
            .and_then(|start| {
                let after = &chunk[start + 1..];
                after.find("</h4>").map(|end| normalize_text(&after[..end]))
            })
            .unwrap_or_default();

        let body = between(chunk, "<p", "</p>")
            .map(normalize_text)
            .unwrap_or_default();
        let raw_source = find_span_text(chunk, "s-source").unwrap_or_default();
        let raw_time = find_span_text(chunk, "s-time").unwrap_or_default();

        let source = raw_source
            .split(" ·  via Yahoo")
            .next()
            .unwrap_or(&raw_source)
            .trim()
            .to_owned();
        let date = if raw_time.is_empty() {
            None
        } else {
            Some(resolve_relative_age(&raw_time))
        };

        let unwrapped = if href.contains("/RU=") {
            extract_yahoo_url(href)
        } else {
            href.to_owned()
        };
        let url = normalize_url(&unwrapped);
        if url.is_empty() {
            continue;
        }

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
            source: Some("Yahoo News".to_owned()),
            date,
            image_url: None,
        });
    }

    results
}

/// Pull the text of a `<span class="...{class_fragment}...">` element.
fn find_span_text(chunk: &str, class_fragment: &str) -> Option<String> {
    let pos = chunk.find(class_fragment)?;
    let after = &chunk[pos..];
    let start = after.find('>')? + 1;
    let end = after[start..].find("</span>")?;
    Some(normalize_text(&after[start..start + end]))
}

/// Resolve "3 hours ago"-style ages to ISO timestamps; pass through anything
/// that does not look relative.
fn resolve_relative_age(age: &str) -> String {
    let Some(captures) = RELATIVE_AGE_RE.captures(age) else {
        return age.to_owned();
    };
    let Some(number) = captures.get(1).and_then(|m| m.as_str().parse::<i64>().ok()) else {
        return age.to_owned();
    };
    let seconds = match captures
        .get(2)
        .map(|m| m.as_str().to_ascii_lowercase())
        .as_deref()
    {
        Some("minute") => 60,
        Some("hour") => 3_600,
        Some("day") => 86_400,
        Some("week") => 604_800,
        Some("month") => 2_592_000,
        Some("year") => 31_536_000,
        _ => 86_400,
    };
    let dt = Utc::now() - Duration::seconds(seconds * number);
    dt.format("%Y-%m-%dT%H:%M:%S+00:00").to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_news_reads_headline_cards() {
        let html = r#"
            <div id="web"><ol><li>
            <h4 class="s-title"><a href="https://news.example/story">Headline One</a></h4>
            <span class="s-source">Example Daily ·  via Yahoo</span>
            <span class="s-time">2 hours ago</span>
            <p class="s-desc">The story body.</p>
            </li></ol></div>
        "#;
        let results = parse_yahoo_news(html);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Headline One");
        assert_eq!(results[0].url, "https://news.example/story");
        assert!(results[0].snippet.starts_with("[Example Daily]"));
        assert!(results[0].snippet.contains("The story body."));
        assert!(results[0].date.as_deref().unwrap().contains('T'));
    }

    #[test]
    fn relative_ages_resolve_to_timestamps() {
        assert!(resolve_relative_age("5 minutes ago").contains('T'));
        assert!(resolve_relative_age("1 year ago").contains('T'));
        assert_eq!(resolve_relative_age("sometime"), "sometime");
    }
}
