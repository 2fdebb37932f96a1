//! DuckDuckGo text search via the HTML endpoint.

use async_trait::async_trait;
use tracing::debug;

use crate::error::{ProviderError, Result};
use crate::http::{FingerprintClient, random_browser_user_agent};
use crate::provider::{ProviderResult, SearchProvider};
use crate::text::{normalize_text, url_decode};

const DUCKDUCKGO_HTML_URL: &str = "https://html.duckduckgo.com/html/";

// Markup classes on the result cards.
const RESULT_LINK_CLASS: &str = "result__a";
const RESULT_SNIPPET_CLASS: &str = "result__snippet";

/// DuckDuckGo text search via HTML scraping.
pub struct DuckDuckGoProvider {
    client: FingerprintClient,
    region: String,
}

impl DuckDuckGoProvider {
    pub fn new() -> Self {
        Self::with_region("us-en")
    }

    pub fn with_region(region: &str) -> Self {
        Self {
            client: FingerprintClient::with_user_agent(random_browser_user_agent()),
            region: region.to_owned(),
        }
    }
}

impl Default for DuckDuckGoProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoProvider {
    fn name(&self) -> &'static str {
        "duckduckgo"
    }

    async fn search(&self, query: &str) -> Result<Vec<ProviderResult>> {
        // The html endpoint takes the query as a urlencoded form POST.
        let resp = self
            .client
            .post_form(
                DUCKDUCKGO_HTML_URL,
                &[
                    ("q", query),
                    ("b", ""),
                    ("l", &self.region),
                    ("kl", &self.region),
                ],
            )
            .await?;

        if !resp.is_success() {
            return Err(ProviderError::BadStatus {
                provider: "duckduckgo",
                status: resp.status,
            });
        }

        let results = scrape_results(&resp.text());
        debug!(count = results.len(), "duckduckgo search complete");
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// HTML parsing
// ---------------------------------------------------------------------------

/// Scrape the result cards out of a DDG html-endpoint page.
///
/// Each organic hit renders as an `<a>` tag whose class list carries
/// `result__a`; the card's snippet element follows it before the next hit's
/// anchor.  The page is treated as a flat sequence of such anchors, each
/// owning the markup up to its successor.
pub(crate) fn scrape_results(html: &str) -> Vec<ProviderResult> {
    let anchors = result_anchor_offsets(html);
    let mut hits = Vec::new();

    for (index, &start) in anchors.iter().enumerate() {
        let block_end = anchors.get(index + 1).copied().unwrap_or(html.len());
        let block = &html[start..block_end];

        let Some(tag_len) = block.find('>') else {
            continue;
        };
        let href = tag_attribute(&block[..tag_len], "href").unwrap_or_default();
        let url = resolve_ddg_link(href);
        if url.is_empty() || is_ddg_ad_link(&url) {
            continue;
        }

        let after_tag = &block[tag_len + 1..];
        let title = normalize_text(after_tag.split("</a>").next().unwrap_or(""));
        let snippet = marked_element_text(after_tag, RESULT_SNIPPET_CLASS);

        hits.push(ProviderResult::text(title, url, snippet, "DuckDuckGo"));
    }

    hits
}

/// Offsets of every `<a …>` tag whose attribute list marks a result link.
fn result_anchor_offsets(html: &str) -> Vec<usize> {
    let mut offsets = Vec::new();
    let mut scan = 0;
    while let Some(found) = html[scan..].find("<a") {
        let at = scan + found;
        let Some(tag_len) = html[at..].find('>') else {
            break;
        };
        if html[at..at + tag_len].contains(RESULT_LINK_CLASS) {
            offsets.push(at);
        }
        scan = at + 2;
    }
    offsets
}

/// Read a `name="value"` attribute out of a raw tag.
fn tag_attribute<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!(" {name}=\"");
    let start = tag.find(&needle)? + needle.len();
    tag[start..].split('"').next()
}

/// Text content of the first element in `block` whose tag carries the given
/// class fragment.  Inline child tags are tolerated; the scan stops at the
/// first plausible closing tag.
fn marked_element_text(block: &str, class_fragment: &str) -> String {
    let Some(mark) = block.find(class_fragment) else {
        return String::new();
    };
    let after_mark = &block[mark..];
    let Some(tag_close) = after_mark.find('>') else {
        return String::new();
    };
    let body = &after_mark[tag_close + 1..];
    let cut = ["</a>", "</span>", "</div>"]
        .iter()
        .filter_map(|closing| body.find(closing))
        .min()
        .unwrap_or(body.len());
    normalize_text(&body[..cut])
}

/// DDG wraps outbound links in a `/l/?uddg=` redirect and serves them
/// scheme-relative; undo both to recover the destination.
pub(crate) fn resolve_ddg_link(href: &str) -> String {
    let absolute = match href.strip_prefix("//") {
        Some(tail) => format!("https://{tail}"),
        None => href.to_owned(),
    };

    if absolute.contains("duckduckgo.com/l/")
        && let Some((_, wrapped)) = absolute.split_once("uddg=")
    {
        let encoded = wrapped.split('&').next().unwrap_or(wrapped);
        return url_decode(encoded);
    }
    absolute
}

/// y.js links are sponsored placements, not organic hits.
fn is_ddg_ad_link(url: &str) -> bool {
    url.starts_with("https://duckduckgo.com/y.js")
}

// ---------------------------------------------------------------------------
// vqd token extraction (shared with the DDG JSON endpoints)
// ---------------------------------------------------------------------------

/// Extract the vqd token DuckDuckGo's JSON endpoints require.
pub(crate) fn extract_vqd(html: &str) -> Option<String> {
    for (open, close) in [("vqd=\"", "\""), ("vqd=", "&"), ("vqd='", "'")] {
        if let Some(start) = html.find(open) {
            let rest = &html[start + open.len()..];
            if let Some(end) = rest.find(close) {
                let token = &rest[..end];
                if !token.is_empty() {
                    return Some(token.to_owned());
                }
            }
        }
    }
    None
}

/// Fetch the DDG landing page and pull the vqd token for `query`.
pub(crate) async fn fetch_vqd(
    client: &FingerprintClient,
    query: &str,
    provider: &'static str,
) -> Result<String> {
    let resp = client
        .get("https://duckduckgo.com", &[("q", query)], &[])
        .await?;
    extract_vqd(&resp.text()).ok_or(ProviderError::TokenMissing { provider })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_PAGE: &str = r#"
        <div class="serp__results">
          <div class="result results_links results_links_deep web-result">
            <h2 class="result__title">
              <a rel="nofollow" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fdocs.rs%2Fregex&amp;rut=0f1" class="result__a">regex - Rust</a>
            </h2>
            <a class="result__snippet" href="//duckduckgo.com/l/?uddg=x">An implementation of <b>regular expressions</b> for Rust.</a>
          </div>
          <div class="result results_links web-result">
            <h2 class="result__title">
              <a rel="nofollow" href="https://crates.io/crates/regex" class="result__a">crates.io: regex</a>
            </h2>
            <a class="result__snippet" href="https://crates.io/crates/regex">Download the regex crate.</a>
          </div>
        </div>
    "#;

    #[test]
    fn scrape_pairs_titles_urls_and_snippets() {
        let hits = scrape_results(SAMPLE_PAGE);
        assert_eq!(hits.len(), 2);

        assert_eq!(hits[0].title, "regex - Rust");
        assert_eq!(hits[0].url, "https://docs.rs/regex");
        assert_eq!(
            hits[0].snippet,
            "An implementation of regular expressions for Rust."
        );

        assert_eq!(hits[1].title, "crates.io: regex");
        assert_eq!(hits[1].url, "https://crates.io/crates/regex");
        assert_eq!(hits[1].snippet, "Download the regex crate.");
    }

    #[test]
    fn scrape_drops_sponsored_placements() {
        let page = r##"
            <a rel="nofollow" href="//duckduckgo.com/y.js?ad_provider=bingv7" class="result__a">Sponsored hit</a>
            <a class="result__snippet" href="#">Buy things.</a>
            <a rel="nofollow" href="https://organic.example/page" class="result__a">Organic hit</a>
            <a class="result__snippet" href="#">Real content.</a>
        "##;
        let hits = scrape_results(page);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].url, "https://organic.example/page");
        assert_eq!(hits[0].snippet, "Real content.");
    }

    #[test]
    fn scrape_tolerates_empty_and_linkless_pages() {
        assert!(scrape_results("").is_empty());
        assert!(scrape_results("<html><body>zero results</body></html>").is_empty());
        // A result anchor with no href contributes nothing.
        assert!(scrape_results(r#"<a class="result__a">dangling</a>"#).is_empty());
    }

    #[test]
    fn tag_attribute_reads_quoted_values() {
        let tag = r#"<a rel="nofollow" href="https://a.example/x" class="result__a""#;
        assert_eq!(tag_attribute(tag, "href"), Some("https://a.example/x"));
        assert_eq!(tag_attribute(tag, "rel"), Some("nofollow"));
        assert_eq!(tag_attribute(tag, "id"), None);
    }

    #[test]
    fn redirect_links_unwrap_to_their_destination() {
        let wrapped = "//duckduckgo.com/l/?uddg=https%3A%2F%2Fblog.example%2Fpost%2F7&rut=abc123";
        assert_eq!(resolve_ddg_link(wrapped), "https://blog.example/post/7");
    }

    #[test]
    fn scheme_relative_links_become_https() {
        assert_eq!(
            resolve_ddg_link("//cdn.example/asset"),
            "https://cdn.example/asset"
        );
    }

    #[test]
    fn absolute_links_pass_through() {
        assert_eq!(
            resolve_ddg_link("https://plain.example/x"),
            "https://plain.example/x"
        );
    }

    #[test]
    fn vqd_extraction_covers_all_delimiters() {
        assert_eq!(extract_vqd(r#"x vqd="4-12345" y"#).as_deref(), Some("4-12345"));
        assert_eq!(extract_vqd("x vqd=4-678&y").as_deref(), Some("4-678"));
        assert_eq!(extract_vqd("x vqd='4-9' y").as_deref(), Some("4-9"));
        assert_eq!(extract_vqd("nothing here"), None);
    }
}
