//! Core provider trait and result type.

use async_trait::async_trait;

use crate::error::Result;

/// A single search hit in provider-neutral shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderResult {
    /// Result title, already tag-stripped and whitespace-collapsed.
    pub title: String,
    /// Destination URL.  Never empty for a valid result.
    pub url: String,
    /// Short description or body fragment.
    pub snippet: String,
    /// Human-readable engine or publication name.
    pub source: Option<String>,
    /// Publication date, ISO-8601 when the engine supplies one.
    pub date: Option<String>,
    /// Full-size image URL for image/video results.
    pub image_url: Option<String>,
}

impl ProviderResult {
    /// Minimal constructor for text results.
    pub fn text(
        title: impl Into<String>,
        url: impl Into<String>,
        snippet: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            snippet: snippet.into(),
            source: Some(source.into()),
            date: None,
            image_url: None,
        }
    }
}

/// The universal search provider interface.
///
/// Implementations must return `Ok(vec![])` when the query simply has no
/// hits; `Err` is reserved for transport and parse failures.  The
/// orchestration layer treats the two cases differently when choosing
/// whether to consult the next backend.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Registry name of this provider (e.g. `duckduckgo`, `bing_news`).
    fn name(&self) -> &'static str;

    /// Execute a search and return normalized results.
    async fn search(&self, query: &str) -> Result<Vec<ProviderResult>>;
}
