//! Search orchestration: backend selection, fan-out, and merge.
//!
//! Given a [`SearchMode`] and a query, the client resolves the provider name
//! sequence from settings, runs the providers, and merges their output under
//! either the `first_non_empty` or `aggregate` strategy.  Provider failures
//! never propagate; they count as empty result lists.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use courier_search::{SearchProvider, build_provider};

use crate::config::{SearchBackendStrategy, Settings};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The search taxonomy tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchMode {
    Search,
    News,
    Wiki,
    Images,
    Videos,
    Jmail,
    LolcowCyraxx,
    LolcowLarson,
}

impl SearchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchMode::Search => "search",
            SearchMode::News => "news",
            SearchMode::Wiki => "wiki",
            SearchMode::Images => "images",
            SearchMode::Videos => "videos",
            SearchMode::Jmail => "jmail",
            SearchMode::LolcowCyraxx => "lolcow_cyraxx",
            SearchMode::LolcowLarson => "lolcow_larson",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "search" => Some(SearchMode::Search),
            "news" => Some(SearchMode::News),
            "wiki" => Some(SearchMode::Wiki),
            "images" => Some(SearchMode::Images),
            "videos" => Some(SearchMode::Videos),
            "jmail" => Some(SearchMode::Jmail),
            "lolcow_cyraxx" => Some(SearchMode::LolcowCyraxx),
            "lolcow_larson" => Some(SearchMode::LolcowLarson),
            _ => None,
        }
    }
}

impl std::fmt::Display for SearchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized search hit tagged with the mode that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub mode: SearchMode,
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub source: Option<String>,
    pub date: Option<String>,
    pub image_url: Option<String>,
    pub thumbnail_url: Option<String>,
}

/// Search failure carrying its user-visible message.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{user_message}")]
pub struct SearchError {
    pub user_message: String,
}

impl SearchError {
    pub fn new(user_message: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
        }
    }

    pub fn empty_query() -> Self {
        Self::new("Search query is empty.")
    }

    pub fn no_results() -> Self {
        Self::new("No search results found.")
    }
}

/// Seam for mocking the search layer in service tests.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(
        &self,
        mode: SearchMode,
        query: &str,
        settings: &Settings,
    ) -> Result<Vec<SearchResult>, SearchError>;
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// The production search client, backed by the provider registry.
#[derive(Default)]
pub struct SearchClient;

impl SearchClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SearchBackend for SearchClient {
    async fn search(
        &self,
        mode: SearchMode,
        query: &str,
        settings: &Settings,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let normalized_query = query.split_whitespace().collect::<Vec<_>>().join(" ");
        if normalized_query.is_empty() {
            return Err(SearchError::empty_query());
        }

        let provider_names = dedupe_backends(&provider_names_for_mode(mode, settings));
        let max_results = max_results_for_mode(mode, settings);
        let timeout = Duration::from_secs_f64(settings.search_timeout_seconds.max(1.0));

        // Only the aggregate merge dedupes by URL; first_non_empty returns
        // the winning provider's list as-is.
        let results = match settings.search_backend_strategy {
            SearchBackendStrategy::FirstNonEmpty => {
                first_non_empty(mode, &normalized_query, &provider_names, timeout).await
            }
            SearchBackendStrategy::Aggregate => dedupe_by_url(
                aggregate(mode, &normalized_query, &provider_names, timeout).await,
            ),
        };

        if results.is_empty() {
            return Err(SearchError::no_results());
        }

        Ok(truncate(results, max_results))
    }
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

async fn first_non_empty(
    mode: SearchMode,
    query: &str,
    provider_names: &[String],
    timeout: Duration,
) -> Vec<SearchResult> {
    for name in provider_names {
        let results = run_provider(mode, query, name, timeout).await;
        if !results.is_empty() {
            debug!(provider = %name, count = results.len(), "first_non_empty hit");
            return results;
        }
    }
    Vec::new()
}

async fn aggregate(
    mode: SearchMode,
    query: &str,
    provider_names: &[String],
    timeout: Duration,
) -> Vec<SearchResult> {
    let handles: Vec<_> = provider_names
        .iter()
        .map(|name| {
            let name = name.clone();
            let query = query.to_owned();
            tokio::spawn(async move { run_provider(mode, &query, &name, timeout).await })
        })
        .collect();

    let mut merged = Vec::new();
    for outcome in futures::future::join_all(handles).await {
        match outcome {
            Ok(results) => merged.extend(results),
            Err(err) => warn!(error = %err, "aggregate provider task panicked"),
        }
    }
    merged
}

async fn run_provider(
    mode: SearchMode,
    query: &str,
    name: &str,
    timeout: Duration,
) -> Vec<SearchResult> {
    let Some(provider) = build_provider(name) else {
        warn!(provider = %name, "unknown search backend, skipping");
        return Vec::new();
    };

    match tokio::time::timeout(timeout, provider.search(query)).await {
        Ok(Ok(results)) => map_results(mode, results),
        Ok(Err(err)) => {
            warn!(provider = %name, error = %err, "provider failed");
            Vec::new()
        }
        Err(_) => {
            warn!(provider = %name, timeout_secs = timeout.as_secs_f64(), "provider timed out");
            Vec::new()
        }
    }
}

fn map_results(
    mode: SearchMode,
    results: Vec<courier_search::ProviderResult>,
) -> Vec<SearchResult> {
    results
        .into_iter()
        .filter(|result| !result.url.trim().is_empty())
        .map(|result| SearchResult {
            mode,
            title: result.title,
            url: result.url,
            snippet: result.snippet,
            source: result.source,
            date: result.date,
            thumbnail_url: result.image_url.clone(),
            image_url: result.image_url,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Backend resolution
// ---------------------------------------------------------------------------

/// Resolve the raw backend name sequence for a mode, applying legacy aliases.
pub fn provider_names_for_mode(mode: SearchMode, settings: &Settings) -> Vec<String> {
    match mode {
        SearchMode::Search => settings.search_backend_search_order.clone(),
        SearchMode::News => settings.search_backend_news_order.clone(),
        SearchMode::Wiki => vec![settings.search_backend_wiki.clone()],
        SearchMode::Images => {
            let backend = settings.search_backend_images.as_str();
            vec![match backend {
                // Legacy alias from before the image endpoint split.
                "duckduckgo" => "duckduckgo_images".to_owned(),
                other => other.to_owned(),
            }]
        }
        SearchMode::Videos => {
            let backend = settings.search_backend_videos.as_str();
            vec![match backend {
                "duckduckgo" => "duckduckgo_videos".to_owned(),
                "youtube" => "youtube_videos".to_owned(),
                other => other.to_owned(),
            }]
        }
        SearchMode::Jmail => vec!["jmail".to_owned()],
        SearchMode::LolcowCyraxx => vec!["lolcow_cyraxx".to_owned()],
        SearchMode::LolcowLarson => vec!["lolcow_larson".to_owned()],
    }
}

/// Flatten comma-separated tokens (env-var convenience) and dedupe
/// case-insensitively, preserving first-seen order.
pub fn dedupe_backends(names: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for name in names {
        for token in name.split(',') {
            let token = token.trim().to_lowercase();
            if token.is_empty() || !seen.insert(token.clone()) {
                continue;
            }
            out.push(token);
        }
    }
    out
}

fn max_results_for_mode(mode: SearchMode, settings: &Settings) -> usize {
    let cap = match mode {
        SearchMode::Search => settings.search_text_max_results,
        SearchMode::News => settings.search_news_max_results,
        SearchMode::Wiki => settings.search_wiki_max_results,
        SearchMode::Images => settings.search_images_max_results,
        SearchMode::Videos => settings.search_videos_max_results,
        SearchMode::Jmail => settings.search_jmail_max_results,
        SearchMode::LolcowCyraxx => settings.search_lolcow_cyraxx_max_results,
        SearchMode::LolcowLarson => settings.search_lolcow_larson_max_results,
    };
    cap.max(1)
}

fn dedupe_by_url(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen = std::collections::HashSet::new();
    results
        .into_iter()
        .filter(|result| seen.insert(result.url.trim().to_owned()))
        .collect()
}

fn truncate(mut results: Vec<SearchResult>, cap: usize) -> Vec<SearchResult> {
    results.truncate(cap);
    results
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn result(url: &str) -> SearchResult {
        SearchResult {
            mode: SearchMode::Search,
            title: "t".into(),
            url: url.into(),
            snippet: "s".into(),
            source: None,
            date: None,
            image_url: None,
            thumbnail_url: None,
        }
    }

    #[test]
    fn mode_roundtrips_through_parse() {
        for mode in [
            SearchMode::Search,
            SearchMode::News,
            SearchMode::Wiki,
            SearchMode::Images,
            SearchMode::Videos,
            SearchMode::Jmail,
            SearchMode::LolcowCyraxx,
            SearchMode::LolcowLarson,
        ] {
            assert_eq!(SearchMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(SearchMode::parse("maps"), None);
    }

    #[test]
    fn dedupe_backends_is_order_preserving_and_case_insensitive() {
        let names = vec![
            "DuckDuckGo,bing".to_owned(),
            "  yahoo ".to_owned(),
            "BING".to_owned(),
            "".to_owned(),
        ];
        assert_eq!(dedupe_backends(&names), vec!["duckduckgo", "bing", "yahoo"]);
    }

    #[test]
    fn legacy_aliases_map_to_split_endpoints() {
        let mut settings = Settings::default();
        settings.search_backend_images = "duckduckgo".into();
        settings.search_backend_videos = "duckduckgo".into();
        assert_eq!(
            provider_names_for_mode(SearchMode::Images, &settings),
            vec!["duckduckgo_images"]
        );
        assert_eq!(
            provider_names_for_mode(SearchMode::Videos, &settings),
            vec!["duckduckgo_videos"]
        );

        settings.search_backend_videos = "youtube".into();
        assert_eq!(
            provider_names_for_mode(SearchMode::Videos, &settings),
            vec!["youtube_videos"]
        );
    }

    #[test]
    fn fixed_modes_use_single_providers() {
        let settings = Settings::default();
        assert_eq!(
            provider_names_for_mode(SearchMode::Jmail, &settings),
            vec!["jmail"]
        );
        assert_eq!(
            provider_names_for_mode(SearchMode::Wiki, &settings),
            vec!["wikipedia"]
        );
    }

    #[test]
    fn url_dedupe_keeps_first_occurrence() {
        let results = vec![result("https://a"), result("https://b"), result("https://a")];
        let deduped = dedupe_by_url(results);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].url, "https://a");
        assert_eq!(deduped[1].url, "https://b");
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let client = SearchClient::new();
        let err = client
            .search(SearchMode::Search, "   ", &Settings::default())
            .await
            .unwrap_err();
        assert_eq!(err.user_message, "Search query is empty.");
    }

    #[tokio::test]
    async fn unknown_backends_yield_no_results_error() {
        let client = SearchClient::new();
        let mut settings = Settings::default();
        settings.search_backend_wiki = "nonexistent_backend".into();
        let err = client
            .search(SearchMode::Wiki, "anything", &settings)
            .await
            .unwrap_err();
        assert_eq!(err.user_message, "No search results found.");
    }
}
