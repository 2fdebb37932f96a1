//! Name → provider constructor registry.
//!
//! Providers are cheap to construct (each owns one HTTP client handle built
//! lazily on first request), so callers build a fresh instance per search.
//! The weather provider is excluded from [`build_provider`] because it needs
//! an API key; use [`build_weather_provider`] instead.

use crate::provider::SearchProvider;
use crate::providers::{
    BingNewsProvider, BingProvider, DuckDuckGoImagesProvider, DuckDuckGoNewsProvider,
    DuckDuckGoProvider, DuckDuckGoVideosProvider, GoogleProvider, GrokipediaProvider,
    JmailProvider, LolcowProvider, WeatherProvider, WeatherUnits, WikipediaProvider,
    YahooNewsProvider, YahooProvider, YandexProvider, YouTubeVideosProvider,
};

/// Every keyless provider name, in registry order.
pub const PROVIDER_NAMES: &[&str] = &[
    "duckduckgo",
    "duckduckgo_news",
    "duckduckgo_images",
    "duckduckgo_videos",
    "youtube_videos",
    "bing",
    "bing_news",
    "google",
    "yahoo",
    "yahoo_news",
    "yandex",
    "wikipedia",
    "grokipedia",
    "jmail",
    "lolcow_cyraxx",
    "lolcow_larson",
];

/// List the registered keyless provider names.
pub fn provider_names() -> &'static [&'static str] {
    PROVIDER_NAMES
}

/// Construct a provider by registry name.  Returns `None` for unknown names
/// (including `weather`, which requires configuration).
pub fn build_provider(name: &str) -> Option<Box<dyn SearchProvider>> {
    let provider: Box<dyn SearchProvider> = match name {
        "duckduckgo" => Box::new(DuckDuckGoProvider::new()),
        "duckduckgo_news" => Box::new(DuckDuckGoNewsProvider::new()),
        "duckduckgo_images" => Box::new(DuckDuckGoImagesProvider::new()),
        "duckduckgo_videos" => Box::new(DuckDuckGoVideosProvider::new()),
        "youtube_videos" => Box::new(YouTubeVideosProvider::new()),
        "bing" => Box::new(BingProvider::new()),
        "bing_news" => Box::new(BingNewsProvider::new()),
        "google" => Box::new(GoogleProvider::new()),
        "yahoo" => Box::new(YahooProvider::new()),
        "yahoo_news" => Box::new(YahooNewsProvider::new()),
        "yandex" => Box::new(YandexProvider::new()),
        "wikipedia" => Box::new(WikipediaProvider::new()),
        "grokipedia" => Box::new(GrokipediaProvider::new()),
        "jmail" => Box::new(JmailProvider::new()),
        "lolcow_cyraxx" => Box::new(LolcowProvider::cyraxx()),
        "lolcow_larson" => Box::new(LolcowProvider::larson()),
        _ => return None,
    };
    Some(provider)
}

/// Construct the OpenWeatherMap provider with its required key.
pub fn build_weather_provider(api_key: impl Into<String>, units: WeatherUnits) -> WeatherProvider {
    WeatherProvider::new(api_key, units)
}
