//! Provider adapter implementations.
//!
//! One module per engine.  All adapters implement
//! [`crate::provider::SearchProvider`] and are wired up by name in
//! [`crate::registry`].

pub mod bing;
pub mod bing_news;
pub mod duckduckgo;
pub mod duckduckgo_images;
pub mod duckduckgo_news;
pub mod duckduckgo_videos;
pub mod google;
pub mod grokipedia;
pub mod jmail;
pub mod lolcow;
pub mod weather;
pub mod wikipedia;
pub mod yahoo;
pub mod yahoo_news;
pub mod yandex;
pub mod youtube_videos;

pub use bing::BingProvider;
pub use bing_news::BingNewsProvider;
pub use duckduckgo::DuckDuckGoProvider;
pub use duckduckgo_images::DuckDuckGoImagesProvider;
pub use duckduckgo_news::DuckDuckGoNewsProvider;
pub use duckduckgo_videos::DuckDuckGoVideosProvider;
pub use google::GoogleProvider;
pub use grokipedia::GrokipediaProvider;
pub use jmail::JmailProvider;
pub use lolcow::LolcowProvider;
pub use weather::{WeatherProvider, WeatherUnits};
pub use wikipedia::WikipediaProvider;
pub use yahoo::YahooProvider;
pub use yahoo_news::YahooNewsProvider;
pub use yandex::YandexProvider;
pub use youtube_videos::YouTubeVideosProvider;
