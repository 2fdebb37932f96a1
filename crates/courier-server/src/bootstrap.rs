//! Construction of the orchestration object graph from settings.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use courier_bot::chat_context::ChatContextStore;
use courier_bot::config::Settings;
use courier_bot::dedupe::DedupeCache;
use courier_bot::group_resolver::GroupResolver;
use courier_bot::oracle::{ChatOracle, ImageOracle, OpenRouterChatClient, OpenRouterImageClient};
use courier_bot::router::WebhookHandler;
use courier_bot::search_client::{SearchBackend, SearchClient};
use courier_bot::search_context::SearchContextStore;
use courier_bot::search_service::SearchService;
use courier_bot::transport::{MessengerClient, SignalClient, TelegramClient, WhatsAppClient};
use courier_bot::weather::{OpenWeatherClient, WeatherApi};

const DEDUPE_TTL: Duration = Duration::from_secs(300);
const GROUP_RESOLVER_REFRESH_TTL: Duration = Duration::from_secs(300);

/// Wire stores, oracle clients, transports, and the search service into a
/// ready [`WebhookHandler`].
pub fn build_handler(settings: Arc<Settings>) -> Result<Arc<WebhookHandler>> {
    let http = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;

    let chat_context = Arc::new(ChatContextStore::new(
        settings.chat_context_turns,
        Duration::from_secs(settings.chat_context_ttl_seconds),
    ));
    let dedupe = Arc::new(DedupeCache::new(DEDUPE_TTL));
    let search_context = Arc::new(SearchContextStore::new(
        Duration::from_secs(settings.search_source_ttl_seconds),
        40,
    ));

    let chat_oracle: Arc<dyn ChatOracle> = Arc::new(OpenRouterChatClient::from_settings(
        &settings,
        http.clone(),
    ));
    let image_oracle: Option<Arc<dyn ImageOracle>> =
        OpenRouterImageClient::from_settings(&settings, http.clone())
            .map(|client| Arc::new(client) as Arc<dyn ImageOracle>);

    let signal_client: Option<Arc<dyn MessengerClient>> = if settings.signal_enabled {
        let group_resolver = Arc::new(GroupResolver::new(
            &settings.signal_api_base_url,
            &settings.signal_sender_number,
            http.clone(),
            GROUP_RESOLVER_REFRESH_TTL,
        ));
        Some(Arc::new(SignalClient::new(
            &settings.signal_api_base_url,
            &settings.signal_sender_number,
            http.clone(),
            group_resolver,
        )))
    } else {
        None
    };

    let telegram_client: Option<Arc<dyn MessengerClient>> = settings
        .telegram_bot_token
        .as_deref()
        .filter(|_| settings.telegram_enabled)
        .map(|token| Arc::new(TelegramClient::new(token, http.clone())) as Arc<dyn MessengerClient>);

    let whatsapp_client: Option<Arc<dyn MessengerClient>> = settings
        .whatsapp_bridge_base_url
        .as_deref()
        .filter(|_| settings.whatsapp_enabled)
        .map(|base_url| {
            Arc::new(WhatsAppClient::new(
                base_url,
                settings.whatsapp_bridge_token.clone(),
                http.clone(),
            )) as Arc<dyn MessengerClient>
        });

    let weather_client: Option<Arc<dyn WeatherApi>> =
        OpenWeatherClient::from_settings(&settings, http.clone())
            .map(|client| Arc::new(client) as Arc<dyn WeatherApi>);

    let search_service = if settings.search_enabled {
        Some(Arc::new(SearchService::new(
            Arc::clone(&settings),
            Arc::new(SearchClient::new()) as Arc<dyn SearchBackend>,
            Arc::clone(&search_context),
            Arc::clone(&chat_oracle),
            http.clone(),
        )))
    } else {
        None
    };

    Ok(Arc::new(WebhookHandler {
        settings,
        signal_client,
        whatsapp_client,
        telegram_client,
        chat_oracle,
        image_oracle,
        chat_context,
        dedupe,
        weather_client,
        search_service,
    }))
}
