//! Immutable runtime configuration, built once from the environment.
//!
//! Every component receives a shared reference to [`Settings`] and reads only
//! the fields it needs.  Validation failures are [`ConfigError`]s and abort
//! startup; nothing here is re-read after construction.

use std::collections::HashSet;
use std::env;

pub const DEFAULT_CHAT_MODEL: &str = "openai/gpt-4o-mini";
pub const DEFAULT_MENTION_ALIASES: &[&str] = &["@signalbot", "@bot"];
pub const DEFAULT_CHAT_SYSTEM_PROMPT: &str =
    "You are \"@bot\". Reply helpfully in plain text. Keep answers short and factual.";

const SEARCH_ALLOWED_BACKENDS: &[&str] = &[
    "auto",
    "all",
    "bing",
    "duckduckgo",
    "google",
    "grokipedia",
    "wikipedia",
    "yahoo",
    "yandex",
];
const NEWS_ALLOWED_BACKENDS: &[&str] = &["auto", "all", "bing", "duckduckgo", "yahoo"];
const NEWS_BLOCKED_BACKENDS: &[&str] = &["grokipedia", "wikipedia"];

const DEFAULT_SEARCH_ORDER: &[&str] = &["duckduckgo", "bing", "google", "yandex", "grokipedia"];
const DEFAULT_NEWS_ORDER: &[&str] = &["duckduckgo", "bing", "yahoo"];

/// Configuration error.  Raised at startup only; aborts the process.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variables: {0}")]
    MissingRequired(String),

    #[error("no transports enabled; enable at least one of SIGNAL_ENABLED, WHATSAPP_ENABLED, or TELEGRAM_ENABLED")]
    NoTransportsEnabled,

    #[error("{0}")]
    MissingAllowlist(String),

    #[error("invalid {name}: {detail}")]
    InvalidValue { name: &'static str, detail: String },
}

/// How replies to group messages are targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupReplyMode {
    /// Reply into the group.
    Group,
    /// Always reply to the sender in a DM.
    DmFallback,
}

/// Whether the auto-search router is consulted for plain chat prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchContextMode {
    NoContext,
    Context,
}

/// Merge strategy across search backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchBackendStrategy {
    FirstNonEmpty,
    Aggregate,
}

/// Safe-search level forwarded to providers that understand it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafeSearch {
    On,
    Moderate,
    Off,
}

/// Frozen process configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    // Signal transport
    pub signal_enabled: bool,
    pub signal_api_base_url: String,
    pub signal_sender_number: String,
    pub signal_sender_uuid: Option<String>,
    pub signal_allowed_numbers: HashSet<String>,
    pub signal_allowed_group_ids: HashSet<String>,
    pub signal_disable_auth: bool,

    // Telegram transport
    pub telegram_enabled: bool,
    pub telegram_bot_token: Option<String>,
    pub telegram_webhook_secret: Option<String>,
    pub telegram_bot_username: Option<String>,
    pub telegram_allowed_user_ids: HashSet<String>,
    pub telegram_allowed_chat_ids: HashSet<String>,
    pub telegram_disable_auth: bool,

    // WhatsApp transport
    pub whatsapp_enabled: bool,
    pub whatsapp_bridge_base_url: Option<String>,
    pub whatsapp_bridge_token: Option<String>,
    pub whatsapp_allowed_numbers: HashSet<String>,
    pub whatsapp_disable_auth: bool,

    // Chat oracle
    pub openrouter_chat_api_key: String,
    pub openrouter_model: String,
    pub openrouter_base_url: String,
    pub openrouter_timeout_seconds: f64,
    pub openrouter_max_output_tokens: u32,
    pub openrouter_http_referer: Option<String>,
    pub openrouter_app_title: Option<String>,

    // Image oracle
    pub openrouter_image_api_key: Option<String>,
    pub openrouter_image_model: Option<String>,
    pub openrouter_image_timeout_seconds: f64,

    // Chat behavior
    pub chat_temperature: f64,
    pub chat_context_turns: usize,
    pub chat_context_ttl_seconds: u64,
    pub chat_system_prompt: String,
    pub chat_force_plain_text: bool,
    pub mention_aliases: Vec<String>,
    pub max_prompt_chars: usize,

    // Search
    pub search_enabled: bool,
    pub search_context_mode: SearchContextMode,
    pub search_mode_search_enabled: bool,
    pub search_mode_news_enabled: bool,
    pub search_mode_wiki_enabled: bool,
    pub search_mode_images_enabled: bool,
    pub search_mode_videos_enabled: bool,
    pub search_mode_jmail_enabled: bool,
    pub search_mode_lolcow_cyraxx_enabled: bool,
    pub search_mode_lolcow_larson_enabled: bool,
    pub search_debug_logging: bool,
    pub search_persona_enabled: bool,
    pub search_use_history_for_summary: bool,
    pub search_region: String,
    pub search_safesearch: SafeSearch,
    pub search_backend_strategy: SearchBackendStrategy,
    pub search_backend_search_order: Vec<String>,
    pub search_backend_news_order: Vec<String>,
    pub search_backend_wiki: String,
    pub search_backend_images: String,
    pub search_backend_videos: String,
    pub search_text_max_results: usize,
    pub search_news_max_results: usize,
    pub search_wiki_max_results: usize,
    pub search_images_max_results: usize,
    pub search_videos_max_results: usize,
    pub search_jmail_max_results: usize,
    pub search_lolcow_cyraxx_max_results: usize,
    pub search_lolcow_larson_max_results: usize,
    pub search_timeout_seconds: f64,
    pub search_source_ttl_seconds: u64,

    // Weather
    pub weather_api_key: Option<String>,
    pub weather_units_imperial: bool,
    pub weather_default_location: Option<String>,

    // Reply behavior / server
    pub group_reply_mode: GroupReplyMode,
    pub webhook_host: String,
    pub webhook_port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            signal_enabled: true,
            signal_api_base_url: String::new(),
            signal_sender_number: String::new(),
            signal_sender_uuid: None,
            signal_allowed_numbers: HashSet::new(),
            signal_allowed_group_ids: HashSet::new(),
            signal_disable_auth: false,
            telegram_enabled: false,
            telegram_bot_token: None,
            telegram_webhook_secret: None,
            telegram_bot_username: None,
            telegram_allowed_user_ids: HashSet::new(),
            telegram_allowed_chat_ids: HashSet::new(),
            telegram_disable_auth: false,
            whatsapp_enabled: false,
            whatsapp_bridge_base_url: None,
            whatsapp_bridge_token: None,
            whatsapp_allowed_numbers: HashSet::new(),
            whatsapp_disable_auth: false,
            openrouter_chat_api_key: String::new(),
            openrouter_model: DEFAULT_CHAT_MODEL.to_owned(),
            openrouter_base_url: "https://openrouter.ai/api/v1".to_owned(),
            openrouter_timeout_seconds: 45.0,
            openrouter_max_output_tokens: 300,
            openrouter_http_referer: None,
            openrouter_app_title: None,
            openrouter_image_api_key: None,
            openrouter_image_model: None,
            openrouter_image_timeout_seconds: 90.0,
            chat_temperature: 0.6,
            chat_context_turns: 6,
            chat_context_ttl_seconds: 1800,
            chat_system_prompt: DEFAULT_CHAT_SYSTEM_PROMPT.to_owned(),
            chat_force_plain_text: true,
            mention_aliases: DEFAULT_MENTION_ALIASES
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
            max_prompt_chars: 700,
            search_enabled: true,
            search_context_mode: SearchContextMode::NoContext,
            search_mode_search_enabled: true,
            search_mode_news_enabled: true,
            search_mode_wiki_enabled: true,
            search_mode_images_enabled: true,
            search_mode_videos_enabled: true,
            search_mode_jmail_enabled: true,
            search_mode_lolcow_cyraxx_enabled: true,
            search_mode_lolcow_larson_enabled: true,
            search_debug_logging: false,
            search_persona_enabled: false,
            search_use_history_for_summary: false,
            search_region: "us-en".to_owned(),
            search_safesearch: SafeSearch::Moderate,
            search_backend_strategy: SearchBackendStrategy::FirstNonEmpty,
            search_backend_search_order: DEFAULT_SEARCH_ORDER
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
            search_backend_news_order: DEFAULT_NEWS_ORDER
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
            search_backend_wiki: "wikipedia".to_owned(),
            search_backend_images: "duckduckgo".to_owned(),
            search_backend_videos: "youtube".to_owned(),
            search_text_max_results: 5,
            search_news_max_results: 5,
            search_wiki_max_results: 3,
            search_images_max_results: 3,
            search_videos_max_results: 5,
            search_jmail_max_results: 5,
            search_lolcow_cyraxx_max_results: 3,
            search_lolcow_larson_max_results: 3,
            search_timeout_seconds: 8.0,
            search_source_ttl_seconds: 1800,
            weather_api_key: None,
            weather_units_imperial: false,
            weather_default_location: None,
            group_reply_mode: GroupReplyMode::Group,
            webhook_host: "127.0.0.1".to_owned(),
            webhook_port: 8001,
        }
    }
}

impl Settings {
    /// Build settings from the process environment, validating transport and
    /// backend configuration.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut missing: Vec<&'static str> = Vec::new();

        let signal_enabled = env_bool_or("SIGNAL_ENABLED", true);
        let whatsapp_enabled = env_bool_or("WHATSAPP_ENABLED", false);
        let telegram_enabled = env_bool_or("TELEGRAM_ENABLED", false);
        if !signal_enabled && !whatsapp_enabled && !telegram_enabled {
            return Err(ConfigError::NoTransportsEnabled);
        }

        let openrouter_chat_api_key = env_non_empty("OPENROUTER_CHAT_API_KEY");
        if openrouter_chat_api_key.is_none() {
            missing.push("OPENROUTER_CHAT_API_KEY");
        }

        // Signal
        let mut signal_allowed_numbers = env_csv_set("SIGNAL_ALLOWED_NUMBERS");
        if let Some(legacy) = env_non_empty("SIGNAL_ALLOWED_NUMBER") {
            signal_allowed_numbers.insert(legacy);
        }
        let signal_allowed_group_ids = env_csv_set("SIGNAL_ALLOWED_GROUP_IDS");
        let signal_disable_auth = env_bool_or("SIGNAL_DISABLE_AUTH", false);
        let signal_api_base_url = env_non_empty("SIGNAL_API_BASE_URL");
        let signal_sender_number = env_non_empty("SIGNAL_SENDER_NUMBER");
        if signal_enabled {
            if signal_api_base_url.is_none() {
                missing.push("SIGNAL_API_BASE_URL");
            }
            if signal_sender_number.is_none() {
                missing.push("SIGNAL_SENDER_NUMBER");
            }
            if !signal_disable_auth
                && signal_allowed_numbers.is_empty()
                && signal_allowed_group_ids.is_empty()
            {
                return Err(ConfigError::MissingAllowlist(
                    "missing Signal allowlist configuration: set SIGNAL_ALLOWED_NUMBERS, \
                     SIGNAL_ALLOWED_GROUP_IDS, or SIGNAL_DISABLE_AUTH=true"
                        .to_owned(),
                ));
            }
        }

        // WhatsApp
        let whatsapp_allowed_numbers = env_csv_set("WHATSAPP_ALLOWED_NUMBERS");
        let whatsapp_disable_auth = env_bool_or("WHATSAPP_DISABLE_AUTH", false);
        if whatsapp_enabled && !whatsapp_disable_auth && whatsapp_allowed_numbers.is_empty() {
            return Err(ConfigError::MissingAllowlist(
                "missing WhatsApp allowlist configuration: set WHATSAPP_ALLOWED_NUMBERS \
                 or WHATSAPP_DISABLE_AUTH=true"
                    .to_owned(),
            ));
        }

        // Telegram
        let telegram_bot_token = env_non_empty("TELEGRAM_BOT_TOKEN");
        let telegram_allowed_user_ids = env_csv_set("TELEGRAM_ALLOWED_USER_IDS");
        let telegram_allowed_chat_ids = env_csv_set("TELEGRAM_ALLOWED_CHAT_IDS");
        let telegram_disable_auth = env_bool_or("TELEGRAM_DISABLE_AUTH", false);
        if telegram_enabled {
            if telegram_bot_token.is_none() {
                missing.push("TELEGRAM_BOT_TOKEN");
            }
            if !telegram_disable_auth
                && telegram_allowed_user_ids.is_empty()
                && telegram_allowed_chat_ids.is_empty()
            {
                return Err(ConfigError::MissingAllowlist(
                    "missing Telegram allowlist configuration: set TELEGRAM_ALLOWED_USER_IDS, \
                     TELEGRAM_ALLOWED_CHAT_IDS, or TELEGRAM_DISABLE_AUTH=true"
                        .to_owned(),
                ));
            }
        }

        if !missing.is_empty() {
            let mut names: Vec<&str> = missing.into_iter().collect();
            names.sort_unstable();
            names.dedup();
            return Err(ConfigError::MissingRequired(names.join(", ")));
        }

        let mention_aliases = env_csv_ordered("BOT_MENTION_ALIASES");
        let mention_aliases = if mention_aliases.is_empty() {
            DEFAULT_MENTION_ALIASES
                .iter()
                .map(|s| (*s).to_owned())
                .collect()
        } else {
            mention_aliases
        };

        let search_backend_search_order = parse_backend_order(
            "BOT_SEARCH_BACKEND_SEARCH_ORDER",
            SEARCH_ALLOWED_BACKENDS,
            &[],
        )?
        .unwrap_or_else(|| {
            DEFAULT_SEARCH_ORDER
                .iter()
                .map(|s| (*s).to_owned())
                .collect()
        });
        let search_backend_news_order = parse_backend_order(
            "BOT_SEARCH_BACKEND_NEWS_ORDER",
            NEWS_ALLOWED_BACKENDS,
            NEWS_BLOCKED_BACKENDS,
        )?
        .unwrap_or_else(|| DEFAULT_NEWS_ORDER.iter().map(|s| (*s).to_owned()).collect());

        let defaults = Settings::default();

        Ok(Settings {
            signal_enabled,
            signal_api_base_url: signal_api_base_url.unwrap_or_default(),
            signal_sender_number: signal_sender_number.unwrap_or_default(),
            signal_sender_uuid: env_non_empty("SIGNAL_SENDER_UUID"),
            signal_allowed_numbers,
            signal_allowed_group_ids,
            signal_disable_auth,
            telegram_enabled,
            telegram_bot_token,
            telegram_webhook_secret: env_non_empty("TELEGRAM_WEBHOOK_SECRET"),
            telegram_bot_username: env_non_empty("TELEGRAM_BOT_USERNAME"),
            telegram_allowed_user_ids,
            telegram_allowed_chat_ids,
            telegram_disable_auth,
            whatsapp_enabled,
            whatsapp_bridge_base_url: env_non_empty("WHATSAPP_BRIDGE_BASE_URL"),
            whatsapp_bridge_token: env_non_empty("WHATSAPP_BRIDGE_TOKEN"),
            whatsapp_allowed_numbers,
            whatsapp_disable_auth,
            openrouter_chat_api_key: openrouter_chat_api_key.unwrap_or_default(),
            openrouter_model: env_non_empty("OPENROUTER_MODEL")
                .unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_owned()),
            openrouter_base_url: env_non_empty("OPENROUTER_BASE_URL")
                .unwrap_or(defaults.openrouter_base_url),
            openrouter_timeout_seconds: env_f64_or("OPENROUTER_TIMEOUT_SECONDS", 45.0)?,
            openrouter_max_output_tokens: env_u32_or("OPENROUTER_MAX_OUTPUT_TOKENS", 300)?,
            openrouter_http_referer: env_non_empty("OPENROUTER_HTTP_REFERER"),
            openrouter_app_title: env_non_empty("OPENROUTER_APP_TITLE"),
            openrouter_image_api_key: env_non_empty("OPENROUTER_IMAGE_API_KEY"),
            openrouter_image_model: env_non_empty("OPENROUTER_IMAGE_MODEL"),
            openrouter_image_timeout_seconds: env_f64_or("OPENROUTER_IMAGE_TIMEOUT_SECONDS", 90.0)?,
            chat_temperature: env_f64_or("BOT_CHAT_TEMPERATURE", 0.6)?,
            chat_context_turns: env_usize_or("BOT_CHAT_CONTEXT_TURNS", 6)?,
            chat_context_ttl_seconds: env_u64_or("BOT_CHAT_CONTEXT_TTL_SECONDS", 1800)?,
            chat_system_prompt: env_non_empty("BOT_CHAT_SYSTEM_PROMPT")
                .unwrap_or(defaults.chat_system_prompt),
            chat_force_plain_text: env_bool_or("BOT_CHAT_FORCE_PLAIN_TEXT", true),
            mention_aliases,
            max_prompt_chars: env_usize_or("BOT_MAX_PROMPT_CHARS", 700)?,
            search_enabled: env_bool_or("BOT_SEARCH_ENABLED", true),
            search_context_mode: parse_search_context_mode()?,
            search_mode_search_enabled: env_bool_or("BOT_SEARCH_MODE_SEARCH_ENABLED", true),
            search_mode_news_enabled: env_bool_or("BOT_SEARCH_MODE_NEWS_ENABLED", true),
            search_mode_wiki_enabled: env_bool_or("BOT_SEARCH_MODE_WIKI_ENABLED", true),
            search_mode_images_enabled: env_bool_or("BOT_SEARCH_MODE_IMAGES_ENABLED", true),
            search_mode_videos_enabled: env_bool_or("BOT_SEARCH_MODE_VIDEOS_ENABLED", true),
            search_mode_jmail_enabled: env_bool_or("BOT_SEARCH_MODE_JMAIL_ENABLED", true),
            search_mode_lolcow_cyraxx_enabled: env_bool_or(
                "BOT_SEARCH_MODE_LOLCOW_CYRAXX_ENABLED",
                true,
            ),
            search_mode_lolcow_larson_enabled: env_bool_or(
                "BOT_SEARCH_MODE_LOLCOW_LARSON_ENABLED",
                true,
            ),
            search_debug_logging: env_bool_or("BOT_SEARCH_DEBUG_LOGGING", false),
            search_persona_enabled: env_bool_or("BOT_SEARCH_PERSONA_ENABLED", false),
            search_use_history_for_summary: env_bool_or("BOT_SEARCH_USE_HISTORY_FOR_SUMMARY", false),
            search_region: env_non_empty("BOT_SEARCH_REGION").unwrap_or(defaults.search_region),
            search_safesearch: parse_safesearch()?,
            search_backend_strategy: parse_backend_strategy()?,
            search_backend_search_order,
            search_backend_news_order,
            search_backend_wiki: env_lower_or("BOT_SEARCH_BACKEND_WIKI", "wikipedia"),
            search_backend_images: env_lower_or("BOT_SEARCH_BACKEND_IMAGES", "duckduckgo"),
            search_backend_videos: env_lower_or("BOT_SEARCH_BACKEND_VIDEOS", "youtube"),
            search_text_max_results: env_usize_or("BOT_SEARCH_TEXT_MAX_RESULTS", 5)?,
            search_news_max_results: env_usize_or("BOT_SEARCH_NEWS_MAX_RESULTS", 5)?,
            search_wiki_max_results: env_usize_or("BOT_SEARCH_WIKI_MAX_RESULTS", 3)?,
            search_images_max_results: env_usize_or("BOT_SEARCH_IMAGES_MAX_RESULTS", 3)?,
            search_videos_max_results: env_usize_or("BOT_SEARCH_VIDEOS_MAX_RESULTS", 5)?,
            search_jmail_max_results: env_usize_or("BOT_SEARCH_JMAIL_MAX_RESULTS", 5)?,
            search_lolcow_cyraxx_max_results: env_usize_or(
                "BOT_SEARCH_LOLCOW_CYRAXX_MAX_RESULTS",
                3,
            )?,
            search_lolcow_larson_max_results: env_usize_or(
                "BOT_SEARCH_LOLCOW_LARSON_MAX_RESULTS",
                3,
            )?,
            search_timeout_seconds: env_f64_or("BOT_SEARCH_TIMEOUT_SECONDS", 8.0)?,
            search_source_ttl_seconds: env_u64_or("BOT_SEARCH_SOURCE_TTL_SECONDS", 1800)?,
            weather_api_key: env_non_empty("WEATHER_API_KEY"),
            weather_units_imperial: env::var("WEATHER_UNITS")
                .map(|v| v.trim().eq_ignore_ascii_case("imperial"))
                .unwrap_or(false),
            weather_default_location: env_non_empty("WEATHER_DEFAULT_LOCATION"),
            group_reply_mode: parse_group_reply_mode()?,
            webhook_host: env_non_empty("BOT_WEBHOOK_HOST").unwrap_or(defaults.webhook_host),
            webhook_port: env_u32_or("BOT_WEBHOOK_PORT", 8001)? as u16,
        })
    }
}

// ---------------------------------------------------------------------------
// Environment parsing helpers
// ---------------------------------------------------------------------------

fn env_non_empty(name: &str) -> Option<String> {
    let value = env::var(name).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

fn env_lower_or(name: &str, default: &str) -> String {
    env_non_empty(name)
        .map(|v| v.to_lowercase())
        .unwrap_or_else(|| default.to_owned())
}

fn env_bool_or(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

fn env_f64_or(name: &'static str, default: f64) -> Result<f64, ConfigError> {
    match env_non_empty(name) {
        Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
            name,
            detail: format!("expected a number, got '{value}'"),
        }),
        None => Ok(default),
    }
}

fn env_u32_or(name: &'static str, default: u32) -> Result<u32, ConfigError> {
    match env_non_empty(name) {
        Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
            name,
            detail: format!("expected an integer, got '{value}'"),
        }),
        None => Ok(default),
    }
}

fn env_u64_or(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env_non_empty(name) {
        Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
            name,
            detail: format!("expected an integer, got '{value}'"),
        }),
        None => Ok(default),
    }
}

fn env_usize_or(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    env_u64_or(name, default as u64).map(|v| v as usize)
}

fn env_csv_set(name: &str) -> HashSet<String> {
    match env::var(name) {
        Ok(value) => value
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_owned)
            .collect(),
        Err(_) => HashSet::new(),
    }
}

fn env_csv_ordered(name: &str) -> Vec<String> {
    let Ok(value) = env::var(name) else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    let mut ordered = Vec::new();
    for raw in value.split(',') {
        let item = raw.trim().to_lowercase();
        if item.is_empty() || !seen.insert(item.clone()) {
            continue;
        }
        ordered.push(item);
    }
    ordered
}

fn parse_group_reply_mode() -> Result<GroupReplyMode, ConfigError> {
    match env_non_empty("BOT_GROUP_REPLY_MODE").as_deref() {
        None => Ok(GroupReplyMode::Group),
        Some(value) => match value.to_lowercase().as_str() {
            "group" => Ok(GroupReplyMode::Group),
            "dm_fallback" => Ok(GroupReplyMode::DmFallback),
            other => Err(ConfigError::InvalidValue {
                name: "BOT_GROUP_REPLY_MODE",
                detail: format!("expected 'group' or 'dm_fallback', got '{other}'"),
            }),
        },
    }
}

fn parse_search_context_mode() -> Result<SearchContextMode, ConfigError> {
    match env_non_empty("BOT_SEARCH_CONTEXT_MODE").as_deref() {
        None => Ok(SearchContextMode::NoContext),
        Some(value) => match value.to_lowercase().as_str() {
            "no_context" => Ok(SearchContextMode::NoContext),
            "context" => Ok(SearchContextMode::Context),
            other => Err(ConfigError::InvalidValue {
                name: "BOT_SEARCH_CONTEXT_MODE",
                detail: format!("expected 'no_context' or 'context', got '{other}'"),
            }),
        },
    }
}

fn parse_backend_strategy() -> Result<SearchBackendStrategy, ConfigError> {
    match env_non_empty("BOT_SEARCH_BACKEND_STRATEGY").as_deref() {
        None => Ok(SearchBackendStrategy::FirstNonEmpty),
        Some(value) => match value.to_lowercase().as_str() {
            "first_non_empty" => Ok(SearchBackendStrategy::FirstNonEmpty),
            "aggregate" => Ok(SearchBackendStrategy::Aggregate),
            other => Err(ConfigError::InvalidValue {
                name: "BOT_SEARCH_BACKEND_STRATEGY",
                detail: format!("expected 'first_non_empty' or 'aggregate', got '{other}'"),
            }),
        },
    }
}

fn parse_safesearch() -> Result<SafeSearch, ConfigError> {
    match env_non_empty("BOT_SEARCH_SAFESEARCH").as_deref() {
        None => Ok(SafeSearch::Moderate),
        Some(value) => match value.to_lowercase().as_str() {
            "on" => Ok(SafeSearch::On),
            "moderate" => Ok(SafeSearch::Moderate),
            "off" => Ok(SafeSearch::Off),
            other => Err(ConfigError::InvalidValue {
                name: "BOT_SEARCH_SAFESEARCH",
                detail: format!("expected 'on', 'moderate', or 'off', got '{other}'"),
            }),
        },
    }
}

fn parse_backend_order(
    name: &'static str,
    allowed: &[&str],
    blocked: &[&str],
) -> Result<Option<Vec<String>>, ConfigError> {
    let Some(value) = env_non_empty(name) else {
        return Ok(None);
    };

    let mut seen = HashSet::new();
    let mut ordered = Vec::new();
    for raw in value.split(',') {
        let backend = raw.trim().to_lowercase();
        if backend.is_empty() || !seen.insert(backend.clone()) {
            continue;
        }
        if blocked.contains(&backend.as_str()) {
            return Err(ConfigError::InvalidValue {
                name,
                detail: format!(
                    "backend '{backend}' is not allowed; blocked values: {}",
                    blocked.join(", ")
                ),
            });
        }
        if !allowed.contains(&backend.as_str()) {
            return Err(ConfigError::InvalidValue {
                name,
                detail: format!(
                    "backend '{backend}' is not recognized; allowed values: {}",
                    allowed.join(", ")
                ),
            });
        }
        ordered.push(backend);
    }

    if ordered.is_empty() {
        Ok(None)
    } else {
        Ok(Some(ordered))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.chat_context_turns, 6);
        assert_eq!(settings.chat_context_ttl_seconds, 1800);
        assert_eq!(settings.max_prompt_chars, 700);
        assert!(settings.chat_force_plain_text);
        assert_eq!(settings.search_text_max_results, 5);
        assert_eq!(settings.search_images_max_results, 3);
        assert_eq!(settings.search_timeout_seconds, 8.0);
        assert_eq!(settings.group_reply_mode, GroupReplyMode::Group);
        assert_eq!(settings.search_context_mode, SearchContextMode::NoContext);
        assert_eq!(
            settings.search_backend_strategy,
            SearchBackendStrategy::FirstNonEmpty
        );
        assert_eq!(
            settings.search_backend_search_order,
            vec!["duckduckgo", "bing", "google", "yandex", "grokipedia"]
        );
        assert_eq!(
            settings.search_backend_news_order,
            vec!["duckduckgo", "bing", "yahoo"]
        );
        assert_eq!(settings.mention_aliases, vec!["@signalbot", "@bot"]);
    }

    // Environment-variable parsing is covered through the pure helpers so the
    // tests stay hermetic (no process-global env mutation in parallel tests).

    #[test]
    fn backend_order_defaults_when_env_is_unset() {
        assert!(
            parse_backend_order("COURIER_TEST_UNSET_VAR", &["a"], &[])
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn csv_ordered_dedupes_preserving_order() {
        // env_csv_ordered reads the environment; emulate its core here.
        let value = "DuckDuckGo, bing, duckduckgo,  ,Bing";
        let mut seen = HashSet::new();
        let mut ordered = Vec::new();
        for raw in value.split(',') {
            let item = raw.trim().to_lowercase();
            if item.is_empty() || !seen.insert(item.clone()) {
                continue;
            }
            ordered.push(item);
        }
        assert_eq!(ordered, vec!["duckduckgo", "bing"]);
    }
}
