//! OpenWeatherMap client and reply formatting for `/weather` and `/forecast`.

use async_trait::async_trait;
use serde_json::Value;

use crate::config::Settings;

const OPENWEATHER_BASE: &str = "https://api.openweathermap.org/data/2.5";

/// Weather lookup failure with its user-visible message.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{user_message}")]
pub struct WeatherError {
    pub user_message: String,
    pub status_code: Option<u16>,
}

impl WeatherError {
    fn new(user_message: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
            status_code: None,
        }
    }
}

/// Raw weather lookups; the router formats the payloads for chat.
#[async_trait]
pub trait WeatherApi: Send + Sync {
    async fn current(&self, location: &str) -> Result<Value, WeatherError>;
    async fn forecast(&self, location: &str) -> Result<Value, WeatherError>;
}

/// OpenWeatherMap API client.
pub struct OpenWeatherClient {
    http: reqwest::Client,
    api_key: String,
    units: &'static str,
}

impl OpenWeatherClient {
    pub fn from_settings(settings: &Settings, http: reqwest::Client) -> Option<Self> {
        let api_key = settings.weather_api_key.clone()?;
        Some(Self {
            http,
            api_key,
            units: if settings.weather_units_imperial {
                "imperial"
            } else {
                "metric"
            },
        })
    }

    async fn fetch(&self, endpoint: &str, location: &str) -> Result<Value, WeatherError> {
        let url = format!("{OPENWEATHER_BASE}/{endpoint}");
        let response = self
            .http
            .get(&url)
            .query(&[
                ("q", location),
                ("appid", &self.api_key),
                ("units", self.units),
            ])
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .map_err(|err| WeatherError::new(format!("Weather request failed: {err}")))?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        if status >= 400 {
            return Err(WeatherError {
                user_message: format!("Weather request failed: {}", body.trim()),
                status_code: Some(status),
            });
        }

        serde_json::from_str(&body)
            .map_err(|_| WeatherError::new("Weather service returned invalid JSON."))
    }
}

#[async_trait]
impl WeatherApi for OpenWeatherClient {
    /// Raw current-conditions payload for a location.
    async fn current(&self, location: &str) -> Result<Value, WeatherError> {
        self.fetch("weather", location).await
    }

    /// Raw 5-day forecast payload for a location.
    async fn forecast(&self, location: &str) -> Result<Value, WeatherError> {
        self.fetch("forecast", location).await
    }
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

fn temp_suffix(imperial: bool) -> char {
    if imperial { 'F' } else { 'C' }
}

/// Render the current-conditions payload as a chat reply.
pub fn format_current(data: &Value, imperial: bool) -> String {
    let fields = (
        data.get("name").and_then(|v| v.as_str()),
        data.pointer("/weather/0/description").and_then(|v| v.as_str()),
        data.pointer("/main/temp").and_then(|v| v.as_f64()),
    );
    let (Some(city), Some(condition), Some(temp)) = fields else {
        return "Could not parse weather data.".to_owned();
    };

    let country = data
        .pointer("/sys/country")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let suffix = temp_suffix(imperial);
    let mut lines = vec![
        format!("Weather for {city}, {country}:"),
        format!("- Condition: {}", capitalize(condition)),
        format!("- Temperature: {temp}°{suffix}"),
    ];
    if let Some(feels) = data.pointer("/main/feels_like").and_then(|v| v.as_f64()) {
        lines.push(format!("- Feels like: {feels}°{suffix}"));
    }
    if let Some(humidity) = data.pointer("/main/humidity").and_then(|v| v.as_f64()) {
        lines.push(format!("- Humidity: {humidity}%"));
    }
    if let Some(wind) = data.pointer("/wind/speed").and_then(|v| v.as_f64()) {
        lines.push(format!("- Wind: {wind} m/s"));
    }
    lines.join("\n")
}

/// Render the forecast payload: one line per day (preferring the 12:00
/// slot), capped at five days.
pub fn format_forecast(data: &Value, imperial: bool) -> String {
    let fields = (
        data.pointer("/city/name").and_then(|v| v.as_str()),
        data.get("list").and_then(|v| v.as_array()),
    );
    let (Some(city), Some(entries)) = fields else {
        return "Could not parse forecast data.".to_owned();
    };
    let country = data
        .pointer("/city/country")
        .and_then(|v| v.as_str())
        .unwrap_or("");

    let mut daily: std::collections::BTreeMap<String, &Value> = std::collections::BTreeMap::new();
    for entry in entries {
        let Some(dt_txt) = entry.get("dt_txt").and_then(|v| v.as_str()) else {
            continue;
        };
        let Some((date, time)) = dt_txt.split_once(' ') else {
            continue;
        };
        if time.starts_with("12:") || !daily.contains_key(date) {
            daily.insert(date.to_owned(), entry);
        }
    }

    let suffix = temp_suffix(imperial);
    let mut lines = vec![format!("5-day forecast for {city}, {country}:")];
    for (date, entry) in daily.iter().take(5) {
        let Some(condition) = entry
            .pointer("/weather/0/description")
            .and_then(|v| v.as_str())
        else {
            continue;
        };
        let Some(temp) = entry.pointer("/main/temp").and_then(|v| v.as_f64()) else {
            continue;
        };
        lines.push(format!("{date}: {}, {temp}°{suffix}", capitalize(condition)));
    }
    lines.join("\n")
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
