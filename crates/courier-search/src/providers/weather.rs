//! OpenWeatherMap provider: current conditions and 5-day forecast.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde_json::Value;

use crate::error::{ProviderError, Result};
use crate::http::FingerprintClient;
use crate::provider::{ProviderResult, SearchProvider};

const OPENWEATHER_BASE: &str = "https://api.openweathermap.org/data/2.5";

/// Measurement system for temperatures and wind speeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeatherUnits {
    Metric,
    Imperial,
}

impl WeatherUnits {
    pub fn as_str(self) -> &'static str {
        match self {
            WeatherUnits::Metric => "metric",
            WeatherUnits::Imperial => "imperial",
        }
    }

    fn temp_suffix(self) -> char {
        match self {
            WeatherUnits::Metric => 'C',
            WeatherUnits::Imperial => 'F',
        }
    }
}

/// OpenWeatherMap lookup provider.
pub struct WeatherProvider {
    client: FingerprintClient,
    api_key: String,
    units: WeatherUnits,
}

impl WeatherProvider {
    pub fn new(api_key: impl Into<String>, units: WeatherUnits) -> Self {
        Self {
            client: FingerprintClient::new(),
            api_key: api_key.into(),
            units,
        }
    }

    async fn fetch(&self, endpoint: &str, location: &str) -> Result<Value> {
        let url = format!("{OPENWEATHER_BASE}/{endpoint}");
        let resp = self
            .client
            .get(
                &url,
                &[
                    ("q", location),
                    ("appid", &self.api_key),
                    ("units", self.units.as_str()),
                ],
                &[],
            )
            .await?;

        if !resp.is_success() {
            return Err(ProviderError::BadStatus {
                provider: "weather",
                status: resp.status,
            });
        }
        resp.json("weather")
    }

    /// Current conditions for a location.
    pub async fn current(&self, location: &str) -> Result<Vec<ProviderResult>> {
        let data = self.fetch("weather", location).await?;
        Ok(format_current(&data, self.units).into_iter().collect())
    }

    /// 5-day forecast for a location.
    pub async fn forecast(&self, location: &str) -> Result<Vec<ProviderResult>> {
        let data = self.fetch("forecast", location).await?;
        Ok(format_forecast(&data, self.units).into_iter().collect())
    }
}

#[async_trait]
impl SearchProvider for WeatherProvider {
    fn name(&self) -> &'static str {
        "weather"
    }

    async fn search(&self, query: &str) -> Result<Vec<ProviderResult>> {
        // A bare weather search means current conditions.
        self.current(query).await
    }
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

fn format_current(data: &Value, units: WeatherUnits) -> Option<ProviderResult> {
    let city = data.get("name")?.as_str()?;
    let country = data
        .pointer("/sys/country")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let condition = capitalize(
        data.pointer("/weather/0/description")
            .and_then(|v| v.as_str())?,
    );
    let temp = data.pointer("/main/temp")?.as_f64()?;
    let feels = data.pointer("/main/feels_like").and_then(|v| v.as_f64());
    let humidity = data.pointer("/main/humidity").and_then(|v| v.as_f64());
    let wind = data.pointer("/wind/speed").and_then(|v| v.as_f64());
    let city_id = data.get("id").and_then(|v| v.as_i64()).unwrap_or_default();

    let suffix = units.temp_suffix();
    let mut lines = vec![
        format!("Condition: {condition}"),
        format!("Temperature: {temp}°{suffix}"),
    ];
    if let Some(feels) = feels {
        lines.push(format!("Feels like: {feels}°{suffix}"));
    }
    if let Some(humidity) = humidity {
        lines.push(format!("Humidity: {humidity}%"));
    }
    if let Some(wind) = wind {
        lines.push(format!("Wind: {wind} m/s"));
    }

    Some(ProviderResult::text(
        format!("Weather for {city}, {country}"),
        format!("https://openweathermap.org/city/{city_id}"),
        lines.join("\n"),
        "OpenWeatherMap",
    ))
}

fn format_forecast(data: &Value, units: WeatherUnits) -> Option<ProviderResult> {
    let city = data.pointer("/city/name")?.as_str()?;
    let country = data
        .pointer("/city/country")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let entries = data.get("list")?.as_array()?;
    let city_id = data
        .pointer("/city/id")
        .and_then(|v| v.as_i64())
        .unwrap_or_default();

    // One entry per day, preferring the 12:00 slot.
    let mut daily: BTreeMap<String, &Value> = BTreeMap::new();
    for entry in entries {
        let Some(dt_txt) = entry.get("dt_txt").and_then(|v| v.as_str()) else {
            continue;
        };
        let Ok(dt) = NaiveDateTime::parse_from_str(dt_txt, "%Y-%m-%d %H:%M:%S") else {
            continue;
        };
        let date_key = dt.date().to_string();
        if dt.format("%H").to_string() == "12" || !daily.contains_key(&date_key) {
            daily.insert(date_key, entry);
        }
    }

    let suffix = units.temp_suffix();
    let mut lines = Vec::new();
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

    Some(ProviderResult::text(
        format!("5-day forecast for {city}, {country}"),
        format!("https://openweathermap.org/city/{city_id}"),
        lines.join("\n"),
        "OpenWeatherMap",
    ))
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
