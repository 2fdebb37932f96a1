//! YouTube video search by parsing the embedded `ytInitialData` JSON.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::error::{ProviderError, Result};
use crate::http::FingerprintClient;
use crate::provider::{ProviderResult, SearchProvider};

const RESULT_LIMIT: usize = 10;

static YT_INITIAL_DATA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)ytInitialData\s*=\s*(\{.*?\});").expect("static regex"));

/// YouTube video search by scraping the results page.
pub struct YouTubeVideosProvider {
    client: FingerprintClient,
}

impl YouTubeVideosProvider {
    pub fn new() -> Self {
        Self {
            client: FingerprintClient::with_user_agent(
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
            ),
        }
    }
}

impl Default for YouTubeVideosProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchProvider for YouTubeVideosProvider {
    fn name(&self) -> &'static str {
        "youtube_videos"
    }

    async fn search(&self, query: &str) -> Result<Vec<ProviderResult>> {
        let resp = self
            .client
            .get(
                "https://www.youtube.com/results",
                &[("search_query", query)],
                &[("Accept-Language", "en-US,en;q=0.9")],
            )
            .await?;

        if !resp.is_success() {
            return Err(ProviderError::BadStatus {
                provider: "youtube_videos",
                status: resp.status,
            });
        }

        let Some(data) = extract_yt_initial_data(&resp.text()) else {
            return Ok(Vec::new());
        };
        Ok(collect_video_results(&data))
    }
}

// ---------------------------------------------------------------------------
// ytInitialData parsing
// ---------------------------------------------------------------------------

fn extract_yt_initial_data(html: &str) -> Option<Value> {
    let captures = YT_INITIAL_DATA_RE.captures(html)?;
    serde_json::from_str(captures.get(1)?.as_str()).ok()
}

/// Extract text from YouTube's nested text objects (`simpleText` or `runs`).
fn pick_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(map)) => {
            if let Some(Value::String(s)) = map.get("simpleText") {
                return s.clone();
            }
            if let Some(Value::Array(runs)) = map.get("runs") {
                return runs
                    .iter()
                    .filter_map(|run| run.get("text").and_then(|t| t.as_str()))
                    .collect::<String>()
                    .trim()
                    .to_owned();
            }
            String::new()
        }
        _ => String::new(),
    }
}

/// Recursively walk the payload collecting `videoRenderer` objects.
fn visit_video_renderers<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Object(map) => {
            if let Some(renderer) = map.get("videoRenderer")
                && renderer.is_object()
            {
                out.push(renderer);
            }
            for child in map.values() {
                visit_video_renderers(child, out);
            }
        }
        Value::Array(items) => {
            for child in items {
                visit_video_renderers(child, out);
            }
        }
        _ => {}
    }
}

fn collect_video_results(data: &Value) -> Vec<ProviderResult> {
    let mut renderers = Vec::new();
    visit_video_renderers(data, &mut renderers);

    let mut results = Vec::new();
    for item in renderers {
        if results.len() >= RESULT_LIMIT {
            break;
        }
        let Some(video_id) = item.get("videoId").and_then(|v| v.as_str()) else {
            continue;
        };

        let title = pick_text(item.get("title"));
        let description = pick_text(item.get("descriptionSnippet"));
        let duration = pick_text(item.get("lengthText"));
        let published = pick_text(item.get("publishedTimeText"));
        let uploader = pick_text(item.get("ownerText"));
        let views = pick_text(item.get("viewCountText"));
        let thumbnail = item
            .pointer("/thumbnail/thumbnails")
            .and_then(|v| v.as_array())
            .and_then(|thumbs| thumbs.last())
            .and_then(|t| t.get("url"))
            .and_then(|u| u.as_str())
            .map(str::to_owned);

        let mut snippet_parts = Vec::new();
        if !uploader.is_empty() {
            snippet_parts.push(format!("by {uploader}"));
        }
        if !duration.is_empty() {
            snippet_parts.push(format!("[{duration}]"));
        }
        if !published.is_empty() {
            snippet_parts.push(format!("({published})"));
        }
        if !views.is_empty() {
            snippet_parts.push(format!("- {views}"));
        }
        if !description.is_empty() {
            snippet_parts.push(format!("| {description}"));
        }

        results.push(ProviderResult {
            title,
            url: format!("https://www.youtube.com/watch?v={video_id}"),
            snippet: snippet_parts.join(" "),
            source: Some("YouTube".to_owned()),
            date: None,
            image_url: thumbnail,
        });
    }

    results
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pick_text_handles_all_shapes() {
        assert_eq!(pick_text(Some(&json!("plain"))), "plain");
        assert_eq!(pick_text(Some(&json!({"simpleText": "simple"}))), "simple");
        assert_eq!(
            pick_text(Some(&json!({"runs": [{"text": "a"}, {"text": "b"}]}))),
            "ab"
        );
        assert_eq!(pick_text(None), "");
    }

    #[test]
    fn collect_video_results_walks_nested_payload() {
        let data = json!({
            "contents": {
                "sections": [
                    {
                        "videoRenderer": {
                            "videoId": "abc123",
                            "title": {"runs": [{"text": "First video"}]},
                            "ownerText": {"simpleText": "Chan"},
                            "lengthText": {"simpleText": "10:00"},
                            "thumbnail": {"thumbnails": [
                                {"url": "https://i.ytimg.com/vi/abc123/small.jpg"},
                                {"url": "https://i.ytimg.com/vi/abc123/hq.jpg"}
                            ]}
                        }
                    },
                    {"other": {"videoRenderer": {"videoId": "def456", "title": {"simpleText": "Second"}}}}
                ]
            }
        });
        let results = collect_video_results(&data);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].url, "https://www.youtube.com/watch?v=abc123");
        assert_eq!(results[0].title, "First video");
        assert_eq!(
            results[0].image_url.as_deref(),
            Some("https://i.ytimg.com/vi/abc123/hq.jpg")
        );
        assert!(results[0].snippet.contains("by Chan"));
    }

    #[test]
    fn extract_yt_initial_data_finds_json() {
        let html = r#"<script>var x = 1; ytInitialData = {"a": 1};</script>"#;
        let data = extract_yt_initial_data(html).expect("data");
        assert_eq!(data["a"], 1);
        assert!(extract_yt_initial_data("no data here").is_none());
    }
}
