//! HTTP surface smoke tests: health endpoint and webhook acknowledgements.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use courier_bot::chat_context::ChatContextStore;
use courier_bot::config::Settings;
use courier_bot::dedupe::DedupeCache;
use courier_bot::oracle::{ChatOracle, ChatReplyError};
use courier_bot::router::WebhookHandler;
use courier_server::build_router;

struct SilentOracle;

#[async_trait]
impl ChatOracle for SilentOracle {
    async fn generate_reply(&self, _messages: &[Value]) -> Result<String, ChatReplyError> {
        Err(ChatReplyError::new("not under test"))
    }
}

fn test_handler() -> Arc<WebhookHandler> {
    let mut settings = Settings::default();
    settings.signal_enabled = false;
    settings.telegram_enabled = false;
    settings.whatsapp_enabled = false;
    Arc::new(WebhookHandler {
        settings: Arc::new(settings),
        signal_client: None,
        whatsapp_client: None,
        telegram_client: None,
        chat_oracle: Arc::new(SilentOracle),
        image_oracle: None,
        chat_context: Arc::new(ChatContextStore::new(6, Duration::from_secs(1800))),
        dedupe: Arc::new(DedupeCache::new(Duration::from_secs(300))),
        weather_client: None,
        search_service: None,
    })
}

async fn serve() -> String {
    let router = build_router(test_handler());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn healthz_reports_ok() {
    let base = serve().await;
    let body: Value = reqwest::get(format!("{base}/healthz"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn disabled_transport_is_acknowledged_ignored() {
    let base = serve().await;
    let client = reqwest::Client::new();
    let body: Value = client
        .post(format!("{base}/webhook/signal"))
        .json(&json!({
            "envelope": {
                "sourceNumber": "+15550002222",
                "timestamp": 1,
                "dataMessage": {"message": "hi", "timestamp": 1}
            }
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"status": "ignored", "reason": "signal_disabled"}));
}

#[tokio::test]
async fn telegram_webhook_requires_matching_secret() {
    let mut settings = Settings::default();
    settings.signal_enabled = false;
    settings.telegram_enabled = true;
    settings.telegram_webhook_secret = Some("expected".into());
    settings.telegram_disable_auth = true;

    // A telegram transport stub is required for the gate to pass enablement.
    struct NullMessenger;
    #[async_trait]
    impl courier_bot::transport::MessengerClient for NullMessenger {
        async fn send_text(
            &self,
            _target: &courier_bot::message::Target,
            _message: &str,
            _fallback_recipient: Option<&str>,
        ) -> Result<(), courier_bot::transport::SendError> {
            Ok(())
        }
        async fn send_image(
            &self,
            _target: &courier_bot::message::Target,
            _image_bytes: &[u8],
            _content_type: &str,
            _caption: Option<&str>,
            _fallback_recipient: Option<&str>,
        ) -> Result<(), courier_bot::transport::SendError> {
            Ok(())
        }
    }

    let handler = Arc::new(WebhookHandler {
        settings: Arc::new(settings),
        signal_client: None,
        whatsapp_client: None,
        telegram_client: Some(Arc::new(NullMessenger)),
        chat_oracle: Arc::new(SilentOracle),
        image_oracle: None,
        chat_context: Arc::new(ChatContextStore::new(6, Duration::from_secs(1800))),
        dedupe: Arc::new(DedupeCache::new(Duration::from_secs(300))),
        weather_client: None,
        search_service: None,
    });

    let router = build_router(handler);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let client = reqwest::Client::new();
    let body: Value = client
        .post(format!("http://{addr}/webhook/telegram"))
        .header("X-Telegram-Bot-Api-Secret-Token", "wrong")
        .json(&json!({}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        body,
        json!({"status": "ignored", "reason": "invalid_telegram_secret"})
    );
}
