//! Axum application: routes and shared state.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use serde_json::{Value, json};

use courier_bot::message::Transport;
use courier_bot::router::{Acknowledgement, WebhookHandler};

const TELEGRAM_SECRET_HEADER: &str = "X-Telegram-Bot-Api-Secret-Token";

/// Shared state accessible from every handler.
#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<WebhookHandler>,
}

/// Build the router with all webhook routes registered.
pub fn build_router(handler: Arc<WebhookHandler>) -> Router {
    let state = AppState { handler };
    Router::new()
        .route("/healthz", get(healthz))
        .route("/webhook/signal", post(signal_webhook))
        .route("/webhook/whatsapp", post(whatsapp_webhook))
        .route("/webhook/telegram", post(telegram_webhook))
        .with_state(state)
}

async fn healthz() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn signal_webhook(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Json<Acknowledgement> {
    Json(
        state
            .handler
            .handle_webhook(&payload, Some(Transport::Signal), None)
            .await,
    )
}

async fn whatsapp_webhook(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Json<Acknowledgement> {
    Json(
        state
            .handler
            .handle_webhook(&payload, Some(Transport::WhatsApp), None)
            .await,
    )
}

async fn telegram_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Json<Acknowledgement> {
    let secret = headers
        .get(TELEGRAM_SECRET_HEADER)
        .and_then(|value| value.to_str().ok());
    Json(
        state
            .handler
            .handle_webhook(&payload, Some(Transport::Telegram), secret)
            .await,
    )
}
