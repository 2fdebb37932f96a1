//! Courier webhook server entry point.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use courier_bot::config::Settings;
use courier_server::{build_handler, build_router};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present (silently ignore if missing).
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = Arc::new(Settings::from_env().context("invalid configuration")?);
    let handler = build_handler(Arc::clone(&settings)).context("failed to build handler")?;

    let router = build_router(handler);
    let addr = format!("{}:{}", settings.webhook_host, settings.webhook_port);
    info!(addr = %addr, "starting webhook server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, router)
        .await
        .context("server terminated")?;

    Ok(())
}
