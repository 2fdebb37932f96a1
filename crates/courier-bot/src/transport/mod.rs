//! Outbound transport clients.
//!
//! Each client implements [`MessengerClient`] so the router can dispatch on
//! the message's transport without knowing wire details.  Send failures are
//! [`SendError`]s; background tasks log them and never crash the process.

mod signal;
mod telegram;
mod whatsapp;

pub use signal::SignalClient;
pub use telegram::TelegramClient;
pub use whatsapp::WhatsAppClient;

use async_trait::async_trait;

use crate::message::Target;

/// Outbound send failure.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The transport was never configured on this process.
    #[error("{transport} is not configured.")]
    NotConfigured { transport: &'static str },

    /// The target has neither a recipient nor a group id.
    #[error("missing {transport} send target")]
    MissingTarget { transport: &'static str },

    /// The request never produced a response.
    #[error("{transport} send failed due to network error (recipient={recipient})")]
    Network {
        transport: &'static str,
        recipient: String,
    },

    /// The endpoint answered with an error status.
    #[error("{transport} send failed with status {status} (recipient={recipient}): {detail}")]
    Status {
        transport: &'static str,
        status: u16,
        recipient: String,
        detail: String,
    },

    /// All group candidates failed; wraps the last candidate error with the
    /// resolver diagnostics.
    #[error(
        "{source} (resolver_cache_refreshed={cache_refreshed}, candidate_count={candidate_count}, final_candidate={final_candidate})"
    )]
    GroupExhausted {
        #[source]
        source: Box<SendError>,
        cache_refreshed: bool,
        candidate_count: usize,
        final_candidate: String,
    },
}

impl SendError {
    /// HTTP status of the failure, when one was received.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            SendError::Status { status, .. } => Some(*status),
            SendError::GroupExhausted { source, .. } => source.status_code(),
            _ => None,
        }
    }
}

/// Uniform outbound interface over Signal, Telegram, and WhatsApp.
#[async_trait]
pub trait MessengerClient: Send + Sync {
    /// Send a text message.  `fallback_recipient` is the DM peer to try when
    /// a group send exhausts its candidates with 400s (Signal only).
    async fn send_text(
        &self,
        target: &Target,
        message: &str,
        fallback_recipient: Option<&str>,
    ) -> Result<(), SendError>;

    /// Send an image with an optional caption.
    async fn send_image(
        &self,
        target: &Target,
        image_bytes: &[u8],
        content_type: &str,
        caption: Option<&str>,
        fallback_recipient: Option<&str>,
    ) -> Result<(), SendError>;
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

pub(crate) fn suffix_for_content_type(content_type: &str) -> &'static str {
    if content_type.contains("png") {
        "png"
    } else if content_type.contains("jpeg") || content_type.contains("jpg") {
        "jpg"
    } else if content_type.contains("webp") {
        "webp"
    } else {
        "bin"
    }
}

/// Compact a response body into a bounded one-line diagnostic.
pub(crate) fn compact_detail(body: &str) -> String {
    let detail = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if detail.is_empty() {
        return "No error detail".to_owned();
    }
    if detail.chars().count() > 240 {
        let truncated: String = detail.chars().take(240).collect();
        return format!("{truncated}...");
    }
    detail
}
