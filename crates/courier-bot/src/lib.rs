//! Courier orchestration core.
//!
//! Everything between the webhook ingress and the outbound transport wire:
//! message normalization and authorization, conversation state, the search
//! orchestrator, the follow-up state machine, and the transport clients.
//!
//! The [`router::WebhookHandler`] is the root of the object graph; the
//! server crate constructs it once and feeds it decoded webhook bodies.

pub mod chat_context;
pub mod chat_prompt;
pub mod config;
pub mod dedupe;
pub mod followup;
pub mod group_resolver;
pub mod ingest;
pub mod message;
pub mod oracle;
pub mod router;
pub mod search_client;
pub mod search_context;
pub mod search_service;
pub mod transport;
pub mod weather;

pub use chat_context::ChatContextStore;
pub use config::{ConfigError, Settings};
pub use dedupe::DedupeCache;
pub use message::{IncomingMessage, MentionSpan, Target, Transport};
pub use router::{Acknowledgement, WebhookHandler};
pub use search_client::{SearchClient, SearchError, SearchMode, SearchResult};
pub use search_context::SearchContextStore;
pub use search_service::SearchService;
