//! Multi-engine search providers for Courier.
//!
//! Each provider implements the [`SearchProvider`] trait and is reachable
//! through the name registry in [`registry`].  Scraping providers share the
//! fingerprint-randomizing HTTP client in [`http`]; JSON providers use the
//! same client with plain `serde_json` extraction.
//!
//! Providers signal "no results" with an empty vector.  An `Err` always means
//! the request or the parse failed, never that the query had no hits — the
//! orchestration layer above relies on that distinction.

pub mod error;
pub mod http;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod text;

pub use error::{ProviderError, Result};
pub use http::FingerprintClient;
pub use provider::{ProviderResult, SearchProvider};
pub use registry::{build_provider, provider_names};
