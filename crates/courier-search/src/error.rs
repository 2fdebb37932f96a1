//! Provider error types.
//!
//! All providers surface failures through [`ProviderError`].  Variants carry
//! enough context to log a useful record without inspecting opaque strings.

/// Unified error type for search providers.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The HTTP request could not be sent or the connection failed.
    #[error("request to {url} failed: {reason}")]
    RequestFailed { url: String, reason: String },

    /// The remote endpoint answered with a non-success status.
    #[error("{provider} returned status {status}")]
    BadStatus { provider: &'static str, status: u16 },

    /// The response body could not be decoded into the expected shape.
    #[error("{provider} response parse failed: {reason}")]
    ParseFailed {
        provider: &'static str,
        reason: String,
    },

    /// A token the provider depends on (e.g. the DuckDuckGo vqd) was absent.
    #[error("{provider} token extraction failed")]
    TokenMissing { provider: &'static str },

    /// The provider requires configuration that was not supplied.
    #[error("{provider} is missing required configuration: {what}")]
    MissingConfig {
        provider: &'static str,
        what: &'static str,
    },
}

/// Convenience alias used throughout the search crate.
pub type Result<T> = std::result::Result<T, ProviderError>;
