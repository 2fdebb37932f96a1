//! Fingerprint-randomizing HTTP client for scraping providers.
//!
//! Several engines fingerprint the TLS handshake and the HTTP/2 SETTINGS
//! frame to reject automated clients.  [`FingerprintClient`] builds a reqwest
//! client whose rustls cipher-suite ordering is shuffled (keeping the TLS 1.3
//! suites in front) and whose HTTP/2 transport settings are randomized within
//! bounded ranges, so no two client instances present the same fingerprint.
//!
//! When a request dies with an HPACK or HTTP/2 protocol error the client
//! rebuilds itself as HTTP/1.1-only and retries the request once.  That
//! fallback is part of the provider contract: some engines (notably Google)
//! reject randomized H2 sessions outright.

use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rand::Rng;
use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ProviderError, Result};

/// Default per-request timeout for provider traffic.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// How many TLS 1.3 suites stay pinned at the front of the cipher list.
const PINNED_SUITE_COUNT: usize = 3;

/// Realistic browser User-Agent strings for engines that block obvious bots.
const BROWSER_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 \
     (KHTML, like Gecko) Version/17.6 Safari/605.1.15",
];

/// Pick a random browser User-Agent from the pool.
pub fn random_browser_user_agent() -> &'static str {
    let mut rng = rand::rng();
    BROWSER_USER_AGENTS[rng.random_range(0..BROWSER_USER_AGENTS.len())]
}

// ---------------------------------------------------------------------------
// Response wrapper
// ---------------------------------------------------------------------------

/// A fully-buffered HTTP response.
#[derive(Debug)]
pub struct HttpResponse {
    /// Final status code.
    pub status: u16,
    /// Final URL after redirects.
    pub url: String,
    body: Vec<u8>,
}

impl HttpResponse {
    /// The raw response body.
    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    /// The response body decoded as UTF-8 (lossy).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parse the body as JSON.
    pub fn json(&self, provider: &'static str) -> Result<Value> {
        serde_json::from_slice(&self.body).map_err(|e| ProviderError::ParseFailed {
            provider,
            reason: format!("invalid JSON: {e}"),
        })
    }

    /// True when the status is below 400.
    pub fn is_success(&self) -> bool {
        self.status < 400
    }
}

// ---------------------------------------------------------------------------
// Request spec
// ---------------------------------------------------------------------------

enum RequestSpec<'a> {
    Get {
        url: &'a str,
        query: &'a [(&'a str, &'a str)],
        headers: &'a [(&'a str, &'a str)],
    },
    PostForm {
        url: &'a str,
        form: &'a [(&'a str, &'a str)],
    },
}

impl RequestSpec<'_> {
    fn url(&self) -> &str {
        match self {
            RequestSpec::Get { url, .. } | RequestSpec::PostForm { url, .. } => url,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client with per-instance TLS and HTTP/2 fingerprint randomization.
pub struct FingerprintClient {
    client: RwLock<reqwest::Client>,
    http2: AtomicBool,
    default_headers: HeaderMap,
    timeout: Duration,
}

impl FingerprintClient {
    /// Build a client with a randomized fingerprint and the default timeout.
    pub fn new() -> Self {
        Self::with_options(None, DEFAULT_TIMEOUT, true)
    }

    /// Build a client presenting the given User-Agent.
    pub fn with_user_agent(user_agent: &str) -> Self {
        Self::with_options(Some(user_agent), DEFAULT_TIMEOUT, true)
    }

    /// Build a client with full control over UA, timeout, and HTTP/2.
    pub fn with_options(user_agent: Option<&str>, timeout: Duration, http2: bool) -> Self {
        let mut default_headers = HeaderMap::new();
        if let Some(ua) = user_agent
            && let Ok(value) = HeaderValue::from_str(ua)
        {
            default_headers.insert(USER_AGENT, value);
        }

        let client = build_client(&default_headers, timeout, http2);
        Self {
            client: RwLock::new(client),
            http2: AtomicBool::new(http2),
            default_headers,
            timeout,
        }
    }

    /// Issue a GET request with query parameters and extra headers.
    pub async fn get(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse> {
        self.send(&RequestSpec::Get {
            url,
            query,
            headers,
        })
        .await
    }

    /// Issue a POST request with a urlencoded form body.
    pub async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<HttpResponse> {
        self.send(&RequestSpec::PostForm { url, form }).await
    }

    async fn send(&self, spec: &RequestSpec<'_>) -> Result<HttpResponse> {
        match self.send_once(spec).await {
            Ok(resp) => Ok(resp),
            Err(err) => {
                let reason = error_chain(&err);
                if self.http2.load(Ordering::Relaxed) && is_h2_protocol_error(&reason) {
                    warn!(url = spec.url(), %reason, "HTTP/2 protocol error, falling back to HTTP/1.1");
                    self.downgrade_to_http1();
                    return self.send_once(spec).await.map_err(|e| {
                        ProviderError::RequestFailed {
                            url: spec.url().to_owned(),
                            reason: error_chain(&e),
                        }
                    });
                }
                Err(ProviderError::RequestFailed {
                    url: spec.url().to_owned(),
                    reason,
                })
            }
        }
    }

    async fn send_once(&self, spec: &RequestSpec<'_>) -> reqwest::Result<HttpResponse> {
        let client = self
            .client
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        let builder = match spec {
            RequestSpec::Get {
                url,
                query,
                headers,
            } => {
                let mut builder = client.get(*url);
                if !query.is_empty() {
                    builder = builder.query(query);
                }
                for (name, value) in headers.iter() {
                    if let (Ok(name), Ok(value)) = (
                        HeaderName::from_bytes(name.as_bytes()),
                        HeaderValue::from_str(value),
                    ) {
                        builder = builder.header(name, value);
                    }
                }
                builder
            }
            RequestSpec::PostForm { url, form } => client.post(*url).form(form),
        };

        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let url = resp.url().to_string();
        let body = resp.bytes().await?.to_vec();
        debug!(url = %url, status, bytes = body.len(), "provider request complete");
        Ok(HttpResponse { status, url, body })
    }

    fn downgrade_to_http1(&self) {
        self.http2.store(false, Ordering::Relaxed);
        let client = build_client(&self.default_headers, self.timeout, false);
        *self
            .client
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = client;
    }
}

impl Default for FingerprintClient {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Client construction
// ---------------------------------------------------------------------------

fn build_client(headers: &HeaderMap, timeout: Duration, http2: bool) -> reqwest::Client {
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .default_headers(headers.clone());

    if let Some(tls) = randomized_tls_config(http2) {
        builder = builder.use_preconfigured_tls(tls);
    }

    if http2 {
        let mut rng = rand::rng();
        builder = builder
            .http2_initial_stream_window_size(rng.random_range(65_535..=131_072u32))
            .http2_initial_connection_window_size(rng.random_range(1_048_576..=16_777_215u32))
            .http2_max_frame_size(rng.random_range(16_384..=1_048_576u32))
            .http2_adaptive_window(rng.random_bool(0.5));
    } else {
        builder = builder.http1_only();
    }

    // A plain client still works if the randomized one fails to build.
    builder.build().unwrap_or_default()
}

/// Build a rustls config whose cipher-suite ordering is shuffled, keeping the
/// TLS 1.3 suites pinned at the front.
fn randomized_tls_config(http2: bool) -> Option<rustls::ClientConfig> {
    let mut provider = rustls::crypto::ring::default_provider();
    if provider.cipher_suites.len() > PINNED_SUITE_COUNT {
        let mut rng = rand::rng();
        provider.cipher_suites[PINNED_SUITE_COUNT..].shuffle(&mut rng);
    }

    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let mut config = rustls::ClientConfig::builder_with_provider(provider.into())
        .with_safe_default_protocol_versions()
        .ok()?
        .with_root_certificates(roots)
        .with_no_client_auth();

    config.alpn_protocols = if http2 {
        vec![b"h2".to_vec(), b"http/1.1".to_vec()]
    } else {
        vec![b"http/1.1".to_vec()]
    };
    Some(config)
}

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

/// Flatten an error and its source chain into one string.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(": ")
}

/// True when the error text indicates an HPACK or H2-level protocol failure.
fn is_h2_protocol_error(reason: &str) -> bool {
    let lowered = reason.to_ascii_lowercase();
    lowered.contains("hpack")
        || lowered.contains("table size")
        || (lowered.contains("http2") && lowered.contains("protocol"))
        || lowered.contains("protocol error")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_pool_is_non_empty() {
        assert!(!BROWSER_USER_AGENTS.is_empty());
        let ua = random_browser_user_agent();
        assert!(ua.contains("Mozilla/5.0"));
    }

    #[test]
    fn h2_errors_are_classified() {
        assert!(is_h2_protocol_error("HPACK decoding failed"));
        assert!(is_h2_protocol_error("dynamic table size update"));
        assert!(is_h2_protocol_error("http2 error: connection protocol violated"));
        assert!(is_h2_protocol_error("stream closed: protocol error"));
        assert!(!is_h2_protocol_error("connection refused"));
        assert!(!is_h2_protocol_error("timed out"));
    }

    #[test]
    fn randomized_tls_config_builds() {
        let config = randomized_tls_config(true).expect("tls config");
        assert_eq!(config.alpn_protocols[0], b"h2".to_vec());
        let config = randomized_tls_config(false).expect("tls config");
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn clients_downgrade_to_http1() {
        let client = FingerprintClient::new();
        assert!(client.http2.load(Ordering::Relaxed));
        client.downgrade_to_http1();
        assert!(!client.http2.load(Ordering::Relaxed));
    }

    #[test]
    fn response_text_and_json() {
        let resp = HttpResponse {
            status: 200,
            url: "https://example.com".into(),
            body: br#"{"ok":true}"#.to_vec(),
        };
        assert!(resp.is_success());
        assert_eq!(resp.text(), r#"{"ok":true}"#);
        assert_eq!(resp.json("test").unwrap()["ok"], true);
    }
}
