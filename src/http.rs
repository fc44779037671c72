//! HTTP access to external sources
//!
//! This module provides the content-fetch capability used by the fingerprint
//! detector and the transport-security checker, and the JSON GET used by the
//! registration relays and the operator intelligence service:
//! - Connection pooling and TCP keepalive for repeated lookups
//! - Redirects followed, with the final URL recorded
//! - Bounded body size
//! - Failures classified into [`SourceError`] variants so resolver chains can
//!   decide whether to move on

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, StatusCode};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::chain::Alternate;
use crate::error::SourceError;

/// Largest response body read for fingerprinting; the rest is never downloaded
pub const MAX_BODY_BYTES: usize = 512 * 1024;

const USER_AGENT: &str = concat!("Mozilla/5.0 (compatible; domintel/", env!("CARGO_PKG_VERSION"), ")");

/// A fetched page: status, headers and (possibly truncated) body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedPage {
    pub requested_url: String,
    pub final_url: String,
    pub status: u16,
    /// Header names are lowercase; repeated headers are joined with ", "
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl FetchedPage {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Final response was served over TLS
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.final_url.starts_with("https://")
    }

    /// An insecure request ended on a secure URL
    #[must_use]
    pub fn upgraded_to_secure(&self) -> bool {
        self.requested_url.starts_with("http://") && self.is_secure()
    }
}

/// Capability to fetch a URL, following redirects
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, SourceError>;
}

/// Fetches `<scheme>://<domain>/` as one alternate of a resolver chain
pub struct SchemeProbe {
    name: String,
    scheme: &'static str,
    fetcher: Arc<dyn ContentFetcher>,
}

impl SchemeProbe {
    pub fn https(fetcher: Arc<dyn ContentFetcher>) -> Self {
        Self::new("https", fetcher)
    }

    pub fn http(fetcher: Arc<dyn ContentFetcher>) -> Self {
        Self::new("http", fetcher)
    }

    fn new(scheme: &'static str, fetcher: Arc<dyn ContentFetcher>) -> Self {
        Self {
            name: format!("fetch:{}", scheme),
            scheme,
            fetcher,
        }
    }
}

#[async_trait]
impl Alternate<str, FetchedPage> for SchemeProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn attempt(&self, domain: &str) -> Result<FetchedPage, SourceError> {
        self.fetcher
            .fetch(&format!("{}://{}/", self.scheme, domain))
            .await
    }
}

/// reqwest-backed client for all outbound HTTP
///
/// # Examples
///
/// ```
/// use domintel::http::HttpClient;
/// use std::time::Duration;
///
/// # fn example() -> anyhow::Result<()> {
/// let client = HttpClient::new(Duration::from_secs(8))?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Creates a client with pooled connections and the given request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = ClientBuilder::new()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// GETs `url` and parses the body as JSON
    pub async fn get_json(
        &self,
        source_name: &str,
        url: &str,
    ) -> Result<serde_json::Value, SourceError> {
        debug!("{}: GET {}", source_name, url);

        let resp = self
            .client
            .get(url)
            .header("Accept", "application/rdap+json, application/json")
            .send()
            .await
            .map_err(|e| classify_send_error(source_name, &e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::rejected(source_name, describe_status(status)));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| SourceError::unavailable(source_name, e))?;

        serde_json::from_str(&text).map_err(|e| SourceError::malformed(source_name, e))
    }
}

#[async_trait]
impl ContentFetcher for HttpClient {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, SourceError> {
        debug!("Fetching {}", url);

        let mut resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_send_error(url, &e))?;

        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();

        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in resp.headers() {
            let Ok(value) = value.to_str() else { continue };
            headers
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }

        let mut body_bytes: Vec<u8> = Vec::new();
        while body_bytes.len() < MAX_BODY_BYTES {
            match resp.chunk().await {
                Ok(Some(chunk)) => body_bytes.extend_from_slice(&chunk),
                Ok(None) => break,
                Err(e) if body_bytes.is_empty() => return Err(SourceError::unavailable(url, e)),
                Err(e) => {
                    debug!("Body of {} cut short after {} bytes: {}", url, body_bytes.len(), e);
                    break;
                }
            }
        }
        body_bytes.truncate(MAX_BODY_BYTES);
        let body = String::from_utf8_lossy(&body_bytes).into_owned();

        debug!("Fetched {} -> {} (HTTP {})", url, final_url, status);
        Ok(FetchedPage {
            requested_url: url.to_string(),
            final_url,
            status,
            headers,
            body,
        })
    }
}

fn classify_send_error(source_name: &str, err: &reqwest::Error) -> SourceError {
    if let Some(status) = err.status() {
        return SourceError::rejected(source_name, describe_status(status));
    }
    if err.is_timeout() {
        return SourceError::unavailable(source_name, "request timed out");
    }
    if err.is_connect() {
        return SourceError::unavailable(source_name, format!("connection failed: {}", err));
    }
    SourceError::unavailable(source_name, err)
}

fn describe_status(status: StatusCode) -> String {
    match status.as_u16() {
        429 => "rate limited (HTTP 429)".to_string(),
        403 => "blocked (HTTP 403)".to_string(),
        _ => format!("HTTP {}", status),
    }
}
