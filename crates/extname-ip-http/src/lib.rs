// # HTTP Address Source
//
// This crate provides an HTTP-based address source for extname.
//
// ## Architecture
//
// Fetches the current public address from an external "what is my IP"
// service (icanhazip.com, api.ipify.org, ifconfig.me/ip) with a single GET.
// The response body is returned untouched; trimming and IPv4 validation
// happen in the core. Scheduling belongs to the core's Poller, so this
// source holds no timer and no cache.
//
// Every request is bounded by the client timeout. A service that accepts the
// connection and then stalls yields an error instead of a stuck poll tick.

use async_trait::async_trait;
use extname_core::config::AddressSourceConfig;
use extname_core::traits::AddressSource;
use extname_core::{Error, Result};
use std::time::Duration;

/// Default request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest body accepted from the service; an address is a few bytes
const MAX_BODY_BYTES: usize = 1024;

/// HTTP-based address source
pub struct HttpAddressSource {
    /// URL to fetch the address from
    url: String,

    /// HTTP client (carries the timeout)
    client: reqwest::Client,
}

impl HttpAddressSource {
    /// Create a new HTTP address source with the default timeout
    ///
    /// # Parameters
    ///
    /// - `url`: URL returning the address as plain text (e.g., "http://icanhazip.com")
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(url, DEFAULT_TIMEOUT)
    }

    /// Create with a custom request timeout
    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }

    /// Build from the core configuration
    pub fn from_config(config: &AddressSourceConfig) -> Result<Self> {
        Self::with_timeout(config.url.clone(), config.timeout())
    }

    /// The URL being polled
    pub fn url(&self) -> &str {
        &self.url
    }

    fn too_large(&self, len: u64) -> Error {
        Error::address_source(format!(
            "Response from {} too large (at least {} bytes, limit {})",
            self.url, len, MAX_BODY_BYTES
        ))
    }
}

#[async_trait]
impl AddressSource for HttpAddressSource {
    async fn current(&self) -> Result<String> {
        let response = self
            .client
            .get(&self.url)
            .header("Accept", "text/plain")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::timeout(format!("GET {}: {}", self.url, e))
                } else {
                    Error::address_source(format!("Request to {} failed: {}", self.url, e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::address_source(format!(
                "{} answered with HTTP {}",
                self.url, status
            )));
        }

        if let Some(len) = response.content_length()
            && len > MAX_BODY_BYTES as u64
        {
            return Err(self.too_large(len));
        }

        // Stream the body so a misbehaving service cannot make us buffer it all.
        let mut response = response;
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            if e.is_timeout() {
                Error::timeout(format!("GET {}: {}", self.url, e))
            } else {
                Error::address_source(format!("Failed to read response: {}", e))
            }
        })? {
            if body.len() + chunk.len() > MAX_BODY_BYTES {
                return Err(self.too_large((body.len() + chunk.len()) as u64));
            }
            body.extend_from_slice(&chunk);
        }

        let text = String::from_utf8_lossy(&body).into_owned();
        tracing::debug!("{} reported {:?}", self.url, text);
        Ok(text)
    }

    fn source_name(&self) -> &str {
        &self.url
    }
}
