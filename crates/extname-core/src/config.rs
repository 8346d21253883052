//! Configuration types for the extname system
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::traits::ServiceRef;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Namespace holding the managed records (both paths)
    pub namespace: String,

    /// Name of the record the poller keeps current
    #[serde(default)]
    pub service_name: Option<String>,

    /// Address source configuration
    #[serde(default)]
    pub address_source: AddressSourceConfig,

    /// Push receiver configuration
    #[serde(default)]
    pub receiver: ReceiverConfig,

    /// Optimistic-concurrency retry settings
    #[serde(default)]
    pub retry: RetryConfig,

    /// Record store connection settings
    #[serde(default)]
    pub store: StoreConfig,
}

impl SyncConfig {
    /// Create a configuration for the given namespace with defaults elsewhere
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            service_name: None,
            address_source: AddressSourceConfig::default(),
            receiver: ReceiverConfig::default(),
            retry: RetryConfig::default(),
            store: StoreConfig::default(),
        }
    }

    /// Set the poll-path target record
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Whether the poller runs at all
    pub fn polling_enabled(&self) -> bool {
        self.address_source.interval_secs > 0
    }

    /// The statically configured poll target, if any
    pub fn poll_target(&self) -> Option<ServiceRef> {
        self.service_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| ServiceRef::new(self.namespace.trim(), name))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.namespace.trim().is_empty() {
            return Err(crate::Error::config("Namespace cannot be empty"));
        }

        if !crate::traits::is_valid_namespace(self.namespace.trim()) {
            return Err(crate::Error::config(format!(
                "Namespace '{}' is not a valid Kubernetes namespace name",
                self.namespace
            )));
        }

        match self.poll_target() {
            None if self.polling_enabled() => {
                return Err(crate::Error::config(
                    "Service name is required when polling is enabled",
                ));
            }
            Some(target) if !target.is_well_formed() => {
                return Err(crate::Error::config(format!(
                    "Service name '{}' is not a valid Kubernetes Service name",
                    target.name()
                )));
            }
            _ => {}
        }

        if !self.polling_enabled() && self.receiver.listen_address.is_none() {
            return Err(crate::Error::config(
                "Nothing to do: polling is disabled and no listen address is set",
            ));
        }

        self.address_source.validate()?;
        self.receiver.validate()?;
        self.retry.validate()?;
        self.store.validate()?;

        Ok(())
    }
}

/// Address source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressSourceConfig {
    /// URL returning the current address as plain text
    #[serde(default = "default_source_url")]
    pub url: String,

    /// Seconds between polls (0 disables polling)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Per-fetch timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl AddressSourceConfig {
    /// Validate the address source configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.interval_secs == 0 {
            return Ok(());
        }
        if self.url.is_empty() {
            return Err(crate::Error::config("Address source URL cannot be empty"));
        }
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(crate::Error::config(format!(
                "Address source URL must use HTTP or HTTPS scheme. Got: {}",
                self.url
            )));
        }
        if self.timeout_secs == 0 {
            return Err(crate::Error::config("Address source timeout must be > 0"));
        }
        Ok(())
    }

    /// Poll interval as a duration
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Fetch timeout as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for AddressSourceConfig {
    fn default() -> Self {
        Self {
            url: default_source_url(),
            interval_secs: default_interval_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Push receiver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverConfig {
    /// Socket address to bind (None disables the receiver)
    #[serde(default = "default_listen_address")]
    pub listen_address: Option<String>,
}

impl ReceiverConfig {
    /// Validate the receiver configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if let Some(addr) = &self.listen_address {
            addr.parse::<std::net::SocketAddr>().map_err(|e| {
                crate::Error::config(format!("Invalid listen address '{}': {}", addr, e))
            })?;
        }
        Ok(())
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
        }
    }
}

/// Retry settings for the conflict-safe updater
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of read-modify-write attempts per update
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt (in milliseconds)
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound on the delay between attempts (in milliseconds)
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl RetryConfig {
    /// Validate the retry configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.max_attempts == 0 || self.max_attempts > 20 {
            return Err(crate::Error::config(format!(
                "Max attempts must be between 1 and 20. Got: {}",
                self.max_attempts
            )));
        }
        if self.max_backoff_ms >= 1000 {
            return Err(crate::Error::config(format!(
                "Max backoff must stay below one second. Got: {}ms",
                self.max_backoff_ms
            )));
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Record store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// API server URL (in-cluster discovery when absent)
    #[serde(default)]
    pub api_url: Option<String>,

    /// Path to a bearer token file
    #[serde(default)]
    pub token_path: Option<String>,

    /// Kubeconfig file to take the current context from
    #[serde(default)]
    pub kubeconfig: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl StoreConfig {
    /// Validate the store configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if let Some(url) = &self.api_url
            && !url.starts_with("http://")
            && !url.starts_with("https://")
        {
            return Err(crate::Error::config(format!(
                "Store API URL must use HTTP or HTTPS scheme. Got: {}",
                url
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(crate::Error::config("Store request timeout must be > 0"));
        }
        Ok(())
    }

    /// Request timeout as a duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            token_path: None,
            kubeconfig: None,
            request_timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_source_url() -> String {
    "http://icanhazip.com".to_string()
}

fn default_interval_secs() -> u64 {
    60
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_listen_address() -> Option<String> {
    Some("0.0.0.0:8080".to_string())
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    10
}

fn default_max_backoff_ms() -> u64 {
    500
}
