//! Conflict-safe record updater
//!
//! The updater rewrites `spec.externalName` of one managed record using an
//! optimistic-concurrency read-modify-write:
//!
//! ```text
//!   ┌──────────┐   get    ┌─────────────┐
//!   │ Updater  │ ───────▶ │ RecordStore │   absent ──▶ NotFound
//!   │          │ ◀─────── │             │
//!   │  modify  │          │             │
//!   │          │  update  │             │   ok ──────▶ Applied
//!   │          │ ───────▶ │ (version    │   conflict ─▶ backoff, read again
//!   └──────────┘          │  checked)   │   other ───▶ propagate
//!                         └─────────────┘
//! ```
//!
//! Only version conflicts are retried, and only up to the policy's attempt
//! budget; the updater never loops indefinitely under sustained contention.
//! It keeps no state between calls. Callers that cache the applied address
//! (the poller) do so themselves after a success.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::address::Address;
use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::traits::{RecordStore, ServiceRef};

/// Default bound on a single record store call
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// Attempt budget and backoff curve for version conflicts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first conflicting attempt
    pub initial_backoff: Duration,
    /// Cap on any single delay
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay to wait after the given (1-based) attempt failed with a conflict
    ///
    /// Doubles from `initial_backoff`, capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

/// Outcome of a successful update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// The record that was written
    pub service: ServiceRef,
    /// `spec.externalName` before the write, if it had one
    pub previous: Option<String>,
    /// The address now stored
    pub address: Address,
    /// Attempts it took (1 when there was no contention)
    pub attempts: u32,
}

/// Conflict-safe updater
///
/// Cheap to share: wrap in an `Arc` and hand the same instance to the poller
/// and the push receiver.
pub struct Updater {
    store: Arc<dyn RecordStore>,
    policy: RetryPolicy,
    store_timeout: Duration,
}

impl Updater {
    /// Create an updater over the given store
    pub fn new(store: Arc<dyn RecordStore>, policy: RetryPolicy) -> Self {
        Self {
            store,
            policy,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Override the per-call store timeout
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// The retry policy in force
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Point `service` at `address`
    ///
    /// # Returns
    ///
    /// - `Ok(Applied)`: The store accepted the write
    /// - `Err(Error::NotFound)`: The record does not exist; nothing was written
    /// - `Err(Error::ExhaustedRetries)`: Every attempt hit a version conflict
    /// - `Err(Error)`: Any other store, transport or timeout failure, unretried
    pub async fn apply(&self, service: &ServiceRef, address: &Address) -> Result<Applied> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.try_once(service, address, attempt).await {
                Ok(previous) => {
                    info!(
                        "Service '{}' updated to point to IP address {} (previous: {:?}, attempts: {})",
                        service, address, previous, attempt
                    );
                    return Ok(Applied {
                        service: service.clone(),
                        previous,
                        address: address.clone(),
                        attempts: attempt,
                    });
                }
                Err(e) if e.is_conflict() => {
                    if attempt >= self.policy.max_attempts {
                        error!(
                            "Giving up on Service '{}' after {} conflicting attempt(s)",
                            service, attempt
                        );
                        return Err(Error::ExhaustedRetries {
                            attempts: attempt,
                            last: Box::new(e),
                        });
                    }

                    let delay = self.policy.backoff(attempt);
                    warn!(
                        "Service '{}' changed concurrently (try {}/{}), retrying in {:?}",
                        service, attempt, self.policy.max_attempts, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One read-modify-write round; returns the previous address on success
    async fn try_once(
        &self,
        service: &ServiceRef,
        address: &Address,
        attempt: u32,
    ) -> Result<Option<String>> {
        let mut record = self
            .bounded("get", self.store.get(service))
            .await?
            .ok_or_else(|| {
                Error::not_found(format!("Service '{}' (try {})", service, attempt))
            })?;

        let version = record.version().to_string();
        let previous = record.external_address().map(str::to_string);
        debug!(
            "Read Service '{}' at version {} (externalName: {:?})",
            service, version, previous
        );

        record.set_external_address(address.as_str());
        self.bounded("update", self.store.update(&record, &version))
            .await?;

        Ok(previous)
    }

    async fn bounded<T>(&self, op: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(format!(
                "record store {} did not finish within {:?}",
                op, self.store_timeout
            ))),
        }
    }
}
