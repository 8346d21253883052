//! Timer-driven address poller
//!
//! The poller asks an [`AddressSource`] for the current address at a fixed
//! interval and feeds the answer through validation, change detection and
//! the [`Updater`] for one statically configured record.
//!
//! ## Event Flow
//!
//! 1. Fetch the raw address (bounded by the fetch timeout)
//! 2. Validate it; invalid → log, skip the tick
//! 3. Ask the [`ChangeDetector`]; unchanged → skip the tick
//! 4. Apply it to the configured record
//! 5. On success, record it in the detector; on failure, log and skip
//!
//! ## Scheduling
//!
//! Each tick is spawned as its own task and the loop does not wait for it.
//! A slow tick can therefore overlap the next one; the updater's conflict
//! handling makes overlapping writers to the same record safe.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, error, info, warn};

use crate::address::{self, Address};
use crate::detector::ChangeDetector;
use crate::traits::{AddressSource, ServiceRef};
use crate::updater::{Applied, Updater};

/// Default bound on a single address source fetch
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// What a single poll tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The record was rewritten
    Applied(Applied),

    /// The fetched address matched the last applied one
    Unchanged(Address),

    /// The source answered with something that is not an IPv4 literal
    InvalidAddress(String),

    /// The source could not be reached or timed out
    SourceFailed(String),

    /// The updater failed; the next tick will try again
    UpdateFailed(String),
}

/// Poll loop for the single configured record
#[derive(Clone)]
pub struct Poller {
    source: Arc<dyn AddressSource>,
    updater: Arc<Updater>,
    detector: Arc<ChangeDetector>,
    target: ServiceRef,
    interval: Duration,
    fetch_timeout: Duration,
}

impl Poller {
    /// Create a poller
    ///
    /// An `interval` of zero disables polling: [`Poller::run`] returns at once.
    pub fn new(
        source: Arc<dyn AddressSource>,
        updater: Arc<Updater>,
        detector: Arc<ChangeDetector>,
        target: ServiceRef,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            updater,
            detector,
            target,
            interval,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// Override the fetch timeout
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// The record this poller keeps current
    pub fn target(&self) -> &ServiceRef {
        &self.target
    }

    /// The detector shared by this poller's ticks
    pub fn detector(&self) -> &Arc<ChangeDetector> {
        &self.detector
    }

    /// Run until the process ends
    pub async fn run(&self) {
        self.run_with_shutdown(None).await
    }

    /// Run until `shutdown_rx` fires (or forever when `None`)
    ///
    /// Ticks already dispatched keep running after the loop stops; they are
    /// bounded by the fetch and store timeouts.
    pub async fn run_with_shutdown(&self, shutdown_rx: Option<tokio::sync::oneshot::Receiver<()>>) {
        if self.interval.is_zero() {
            info!("Polling disabled (interval is zero)");
            return;
        }

        info!(
            "Starting address polling for Service '{}' (source={}, interval={:?})",
            self.target,
            self.source.source_name(),
            self.interval
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = IntervalStream::new(interval);

        let shutdown = async move {
            match shutdown_rx {
                Some(rx) => {
                    let _ = rx.await;
                }
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                Some(_) = ticks.next() => {
                    let poller = self.clone();
                    tokio::spawn(async move {
                        poller.tick().await;
                    });
                }

                _ = &mut shutdown => {
                    info!("Shutdown signal received, poller stopped");
                    break;
                }
            }
        }
    }

    /// Run one tick inline
    pub async fn tick(&self) -> TickOutcome {
        let raw = match tokio::time::timeout(self.fetch_timeout, self.source.current()).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                warn!("Error getting IP address from {}: {}", self.source.source_name(), e);
                return TickOutcome::SourceFailed(e.to_string());
            }
            Err(_) => {
                let msg = format!(
                    "{} did not answer within {:?}",
                    self.source.source_name(),
                    self.fetch_timeout
                );
                warn!("Error getting IP address: {}", msg);
                return TickOutcome::SourceFailed(msg);
            }
        };

        let candidate = match address::validate(&raw) {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!("Ignoring address from {}: {}", self.source.source_name(), e);
                return TickOutcome::InvalidAddress(e.to_string());
            }
        };

        if !self.detector.should_apply(&candidate).await {
            debug!("Address {} same as last time, nothing to do", candidate);
            return TickOutcome::Unchanged(candidate);
        }

        info!("Setting updated IP '{}' on Service '{}'", candidate, self.target);
        match self.updater.apply(&self.target, &candidate).await {
            Ok(applied) => {
                self.detector.record_applied(candidate).await;
                TickOutcome::Applied(applied)
            }
            Err(e) => {
                error!(
                    "Unable to set IP address ({}) on Service '{}': {}",
                    candidate, self.target, e
                );
                TickOutcome::UpdateFailed(e.to_string())
            }
        }
    }
}
