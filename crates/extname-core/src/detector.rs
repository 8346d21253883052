//! Change detection for the poll path
//!
//! The detector remembers the last address the poller successfully applied
//! and suppresses ticks that report the same address again. It lives for the
//! lifetime of the process and is never persisted; after a restart the first
//! tick always goes through.
//!
//! Poll ticks run concurrently, so the cache sits behind an async `RwLock`.
//! Racing ticks may overwrite each other's entry; the worst outcome is one
//! redundant update on a later tick.

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::address::Address;

/// The most recent successfully applied address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedAddress {
    /// The address written to the record
    pub address: Address,
    /// When the update was confirmed
    pub applied_at: DateTime<Utc>,
}

/// Last-applied-address cache for the single poll target
#[derive(Debug, Default)]
pub struct ChangeDetector {
    last: RwLock<Option<AppliedAddress>>,
}

impl ChangeDetector {
    /// Create a detector with an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `candidate` differs from the last applied address
    ///
    /// Always true while the cache is empty.
    pub async fn should_apply(&self, candidate: &Address) -> bool {
        match self.last.read().await.as_ref() {
            Some(last) if last.address == *candidate => {
                debug!("Address {} unchanged since {}", candidate, last.applied_at);
                false
            }
            _ => true,
        }
    }

    /// Remember `candidate` as applied
    ///
    /// Call only after the updater has confirmed the write.
    pub async fn record_applied(&self, candidate: Address) {
        *self.last.write().await = Some(AppliedAddress {
            address: candidate,
            applied_at: Utc::now(),
        });
    }

    /// The cached entry, if any
    pub async fn last_applied(&self) -> Option<AppliedAddress> {
        self.last.read().await.clone()
    }
}
