//! Test doubles and common utilities for contract tests
//!
//! The doubles wrap the in-memory store so that tests observe real version
//! semantics while counting calls or injecting contention, latency and
//! failures.

#![allow(dead_code)]

use extname_core::error::{Error, Result};
use extname_core::traits::{AddressSource, ManagedRecord, RecordStore, ServiceRef};
use extname_core::{MemoryRecordStore, RetryPolicy, Updater};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// Retry policy with millisecond backoff so tests stay fast
pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
    }
}

/// A typical ExternalName Service body
pub fn service_body(name: &str, external_name: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {
            "name": name,
            "namespace": "default",
            "labels": {"app": name},
            "annotations": {"owner": "platform"}
        },
        "spec": {
            "type": "ExternalName",
            "externalName": external_name,
            "ports": [{"name": "https", "port": 443}]
        }
    })
}

/// Memory store seeded with `default/<name>` pointing at `external_name`
pub async fn seeded_store(name: &str, external_name: &str) -> (MemoryRecordStore, ServiceRef) {
    let store = MemoryRecordStore::new();
    let service = ServiceRef::new("default", name);
    store
        .insert(service.clone(), service_body(name, external_name))
        .await;
    (store, service)
}

/// Read `spec.externalName` straight from the store
pub async fn external_name(store: &MemoryRecordStore, service: &ServiceRef) -> Option<String> {
    store
        .object(service)
        .await
        .and_then(|o| o["spec"]["externalName"].as_str().map(str::to_string))
}

/// Record store wrapper that counts calls and can add latency to reads
#[derive(Clone)]
pub struct CountingStore {
    inner: MemoryRecordStore,
    get_calls: Arc<AtomicUsize>,
    update_calls: Arc<AtomicUsize>,
    conflicts: Arc<AtomicUsize>,
    read_latency: Duration,
}

impl CountingStore {
    pub fn new(inner: MemoryRecordStore) -> Self {
        Self {
            inner,
            get_calls: Arc::new(AtomicUsize::new(0)),
            update_calls: Arc::new(AtomicUsize::new(0)),
            conflicts: Arc::new(AtomicUsize::new(0)),
            read_latency: Duration::ZERO,
        }
    }

    /// Sleep this long inside every `get`, widening the read-modify-write window
    pub fn with_read_latency(mut self, latency: Duration) -> Self {
        self.read_latency = latency;
        self
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    /// Updates the inner store refused with a version conflict
    pub fn conflicts(&self) -> usize {
        self.conflicts.load(Ordering::SeqCst)
    }

    /// Total calls of either kind
    pub fn calls(&self) -> usize {
        self.get_calls() + self.update_calls()
    }
}

#[async_trait::async_trait]
impl RecordStore for CountingStore {
    async fn get(&self, service: &ServiceRef) -> Result<Option<ManagedRecord>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        // Snapshot first, then stall: concurrent readers see the same version.
        let snapshot = self.inner.get(service).await;
        if !self.read_latency.is_zero() {
            tokio::time::sleep(self.read_latency).await;
        }
        snapshot
    }

    async fn update(&self, record: &ManagedRecord, expected_version: &str) -> Result<()> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let result = self.inner.update(record, expected_version).await;
        if matches!(&result, Err(e) if e.is_conflict()) {
            self.conflicts.fetch_add(1, Ordering::SeqCst);
        }
        result
    }
}

/// Record store where another writer touches the record right after every
/// read, for the first `contended_reads` reads
///
/// Each of those reads is followed by a conflicting update.
pub struct ContendedStore {
    inner: MemoryRecordStore,
    remaining: AtomicU32,
    update_calls: AtomicUsize,
}

impl ContendedStore {
    pub fn new(inner: MemoryRecordStore, contended_reads: u32) -> Self {
        Self {
            inner,
            remaining: AtomicU32::new(contended_reads),
            update_calls: AtomicUsize::new(0),
        }
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl RecordStore for ContendedStore {
    async fn get(&self, service: &ServiceRef) -> Result<Option<ManagedRecord>> {
        let record = self.inner.get(service).await?;

        let contend = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if contend && let Some(current) = self.inner.object(service).await {
            // Someone else edits an unrelated field concurrently.
            let mut edited = current;
            edited["metadata"]["annotations"]["touched-by"] = json!("other-controller");
            self.inner.insert(service.clone(), edited).await;
        }

        Ok(record)
    }

    async fn update(&self, record: &ManagedRecord, expected_version: &str) -> Result<()> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.update(record, expected_version).await
    }
}

/// Record store whose calls fail with a plain store error
pub struct FailingStore {
    pub fail_get: bool,
    pub get_calls: AtomicUsize,
    pub update_calls: AtomicUsize,
}

impl FailingStore {
    pub fn failing_reads() -> Self {
        Self {
            fail_get: true,
            get_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_writes() -> Self {
        Self {
            fail_get: false,
            get_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl RecordStore for FailingStore {
    async fn get(&self, service: &ServiceRef) -> Result<Option<ManagedRecord>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_get {
            return Err(Error::store("connection refused"));
        }
        Ok(Some(ManagedRecord::new(
            service.clone(),
            "1",
            service_body(service.name(), "old-ip"),
        )))
    }

    async fn update(&self, _record: &ManagedRecord, _expected_version: &str) -> Result<()> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::store("internal error"))
    }
}

/// Record store that never answers
pub struct HangingStore;

#[async_trait::async_trait]
impl RecordStore for HangingStore {
    async fn get(&self, _service: &ServiceRef) -> Result<Option<ManagedRecord>> {
        std::future::pending().await
    }

    async fn update(&self, _record: &ManagedRecord, _expected_version: &str) -> Result<()> {
        std::future::pending().await
    }
}

/// Address source returning whatever the test last set
pub struct ScriptedSource {
    answer: std::sync::Mutex<String>,
    failing: AtomicBool,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(answer: &str) -> Self {
        Self {
            answer: std::sync::Mutex::new(answer.to_string()),
            failing: AtomicBool::new(false),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Answer only after `delay`
    pub fn slow(answer: &str, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(answer)
        }
    }

    pub fn set(&self, answer: &str) {
        *self.answer.lock().unwrap() = answer.to_string();
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl AddressSource for ScriptedSource {
    async fn current(&self) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::address_source("connection reset"));
        }
        Ok(self.answer.lock().unwrap().clone())
    }

    fn source_name(&self) -> &str {
        "scripted"
    }
}

/// Updater over `store` with the fast test policy
pub fn updater_over(store: Arc<dyn RecordStore>, max_attempts: u32) -> Arc<Updater> {
    Arc::new(Updater::new(store, fast_policy(max_attempts)))
}
