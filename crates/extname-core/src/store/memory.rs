// # Memory Record Store
//
// In-memory implementation of RecordStore.
//
// ## Purpose
//
// Behaves like the cluster store as far as the core can tell: every record
// carries a version that advances on each accepted write, and a write made
// against a stale version is refused with a conflict. Used by tests and for
// embedding the core without a cluster.
//
// ## Crash Behavior
//
// - All records are lost on restart
// - Versions restart from 1

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::record_store::{ManagedRecord, RecordStore, ServiceRef};

#[derive(Debug, Clone)]
struct Entry {
    version: u64,
    object: Value,
}

/// In-memory, versioned record store
///
/// # Example
///
/// ```rust,no_run
/// use extname_core::store::MemoryRecordStore;
/// use extname_core::traits::{RecordStore, ServiceRef};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryRecordStore::new();
///     let web = ServiceRef::new("default", "web");
///     store.insert(web.clone(), serde_json::json!({"spec": {}})).await;
///
///     let mut record = store.get(&web).await?.expect("inserted above");
///     let version = record.version().to_string();
///     record.set_external_address("1.2.3.4");
///     store.update(&record, &version).await?;
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    inner: Arc<RwLock<HashMap<ServiceRef, Entry>>>,
}

impl MemoryRecordStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record, returning its new version token
    pub async fn insert(&self, service: ServiceRef, object: Value) -> String {
        let mut records = self.inner.write().await;
        let version = records.get(&service).map_or(1, |e| e.version + 1);
        records.insert(service, Entry { version, object });
        version.to_string()
    }

    /// The stored body of a record
    pub async fn object(&self, service: &ServiceRef) -> Option<Value> {
        self.inner.read().await.get(service).map(|e| e.object.clone())
    }

    /// The stored version token of a record
    pub async fn version(&self, service: &ServiceRef) -> Option<String> {
        self.inner
            .read()
            .await
            .get(service)
            .map(|e| e.version.to_string())
    }

    /// Get the number of records in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, service: &ServiceRef) -> Result<Option<ManagedRecord>, Error> {
        Ok(self.inner.read().await.get(service).map(|e| {
            ManagedRecord::new(service.clone(), e.version.to_string(), e.object.clone())
        }))
    }

    async fn update(&self, record: &ManagedRecord, expected_version: &str) -> Result<(), Error> {
        let mut records = self.inner.write().await;
        let entry = records
            .get_mut(record.service())
            .ok_or_else(|| Error::not_found(format!("Service '{}'", record.service())))?;

        if entry.version.to_string() != expected_version {
            return Err(Error::conflict(format!(
                "Service '{}' is at version {}, update expected {}",
                record.service(),
                entry.version,
                expected_version
            )));
        }

        entry.version += 1;
        entry.object = record.object().clone();
        Ok(())
    }
}
