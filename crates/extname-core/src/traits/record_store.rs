// # Record Store Trait
//
// Defines the narrow capability the core needs from the cluster record store.
//
// ## Implementations
//
// - Kubernetes API: `extname-store-kube` crate
// - In-memory: `extname_core::store::MemoryRecordStore`
//
// ## Usage
//
// ```rust,ignore
// use extname_core::traits::{RecordStore, ServiceRef};
//
// let service = ServiceRef::new("default", "home");
// if let Some(mut record) = store.get(&service).await? {
//     let version = record.version().to_string();
//     record.set_external_address("12.34.56.78");
//     store.update(&record, &version).await?;
// }
// ```

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

/// Identifies a managed record by namespace and name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceRef {
    namespace: String,
    name: String,
}

impl ServiceRef {
    /// Create a new service reference
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// The namespace holding the record
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The record name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether both parts are names the API server would accept
    ///
    /// Anything else (a `/`, a `..`, upper case) could address a different
    /// object once placed in a request path.
    pub fn is_well_formed(&self) -> bool {
        is_valid_namespace(&self.namespace) && is_valid_service_name(&self.name)
    }
}

/// Service names are RFC 1035 labels: `[a-z]([-a-z0-9]*[a-z0-9])?`, at most 63 chars
pub fn is_valid_service_name(name: &str) -> bool {
    name.starts_with(|c: char| c.is_ascii_lowercase()) && is_dns_label(name)
}

/// Namespaces are RFC 1123 labels: `[a-z0-9]([-a-z0-9]*[a-z0-9])?`, at most 63 chars
pub fn is_valid_namespace(name: &str) -> bool {
    is_dns_label(name)
}

fn is_dns_label(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !name.starts_with('-')
        && !name.ends_with('-')
}

impl fmt::Display for ServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A transient copy of the external record being mutated
///
/// The full record body is kept as JSON so that an update writes back every
/// field it read, changing only `spec.externalName`.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedRecord {
    service: ServiceRef,
    version: String,
    object: Value,
}

impl ManagedRecord {
    /// Wrap a record body read from the store
    pub fn new(service: ServiceRef, version: impl Into<String>, object: Value) -> Self {
        Self {
            service,
            version: version.into(),
            object,
        }
    }

    /// The record this copy belongs to
    pub fn service(&self) -> &ServiceRef {
        &self.service
    }

    /// The opaque version token the copy was read at
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The full record body
    pub fn object(&self) -> &Value {
        &self.object
    }

    /// Consume the copy, returning the record body
    pub fn into_object(self) -> Value {
        self.object
    }

    /// Current value of `spec.externalName`, if set
    pub fn external_address(&self) -> Option<&str> {
        self.object
            .get("spec")
            .and_then(|spec| spec.get("externalName"))
            .and_then(Value::as_str)
    }

    /// Overwrite `spec.externalName`, creating `spec` if the body lacks it
    pub fn set_external_address(&mut self, address: &str) {
        if !self.object.is_object() {
            self.object = Value::Object(Default::default());
        }
        let spec = &mut self.object["spec"];
        if !spec.is_object() {
            *spec = Value::Object(Default::default());
        }
        spec["externalName"] = Value::String(address.to_string());
    }
}

/// Trait for record store implementations
///
/// Exactly two operations: read a record with its version token, and write
/// it back conditionally on that token. Retry and backoff are owned by
/// [`crate::updater::Updater`]; implementations make one call per invocation.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Read the current record
    ///
    /// # Returns
    ///
    /// - `Ok(Some(record))`: The record and the version it was read at
    /// - `Ok(None)`: No such record
    /// - `Err(Error)`: Transport or store failure
    async fn get(&self, service: &ServiceRef) -> Result<Option<ManagedRecord>, crate::Error>;

    /// Write a modified record, accepted only if the stored version still
    /// equals `expected_version`
    ///
    /// # Returns
    ///
    /// - `Ok(())`: The write was accepted
    /// - `Err(Error::VersionConflict)`: The record changed since it was read
    /// - `Err(Error)`: Any other failure
    async fn update(
        &self,
        record: &ManagedRecord,
        expected_version: &str,
    ) -> Result<(), crate::Error>;
}
