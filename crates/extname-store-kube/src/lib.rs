// # Kubernetes Record Store
//
// This crate provides the cluster-backed RecordStore for extname: the managed
// record is a core/v1 Service, and the mutable field is spec.externalName.
//
// ## Behavior
//
// - One HTTP request per trait call; retry and backoff are owned by the core Updater
// - Optimistic concurrency via metadata.resourceVersion: the PUT carries the
//   version the record was read at, and the API server answers 409 when the
//   Service changed in between
// - The full Service object read by `get` is written back by `update`, so
//   fields this crate knows nothing about are preserved
// - Every request is bounded by the client timeout
//
// ## Connection
//
// - In-cluster: KUBERNETES_SERVICE_HOST / KUBERNETES_SERVICE_PORT, the
//   service-account token and CA bundle
// - Explicit: an API URL (e.g. `kubectl proxy` on http://127.0.0.1:8001)
//   with an optional bearer token file
// - Kubeconfig: the current context of a kubeconfig file (see `kubeconfig`)
//
// `from_config` picks, in order: explicit URL, configured kubeconfig,
// in-cluster, then `$KUBECONFIG` / `~/.kube/config`.
//
// Namespace and name are checked to be plain Kubernetes names before they
// are placed in a request path.
//
// ## Security
//
// The bearer token never appears in logs or Debug output.
//
// ## API Reference
//
// - Read Service:    GET `/api/v1/namespaces/:namespace/services/:name`
// - Replace Service: PUT `/api/v1/namespaces/:namespace/services/:name`

pub mod kubeconfig;

use async_trait::async_trait;
use extname_core::config::StoreConfig;
use extname_core::traits::{ManagedRecord, RecordStore, ServiceRef};
use extname_core::{Error, Result};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

use crate::kubeconfig::Kubeconfig;

/// Service account mount inside a pod
const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Kubernetes Service store
pub struct KubeRecordStore {
    /// API server base URL, without trailing slash
    api_url: String,

    /// Bearer token
    /// ⚠️ NEVER log this value
    token: Option<String>,

    /// HTTP client for API requests
    client: reqwest::Client,
}

// Custom Debug implementation that hides the token
impl std::fmt::Debug for KubeRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeRecordStore")
            .field("api_url", &self.api_url)
            .field("token", &self.token.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

impl KubeRecordStore {
    /// Create a store talking to an explicit API server URL
    ///
    /// # Parameters
    ///
    /// - `api_url`: Base URL of the API server (e.g. "http://127.0.0.1:8001")
    /// - `token`: Optional bearer token
    /// - `timeout`: Per-request timeout
    pub fn new(api_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self::with_client(api_url, token, client))
    }

    /// Create a store from the pod's service account
    pub fn in_cluster(timeout: Duration) -> Result<Self> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .map_err(|_| Error::config("KUBERNETES_SERVICE_HOST is not set (not running in a cluster?)"))?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());

        let dir = Path::new(SERVICE_ACCOUNT_DIR);
        let token = read_token(&dir.join("token"))?;
        let ca = std::fs::read(dir.join("ca.crt"))
            .map_err(|e| Error::config(format!("Failed to read service account CA bundle: {}", e)))?;
        let ca = reqwest::Certificate::from_pem(&ca)
            .map_err(|e| Error::config(format!("Invalid service account CA bundle: {}", e)))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .add_root_certificate(ca)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        // IPv6 service hosts need brackets in the URL authority.
        let authority = if host.contains(':') {
            format!("[{}]:{}", host, port)
        } else {
            format!("{}:{}", host, port)
        };

        Ok(Self::with_client(format!("https://{}", authority), Some(token), client))
    }

    /// Create a store from the current context of a kubeconfig file
    pub fn from_kubeconfig(path: &Path, timeout: Duration) -> Result<Self> {
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let conn = Kubeconfig::load(path)?.connection(base_dir)?;

        let mut builder = reqwest::Client::builder().timeout(timeout);
        if let Some(ca) = &conn.ca_pem {
            let ca = reqwest::Certificate::from_pem(ca)
                .map_err(|e| Error::config(format!("Invalid kubeconfig CA certificate: {}", e)))?;
            builder = builder.add_root_certificate(ca);
        }
        if conn.insecure {
            tracing::warn!(
                "kubeconfig {} disables TLS verification for {}",
                path.display(),
                conn.server
            );
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(pem) = &conn.identity_pem {
            let identity = reqwest::Identity::from_pem(pem)
                .map_err(|e| Error::config(format!("Invalid kubeconfig client certificate: {}", e)))?;
            builder = builder.use_rustls_tls().identity(identity);
        }
        let client = builder
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        tracing::info!("Using kubeconfig {} (server {})", path.display(), conn.server);
        Ok(Self::with_client(conn.server, conn.token, client))
    }

    /// Build from the core configuration
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        let timeout = config.request_timeout();

        if let Some(url) = &config.api_url {
            let token = config
                .token_path
                .as_deref()
                .map(|path| read_token(Path::new(path)))
                .transpose()?;
            return Self::new(url.clone(), token, timeout);
        }

        if let Some(path) = &config.kubeconfig {
            return Self::from_kubeconfig(Path::new(path), timeout);
        }

        if std::env::var_os("KUBERNETES_SERVICE_HOST").is_some() {
            return Self::in_cluster(timeout);
        }

        match kubeconfig::default_path() {
            Some(path) if path.exists() => Self::from_kubeconfig(&path, timeout),
            _ => Err(Error::config(
                "Not running in a cluster and no kubeconfig found. \
                 Set EXTNAME_KUBECONFIG, KUBECONFIG or EXTNAME_KUBE_API_URL",
            )),
        }
    }

    fn with_client(api_url: impl Into<String>, token: Option<String>, client: reqwest::Client) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self {
            api_url,
            token,
            client,
        }
    }

    /// The API server base URL
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// URL of a Service object
    ///
    /// Refuses references whose parts are not plain Kubernetes names, so a
    /// `/` or `..` can never steer the request at another object.
    pub fn service_url(&self, service: &ServiceRef) -> Result<String> {
        if !service.is_well_formed() {
            return Err(Error::invalid_service(format!(
                "{:?} is not a valid namespace/name pair",
                service.to_string()
            )));
        }
        Ok(format!(
            "{}/api/v1/namespaces/{}/services/{}",
            self.api_url,
            service.namespace(),
            service.name()
        ))
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl RecordStore for KubeRecordStore {
    /// Read a Service
    ///
    /// ```http
    /// GET /api/v1/namespaces/:namespace/services/:name
    /// Authorization: Bearer <token>
    /// ```
    async fn get(&self, service: &ServiceRef) -> Result<Option<ManagedRecord>> {
        let url = self.service_url(service)?;
        tracing::debug!("Fetching Service '{}'", service);

        let response = self
            .authorize(self.client.get(&url))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| transport_error("get", service, e))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(status_error(status.as_u16(), "get", service, &error_text));
        }

        let object: Value = response
            .json()
            .await
            .map_err(|e| Error::store(format!("Failed to parse Service '{}': {}", service, e)))?;

        let version = object["metadata"]["resourceVersion"]
            .as_str()
            .ok_or_else(|| {
                Error::store(format!(
                    "Invalid response format: Service '{}' has no metadata.resourceVersion",
                    service
                ))
            })?
            .to_string();

        Ok(Some(ManagedRecord::new(service.clone(), version, object)))
    }

    /// Replace a Service, conditional on its resourceVersion
    ///
    /// ```http
    /// PUT /api/v1/namespaces/:namespace/services/:name
    /// Authorization: Bearer <token>
    /// { ...service, "metadata": { ..., "resourceVersion": "<expected>" } }
    /// ```
    async fn update(&self, record: &ManagedRecord, expected_version: &str) -> Result<()> {
        let service = record.service();
        let url = self.service_url(service)?;

        let mut body = record.object().clone();
        if !body["metadata"].is_object() {
            body["metadata"] = Value::Object(Default::default());
        }
        body["metadata"]["resourceVersion"] = Value::String(expected_version.to_string());

        tracing::debug!(
            "Replacing Service '{}' at resourceVersion {}",
            service,
            expected_version
        );

        let response = self
            .authorize(self.client.put(&url))
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("update", service, e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(status_error(status.as_u16(), "update", service, &error_text));
        }

        Ok(())
    }
}

fn read_token(path: &Path) -> Result<String> {
    let token = std::fs::read_to_string(path)
        .map_err(|e| Error::config(format!("Failed to read token file {}: {}", path.display(), e)))?;
    let token = token.trim();
    if token.is_empty() {
        return Err(Error::config(format!("Token file {} is empty", path.display())));
    }
    Ok(token.to_string())
}

fn transport_error(op: &str, service: &ServiceRef, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::timeout(format!("{} Service '{}': {}", op, service, e))
    } else {
        Error::store(format!("Failed to {} Service '{}': {}", op, service, e))
    }
}

/// Map a non-success API status to the core error taxonomy
fn status_error(status: u16, op: &str, service: &ServiceRef, error_text: &str) -> Error {
    match status {
        401 | 403 => Error::auth(format!(
            "Not allowed to {} Service '{}' (HTTP {}). Check the service account's RBAC rules.",
            op, service, status
        )),
        404 => Error::not_found(format!("Service '{}'", service)),
        409 => Error::conflict(format!(
            "Service '{}' was modified concurrently: {}",
            service, error_text
        )),
        429 => Error::store(format!(
            "API server throttled {} of Service '{}' (HTTP 429)",
            op, service
        )),
        500..=599 => Error::store(format!(
            "API server error (transient) during {} of Service '{}': {} - {}",
            op, service, status, error_text
        )),
        _ => Error::store(format!(
            "Failed to {} Service '{}': {} - {}",
            op, service, status, error_text
        )),
    }
}
