// # Push Receiver
//
// HTTP endpoint that lets an external agent (a router script, a DHCP hook)
// push a new address for a named Service in the configured namespace.
//
// ## Routes
//
// - `POST /`        body `{"service_name": "...", "ip_address": "..."}`,
//                   or a one-element array of the same object
// - `GET  /health`  always `{"status":"ok","message":"healthy"}`
//
// Every answer is a JSON `{"status", "message"}` object; `status` is "ok"
// only for 200.
//
// The push path bypasses the change detector: every accepted request goes to
// the updater, even when it repeats the last address.

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use extname_core::address::validate;
use extname_core::traits::is_valid_service_name;
use extname_core::{Applied, ServiceRef, Updater};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    updater: Arc<Updater>,
    namespace: String,
}

impl AppState {
    /// Pushed service names are resolved inside `namespace`
    pub fn new(updater: Arc<Updater>, namespace: impl Into<String>) -> Self {
        Self {
            updater,
            namespace: namespace.into(),
        }
    }
}

/// Response body for every route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: String,
    pub message: String,
}

impl ApiResponse {
    fn reply(code: StatusCode, message: impl Into<String>) -> Response {
        let status = if code == StatusCode::OK { "ok" } else { "error" };
        let body = ApiResponse {
            status: status.to_string(),
            message: message.into(),
        };
        (code, Json(body)).into_response()
    }
}

/// One pushed entry
#[derive(Debug, Default, Deserialize)]
struct PushEntry {
    #[serde(default)]
    service_name: Option<String>,
    #[serde(default)]
    ip_address: Option<String>,
}

/// A request rejected before it reached the updater
#[derive(Debug)]
struct Rejection {
    code: StatusCode,
    message: String,
}

impl Rejection {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            code: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

/// Build the receiver's router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(push).fallback(method_not_allowed))
        .route("/health", get(health).fallback(method_not_allowed))
        .fallback(not_found)
        .with_state(state)
}

async fn push(State(state): State<AppState>, body: Bytes) -> Response {
    let entry = match parse_entry(&body) {
        Ok(entry) => entry,
        Err(rejection) => return ApiResponse::reply(rejection.code, rejection.message),
    };

    let (service_name, raw_address) = match required_fields(entry) {
        Ok(fields) => fields,
        Err(rejection) => return ApiResponse::reply(rejection.code, rejection.message),
    };

    let address = match validate(&raw_address) {
        Ok(address) => address,
        Err(e) => {
            warn!("Rejected pushed address for '{}': {}", service_name, e);
            return ApiResponse::reply(StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    let service = ServiceRef::new(state.namespace.clone(), service_name);
    info!("Received push for Service '{}' with IP address {}", service, address);

    match state.updater.apply(&service, &address).await {
        Ok(Applied { attempts, .. }) => {
            info!(
                "Updated DNS configuration for '{}' ({} attempt(s))",
                service, attempts
            );
            ApiResponse::reply(StatusCode::OK, "Updated DNS configuration")
        }
        Err(e) => {
            error!("Failed to set IP address for '{}': {}", service, e);
            ApiResponse::reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to set IP address: {}", e),
            )
        }
    }
}

/// Accept either a single object or an array holding exactly one
fn parse_entry(body: &[u8]) -> Result<PushEntry, Rejection> {
    let parsed: Value = serde_json::from_slice(body).map_err(|e| {
        error!("Failed to parse JSON: {}", e);
        Rejection::bad_request("Failed to parse JSON")
    })?;

    let entry = match parsed {
        Value::Array(items) => {
            if items.is_empty() {
                error!("No entries provided in JSON");
                return Err(Rejection::bad_request("No entries provided"));
            }
            if items.len() > 1 {
                warn!("Unexpected number of entries provided in JSON: {}", items.len());
                return Err(Rejection::bad_request("Unexpected number of entries provided"));
            }
            items.into_iter().next().unwrap_or_default()
        }
        other => other,
    };

    if !entry.is_object() {
        error!("Failed to parse JSON: expected an object, got {}", entry);
        return Err(Rejection::bad_request("Failed to parse JSON"));
    }

    serde_json::from_value(entry).map_err(|e| {
        error!("Failed to parse JSON: {}", e);
        Rejection::bad_request("Failed to parse JSON")
    })
}

fn required_fields(entry: PushEntry) -> Result<(String, String), Rejection> {
    let service_name = entry.service_name.filter(|s| !s.trim().is_empty());
    let ip_address = entry.ip_address.filter(|s| !s.trim().is_empty());

    match (service_name, ip_address) {
        (Some(service_name), Some(ip_address)) => {
            let service_name = service_name.trim();
            // The name lands in an API path; only a plain Service name may pass.
            if !is_valid_service_name(service_name) {
                warn!("Push rejected, invalid service name {:?}", service_name);
                return Err(Rejection::bad_request(format!(
                    "Invalid service name: {:?}",
                    service_name
                )));
            }
            Ok((service_name.to_string(), ip_address))
        }
        (service_name, ip_address) => {
            let mut missing = Vec::new();
            if service_name.is_none() {
                missing.push("service_name");
            }
            if ip_address.is_none() {
                missing.push("ip_address");
            }
            warn!("Push rejected, missing field(s): {:?}", missing);
            Err(Rejection::bad_request(format!(
                "Missing required field(s): {}",
                missing.join(", ")
            )))
        }
    }
}

async fn health() -> Response {
    ApiResponse::reply(StatusCode::OK, "healthy")
}

async fn method_not_allowed() -> Response {
    ApiResponse::reply(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
}

async fn not_found() -> Response {
    ApiResponse::reply(StatusCode::NOT_FOUND, "Not found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request, header};
    use extname_core::{MemoryRecordStore, RetryPolicy};
    use serde_json::json;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn seeded(names: &[&str]) -> (MemoryRecordStore, Router) {
        let store = MemoryRecordStore::new();
        for name in names {
            store
                .insert(
                    ServiceRef::new("default", *name),
                    json!({
                        "metadata": {"name": name, "namespace": "default"},
                        "spec": {"type": "ExternalName", "externalName": "old-ip"}
                    }),
                )
                .await;
        }
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        };
        let updater = Arc::new(Updater::new(Arc::new(store.clone()), policy));
        (store, router(AppState::new(updater, "default")))
    }

    async fn call(app: Router, method: Method, uri: &str, body: &str) -> (StatusCode, String, ApiResponse) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let code = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: ApiResponse = serde_json::from_slice(&bytes).unwrap();
        (code, content_type, parsed)
    }

    async fn external_name(store: &MemoryRecordStore, name: &str) -> Option<String> {
        store
            .object(&ServiceRef::new("default", name))
            .await
            .and_then(|o| o["spec"]["externalName"].as_str().map(str::to_string))
    }

    #[tokio::test]
    async fn valid_push_updates_the_record() {
        let (store, app) = seeded(&["home"]).await;

        let (code, content_type, body) = call(
            app,
            Method::POST,
            "/",
            r#"{"service_name":"home","ip_address":"12.34.56.78"}"#,
        )
        .await;

        assert_eq!(code, StatusCode::OK);
        assert_eq!(content_type, "application/json");
        assert_eq!(body.status, "ok");
        assert_eq!(body.message, "Updated DNS configuration");
        assert_eq!(external_name(&store, "home").await.as_deref(), Some("12.34.56.78"));
    }

    #[tokio::test]
    async fn single_entry_array_is_accepted() {
        let (store, app) = seeded(&["home"]).await;

        let (code, _, _) = call(
            app,
            Method::POST,
            "/",
            r#"[{"service_name":"home","ip_address":" 5.6.7.8\n"}]"#,
        )
        .await;

        assert_eq!(code, StatusCode::OK);
        assert_eq!(external_name(&store, "home").await.as_deref(), Some("5.6.7.8"));
    }

    #[tokio::test]
    async fn missing_field_is_named() {
        let (store, app) = seeded(&["home"]).await;

        let (code, _, body) = call(app, Method::POST, "/", r#"{"service_name":"home"}"#).await;

        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body.status, "error");
        assert_eq!(body.message, "Missing required field(s): ip_address");
        assert_eq!(external_name(&store, "home").await.as_deref(), Some("old-ip"));
    }

    #[tokio::test]
    async fn empty_fields_count_as_missing() {
        let (_, app) = seeded(&["home"]).await;

        let (code, _, body) =
            call(app, Method::POST, "/", r#"{"service_name":"","ip_address":" "}"#).await;

        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body.message, "Missing required field(s): service_name, ip_address");
    }

    #[tokio::test]
    async fn service_name_cannot_leave_the_namespace() {
        let (store, app) = seeded(&["home"]).await;

        for name in ["../x", "a/b", "../../kube-system/services/coredns", "Home", "home.default"] {
            let payload = json!({"service_name": name, "ip_address": "6.6.6.6"}).to_string();
            let (code, _, body) = call(app.clone(), Method::POST, "/", &payload).await;
            assert_eq!(code, StatusCode::BAD_REQUEST, "name {:?}", name);
            assert_eq!(body.status, "error");
            assert!(body.message.starts_with("Invalid service name"), "{}", body.message);
        }
        assert_eq!(external_name(&store, "home").await.as_deref(), Some("old-ip"));
    }

    #[tokio::test]
    async fn malformed_json_is_rejected() {
        let (_, app) = seeded(&["home"]).await;

        for payload in ["{not json", "\"12.34.56.78\"", r#"{"service_name":1,"ip_address":"1.2.3.4"}"#] {
            let (code, _, body) = call(app.clone(), Method::POST, "/", payload).await;
            assert_eq!(code, StatusCode::BAD_REQUEST, "payload {:?}", payload);
            assert_eq!(body.message, "Failed to parse JSON");
        }
    }

    #[tokio::test]
    async fn array_size_is_checked() {
        let (store, app) = seeded(&["home"]).await;

        let (code, _, body) = call(app.clone(), Method::POST, "/", "[]").await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body.message, "No entries provided");

        let (code, _, body) = call(
            app,
            Method::POST,
            "/",
            r#"[{"service_name":"home","ip_address":"1.1.1.1"},{"service_name":"home","ip_address":"2.2.2.2"}]"#,
        )
        .await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body.message, "Unexpected number of entries provided");
        assert_eq!(external_name(&store, "home").await.as_deref(), Some("old-ip"));
    }

    #[tokio::test]
    async fn invalid_address_is_rejected() {
        let (store, app) = seeded(&["home"]).await;

        for address in ["not-an-ip", "2001:db8::1", "256.0.0.1"] {
            let payload = json!({"service_name": "home", "ip_address": address}).to_string();
            let (code, _, body) = call(app.clone(), Method::POST, "/", &payload).await;
            assert_eq!(code, StatusCode::BAD_REQUEST, "address {:?}", address);
            assert!(body.message.starts_with("Invalid address"), "{}", body.message);
        }
        assert_eq!(external_name(&store, "home").await.as_deref(), Some("old-ip"));
    }

    #[tokio::test]
    async fn unknown_service_is_a_server_error() {
        let (_, app) = seeded(&["home"]).await;

        let (code, _, body) = call(
            app,
            Method::POST,
            "/",
            r#"{"service_name":"ghost","ip_address":"1.2.3.4"}"#,
        )
        .await;

        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.status, "error");
        assert!(body.message.starts_with("Failed to set IP address: "), "{}", body.message);
    }

    #[tokio::test]
    async fn repeated_push_still_writes() {
        let (store, app) = seeded(&["home"]).await;
        let payload = r#"{"service_name":"home","ip_address":"1.2.3.4"}"#;

        call(app.clone(), Method::POST, "/", payload).await;
        call(app, Method::POST, "/", payload).await;

        assert_eq!(
            store.version(&ServiceRef::new("default", "home")).await.as_deref(),
            Some("3")
        );
    }

    #[tokio::test]
    async fn other_methods_are_not_allowed() {
        let (_, app) = seeded(&["home"]).await;

        for method in [Method::GET, Method::PUT, Method::DELETE] {
            let (code, content_type, body) = call(app.clone(), method, "/", "").await;
            assert_eq!(code, StatusCode::METHOD_NOT_ALLOWED);
            assert_eq!(content_type, "application/json");
            assert_eq!(body.message, "Method not allowed");
        }
    }

    #[tokio::test]
    async fn health_is_always_ok() {
        let (_, app) = seeded(&[]).await;

        let (code, content_type, body) = call(app, Method::GET, "/health", "").await;

        assert_eq!(code, StatusCode::OK);
        assert_eq!(content_type, "application/json");
        assert_eq!(
            body,
            ApiResponse {
                status: "ok".to_string(),
                message: "healthy".to_string()
            }
        );
    }
}
