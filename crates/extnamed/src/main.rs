// # extnamed - ExternalName Sync Daemon
//
// Thin integration layer: all validation, de-duplication and retry logic
// lives in extname-core. This binary only:
// 1. Reads configuration from environment variables
// 2. Initializes logging and the runtime
// 3. Builds the Kubernetes record store, the address source and the updater
// 4. Starts the push receiver and the poller
// 5. Waits for SIGTERM / SIGINT and stops both
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Target
// - `EXTNAME_NAMESPACE`: Namespace of the managed Services (required)
// - `EXTNAME_SERVICE_NAME`: Service kept current by the poller
//
// ### Address Source
// - `EXTNAME_IP_SOURCE_URL`: URL returning the public IP (default http://icanhazip.com)
// - `EXTNAME_INTERVAL_SECS`: Poll interval in seconds, 0 disables polling (default 60)
// - `EXTNAME_IP_SOURCE_TIMEOUT_SECS`: Fetch timeout (default 10)
//
// ### Push Receiver
// - `EXTNAME_LISTEN_ADDRESS`: Bind address (default 0.0.0.0:8080, empty disables)
//
// ### Record Store
// - `EXTNAME_KUBE_API_URL`: API server URL (in-cluster discovery when unset)
// - `EXTNAME_KUBE_TOKEN_PATH`: Bearer token file for the explicit URL
// - `EXTNAME_KUBECONFIG`: Kubeconfig file (otherwise in-cluster, then
//   `$KUBECONFIG` / `~/.kube/config`)
// - `EXTNAME_KUBE_TIMEOUT_SECS`: Per-request timeout (default 10)
// - `EXTNAME_MAX_ATTEMPTS`: Conflict retry budget (default 5)
//
// ### Logging
// - `EXTNAME_LOG_LEVEL`: trace, debug, info, warn, error (default info)
//
// ## Example
//
// ```bash
// export EXTNAME_NAMESPACE=default
// export EXTNAME_SERVICE_NAME=home
// export EXTNAME_KUBE_API_URL=http://127.0.0.1:8001
//
// extnamed
// ```

use anyhow::{Context, Result};
use extname_core::{ChangeDetector, Poller, RecordStore, RetryPolicy, SyncConfig, Updater};
use extname_ip_http::HttpAddressSource;
use extname_store_kube::KubeRecordStore;
use extname_webhook::AppState;
use std::env;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// How long the receiver and poller get to stop after a signal
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum ExtnameExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<ExtnameExitCode> for ExitCode {
    fn from(code: ExtnameExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    sync: SyncConfig,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let namespace = lookup("EXTNAME_NAMESPACE").context(
            "EXTNAME_NAMESPACE is required. Set it via: export EXTNAME_NAMESPACE=default",
        )?;

        let mut sync = SyncConfig::new(namespace.trim());
        sync.service_name = lookup("EXTNAME_SERVICE_NAME")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        if let Some(url) = lookup("EXTNAME_IP_SOURCE_URL") {
            sync.address_source.url = url;
        }
        if let Some(secs) = parse_var(&lookup, "EXTNAME_INTERVAL_SECS")? {
            sync.address_source.interval_secs = secs;
        }
        if let Some(secs) = parse_var(&lookup, "EXTNAME_IP_SOURCE_TIMEOUT_SECS")? {
            sync.address_source.timeout_secs = secs;
        }

        // Present but empty turns the receiver off.
        if let Some(addr) = lookup("EXTNAME_LISTEN_ADDRESS") {
            sync.receiver.listen_address = Some(addr).filter(|a| !a.is_empty());
        }

        if let Some(attempts) = parse_var(&lookup, "EXTNAME_MAX_ATTEMPTS")? {
            sync.retry.max_attempts = attempts;
        }

        sync.store.api_url = lookup("EXTNAME_KUBE_API_URL").filter(|s| !s.is_empty());
        sync.store.token_path = lookup("EXTNAME_KUBE_TOKEN_PATH").filter(|s| !s.is_empty());
        sync.store.kubeconfig = lookup("EXTNAME_KUBECONFIG").filter(|s| !s.is_empty());
        if let Some(secs) = parse_var(&lookup, "EXTNAME_KUBE_TIMEOUT_SECS")? {
            sync.store.request_timeout_secs = secs;
        }

        Ok(Self {
            sync,
            log_level: lookup("EXTNAME_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        self.sync.validate()?;

        if self.sync.polling_enabled() && self.sync.address_source.url.starts_with("http://") {
            eprintln!(
                "WARNING: EXTNAME_IP_SOURCE_URL uses HTTP (not HTTPS). \
                 A tampered answer would redirect the Service."
            );
        }

        self.level()?;
        Ok(())
    }

    fn level(&self) -> Result<Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(Level::TRACE),
            "debug" => Ok(Level::DEBUG),
            "info" => Ok(Level::INFO),
            "warn" => Ok(Level::WARN),
            "error" => Ok(Level::ERROR),
            _ => anyhow::bail!(
                "EXTNAME_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} must be a number. Got '{}': {}", name, raw, e)),
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExtnameExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return ExtnameExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = config.level().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return ExtnameExitCode::ConfigError.into();
    }

    info!("Starting extnamed daemon");
    info!("Managing Services in namespace '{}'", config.sync.namespace);

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return ExtnameExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        let daemon = match Daemon::start(config.sync).await {
            Ok(daemon) => daemon,
            Err(e) => {
                error!("Startup failed: {:#}", e);
                return ExtnameExitCode::ConfigError;
            }
        };

        if let Err(e) = daemon.run().await {
            error!("Daemon error: {:#}", e);
            ExtnameExitCode::RuntimeError
        } else {
            ExtnameExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Running receiver and poller, with their stop handles
struct Daemon {
    receiver: Option<(oneshot::Sender<()>, JoinHandle<std::io::Result<()>>)>,
    poller: Option<(oneshot::Sender<()>, JoinHandle<()>)>,
}

impl Daemon {
    /// Build the components and start both entry points
    async fn start(config: SyncConfig) -> Result<Self> {
        let store = KubeRecordStore::from_config(&config.store)
            .context("Failed to create Kubernetes record store")?;
        info!("Record store: {}", store.api_url());
        let store: Arc<dyn RecordStore> = Arc::new(store);

        // Refuse to start against a Service that is not there.
        if let Some(target) = config.poll_target() {
            match store.get(&target).await {
                Ok(Some(record)) => info!(
                    "Service '{}' currently points to {:?}",
                    target,
                    record.external_address()
                ),
                Ok(None) => anyhow::bail!("Service '{}' does not exist", target),
                Err(e) => {
                    return Err(anyhow::Error::new(e)
                        .context(format!("Failed to read Service '{}'", target)));
                }
            }
        }

        let updater = Arc::new(
            Updater::new(store, RetryPolicy::from(&config.retry))
                .with_store_timeout(config.store.request_timeout()),
        );

        let receiver = match &config.receiver.listen_address {
            Some(addr) => {
                let listener = tokio::net::TcpListener::bind(addr)
                    .await
                    .with_context(|| format!("Failed to bind push receiver on {}", addr))?;
                info!("Push receiver listening on {}", addr);

                let app = extname_webhook::router(AppState::new(
                    updater.clone(),
                    config.namespace.clone(),
                ));
                let (tx, rx) = oneshot::channel::<()>();
                let handle = tokio::spawn(async move {
                    axum::serve(listener, app)
                        .with_graceful_shutdown(async move {
                            let _ = rx.await;
                        })
                        .await
                });
                Some((tx, handle))
            }
            None => {
                info!("Push receiver disabled");
                None
            }
        };

        let poller = match config.poll_target() {
            Some(target) if config.polling_enabled() => {
                let source = HttpAddressSource::from_config(&config.address_source)
                    .context("Failed to create address source")?;
                info!(
                    "Polling {} every {}s for Service '{}'",
                    source.url(),
                    config.address_source.interval_secs,
                    target
                );

                let poller = Poller::new(
                    Arc::new(source),
                    updater,
                    Arc::new(ChangeDetector::new()),
                    target,
                    config.address_source.interval(),
                )
                .with_fetch_timeout(config.address_source.timeout());

                let (tx, rx) = oneshot::channel::<()>();
                let handle = tokio::spawn(async move { poller.run_with_shutdown(Some(rx)).await });
                Some((tx, handle))
            }
            _ => {
                info!("Polling disabled");
                None
            }
        };

        Ok(Self { receiver, poller })
    }

    /// Wait for a signal (or a receiver failure), then stop everything
    async fn run(mut self) -> Result<()> {
        let server_exit = async {
            match self.receiver.as_mut() {
                Some((_, handle)) => handle.await,
                None => std::future::pending().await,
            }
        };

        let server_exit = tokio::select! {
            signal = wait_for_shutdown() => {
                info!("Received shutdown signal: {}", signal?);
                None
            }
            exit = server_exit => Some(exit),
        };

        if let Some(exit) = server_exit {
            // The handle already completed; only the poller is left to stop.
            self.receiver = None;
            self.stop().await;
            match exit {
                Ok(Ok(())) => anyhow::bail!("Push receiver stopped unexpectedly"),
                Ok(Err(e)) => anyhow::bail!("Push receiver failed: {}", e),
                Err(e) => anyhow::bail!("Push receiver task panicked: {}", e),
            }
        }

        info!("Shutting down daemon");
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.stop()).await {
            Ok(()) => Ok(()),
            Err(_) => anyhow::bail!("Shutdown timeout after {:?}", SHUTDOWN_TIMEOUT),
        }
    }

    async fn stop(&mut self) {
        if let Some((tx, handle)) = self.poller.take() {
            let _ = tx.send(());
            if let Err(e) = handle.await {
                warn!("Poller task ended abnormally: {}", e);
            }
        }
        if let Some((tx, handle)) = self.receiver.take() {
            let _ = tx.send(());
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Push receiver stopped with error: {}", e),
                Err(e) => warn!("Push receiver task ended abnormally: {}", e),
            }
        }
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
