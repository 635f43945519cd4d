use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Duration;
use tracing::debug;

use crate::telemetry::LogLevelHandle;

pub mod kueue;
pub use kueue::run;

const SERVICE_ACCOUNT_NAMESPACE_FILE: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Namespace the operator falls back to when it cannot discover its own
pub const DEFAULT_OPERATOR_NAMESPACE: &str = "openshift-kueue-operator";

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    /// The last sync error, cleared by the next successful pass
    pub last_error: Option<String>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            last_error: None,
        }
    }
}

/// State shared between the controller and the web server
#[derive(Clone)]
pub struct State {
    /// Diagnostics populated by the sync loop
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    pub registry: prometheus::Registry,
    /// Namespace holding the Kueue object and every namespaced resource we manage
    operator_namespace: String,
    /// How often the Kueue is enqueued without any triggering event
    resync_interval: Duration,
    /// Requested worker count, only one worker is ever started
    workers: usize,
    /// Applies the Kueue's operatorLogLevel to the operator's own logs
    log_level: LogLevelHandle,
}

/// State wrapper around the controller outputs for the web server
impl State {
    pub fn new(operator_namespace: String, resync_interval: Duration, workers: usize) -> Self {
        Self {
            diagnostics: Arc::new(RwLock::new(Diagnostics::default())),
            registry: prometheus::Registry::default(),
            operator_namespace,
            resync_interval,
            workers,
            log_level: LogLevelHandle::default(),
        }
    }

    pub fn with_log_level(self, log_level: LogLevelHandle) -> Self {
        Self { log_level, ..self }
    }

    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    pub fn operator_namespace(&self) -> &str {
        &self.operator_namespace
    }

    pub fn resync_interval(&self) -> Duration {
        self.resync_interval
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn log_level(&self) -> LogLevelHandle {
        self.log_level.clone()
    }
}

/// Resolve the namespace the operator runs in.
///
/// An explicit value (flag or `POD_NAMESPACE`) wins, then the namespace of the
/// mounted service account, then [`DEFAULT_OPERATOR_NAMESPACE`].
pub fn operator_namespace(explicit: Option<String>) -> String {
    resolve_operator_namespace(explicit, Path::new(SERVICE_ACCOUNT_NAMESPACE_FILE))
}

fn resolve_operator_namespace(explicit: Option<String>, namespace_file: &Path) -> String {
    if let Some(namespace) = explicit.filter(|ns| !ns.trim().is_empty()) {
        return namespace.trim().to_owned();
    }

    match std::fs::read_to_string(namespace_file) {
        Ok(namespace) if !namespace.trim().is_empty() => namespace.trim().to_owned(),
        Ok(_) => DEFAULT_OPERATOR_NAMESPACE.into(),
        Err(err) => {
            debug!(
                "Could not read service account namespace from {}: {err}",
                namespace_file.display()
            );
            DEFAULT_OPERATOR_NAMESPACE.into()
        }
    }
}
