use opentelemetry::trace::TraceId;
use tracing::{info, warn};
use tracing_subscriber::{prelude::*, reload, EnvFilter, Registry};

use crate::resources::kueues::LogLevel;

/// Trace id of the current span, `None` unless an exporter is installed
pub fn get_trace_id() -> Option<TraceId> {
    use opentelemetry::trace::TraceContextExt as _;
    use tracing_opentelemetry::OpenTelemetrySpanExt as _;

    let trace_id = tracing::Span::current()
        .context()
        .span()
        .span_context()
        .trace_id();
    (trace_id != TraceId::INVALID).then_some(trace_id)
}

/// Filter directives matching a Kueue `operatorLogLevel`
pub fn filter_directives(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Normal => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace | LogLevel::TraceAll => "trace",
    }
}

/// Changes the operator's own verbosity at runtime.
///
/// A default handle is detached and never changes anything.
#[derive(Clone, Default)]
pub struct LogLevelHandle {
    handle: Option<reload::Handle<EnvFilter, Registry>>,
}

impl LogLevelHandle {
    pub fn new(handle: reload::Handle<EnvFilter, Registry>) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// Switch to the filter for `level`, returning whether the active filter changed.
    ///
    /// An unset level keeps whatever filter is active.
    pub fn apply(&self, level: Option<LogLevel>) -> bool {
        let (Some(handle), Some(level)) = (&self.handle, level) else {
            return false;
        };
        let wanted = EnvFilter::new(filter_directives(level));
        let current = handle.with_current(|filter| filter.to_string());
        if current.as_deref().ok() == Some(wanted.to_string().as_str()) {
            return false;
        }
        match handle.reload(wanted) {
            Ok(()) => {
                info!("Operator log level set to {level:?}");
                true
            }
            Err(err) => {
                warn!("Could not change the operator log level: {err}");
                false
            }
        }
    }
}

#[cfg(feature = "telemetry")]
async fn init_tracer() -> opentelemetry::sdk::trace::Tracer {
    let endpoint = std::env::var("OPENTELEMETRY_ENDPOINT_URL")
        .expect("OPENTELEMETRY_ENDPOINT_URL must point at an OTLP collector");

    let channel = tonic::transport::Channel::from_shared(endpoint)
        .expect("OPENTELEMETRY_ENDPOINT_URL is not a valid URI")
        .connect()
        .await
        .expect("Failed to connect to the OTLP collector");

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(opentelemetry_otlp::new_exporter().tonic().with_channel(channel))
        .with_trace_config(opentelemetry::sdk::trace::config().with_resource(
            opentelemetry::sdk::Resource::new(vec![opentelemetry::KeyValue::new(
                "service.name",
                "kueue-operator",
            )]),
        ))
        .install_batch(opentelemetry::runtime::Tokio)
        .expect("Failed to install the OTLP pipeline")
}

/// Install the global subscriber, filtered by `RUST_LOG` (default `info`) until a
/// Kueue sets `operatorLogLevel`
pub async fn init() -> LogLevelHandle {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter, handle) = reload::Layer::new(env_filter);
    let logger = tracing_subscriber::fmt::layer().compact();

    #[cfg(feature = "telemetry")]
    let collector = Registry::default()
        .with(filter)
        .with(logger)
        .with(tracing_opentelemetry::layer().with_tracer(init_tracer().await));
    #[cfg(not(feature = "telemetry"))]
    let collector = Registry::default().with(filter).with(logger);

    tracing::subscriber::set_global_default(collector).unwrap();
    LogLevelHandle::new(handle)
}
