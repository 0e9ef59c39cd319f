//! Tracing subscriber setup.
//!
//! Logs always go to stdout. Spans are also exported over OTLP/gRPC when
//! `OTEL_EXPORTER_OTLP_ENDPOINT` is set.

use anyhow::Result;
use opentelemetry::{global, trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    propagation::TraceContextPropagator,
    runtime::Tokio,
    trace::{Tracer, TracerProvider},
    Resource,
};
use std::{env::var, time::Duration};
use tracing::Level;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
use ulid::Ulid;

// Chatty dependencies stay at warn unless RUST_LOG says otherwise.
const QUIET_TARGETS: [&str; 4] = ["hyper=warn", "h2=warn", "tower=warn", "sqlx=warn"];

fn normalize_endpoint(ep: String) -> String {
    if ep.starts_with("http://") || ep.starts_with("https://") {
        ep
    } else {
        format!("https://{}", ep.trim_end_matches('/'))
    }
}

fn init_tracer(endpoint: String) -> Result<Tracer> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(normalize_endpoint(endpoint))
        .with_timeout(Duration::from_secs(3))
        .build()?;

    let instance_id = var("OTEL_SERVICE_INSTANCE_ID").unwrap_or_else(|_| Ulid::new().to_string());

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .with_resource(Resource::new(vec![
            KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            KeyValue::new("service.instance.id", instance_id),
        ]))
        .build();

    let tracer = provider.tracer(env!("CARGO_PKG_NAME"));
    global::set_text_map_propagator(TraceContextPropagator::new());
    global::set_tracer_provider(provider);

    Ok(tracer)
}

fn env_filter(verbosity_level: Option<Level>) -> EnvFilter {
    let mut filter = EnvFilter::builder()
        .with_default_directive(verbosity_level.unwrap_or(Level::ERROR).into())
        .from_env_lossy();
    if var("RUST_LOG").is_err() {
        for directive in QUIET_TARGETS {
            if let Ok(directive) = directive.parse() {
                filter = filter.add_directive(directive);
            }
        }
    }
    filter
}

/// Install the global subscriber.
///
/// # Errors
/// Returns an error if the OTLP exporter can't be built or a subscriber is
/// already installed.
pub fn init(verbosity_level: Option<Level>) -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false);

    let telemetry = match var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        Ok(endpoint) => Some(OpenTelemetryLayer::new(init_tracer(endpoint)?)),
        Err(_) => None,
    };

    let subscriber = Registry::default()
        .with(fmt_layer)
        .with(telemetry)
        .with(env_filter(verbosity_level));

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

/// Flush pending spans before exit.
pub fn shutdown_tracer() {
    global::shutdown_tracer_provider();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(
            normalize_endpoint("http://localhost:4317".to_string()),
            "http://localhost:4317"
        );
        assert_eq!(
            normalize_endpoint("collector:4317/".to_string()),
            "https://collector:4317"
        );
    }

    #[test]
    fn test_env_filter_uses_verbosity() {
        temp_env::with_var("RUST_LOG", None::<&str>, || {
            let filter = env_filter(Some(Level::DEBUG)).to_string();
            assert!(filter.contains("debug"));
            assert!(filter.contains("sqlx=warn"));
        });
    }

    #[test]
    fn test_env_filter_rust_log_wins() {
        temp_env::with_var("RUST_LOG", Some("carhub_auth=trace"), || {
            let filter = env_filter(None).to_string();
            assert!(filter.contains("carhub_auth=trace"));
            assert!(!filter.contains("sqlx=warn"));
        });
    }

    #[test]
    fn test_shutdown_tracer_no_provider() {
        shutdown_tracer();
    }
}
