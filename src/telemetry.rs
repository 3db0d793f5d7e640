//! OpenTelemetry telemetry integration.
//!
//! This module is only compiled when the `otel` feature is enabled. Spans from the
//! peer connector, the party bus read loop and the JSON-RPC handlers are exported
//! alongside the console output.

use std::sync::OnceLock;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const SERVICE_NAME: &str = "party-node";

/// Global tracer provider for shutdown.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Initialize tracing with OpenTelemetry export.
///
/// Exports traces to the OTLP endpoint configured via `OTEL_EXPORTER_OTLP_ENDPOINT`
/// (defaults to `http://localhost:4318`). Falls back to console-only output if the
/// exporter cannot be built.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "party_node=info,actix_web=info,libp2p_gossipsub=warn".into());

    let fmt_layer = tracing_subscriber::fmt::layer();

    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4318".to_string());

    let otlp_exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
    {
        Ok(exporter) => exporter,
        Err(e) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .init();
            tracing::warn!(error = %e, "Failed to create OTLP exporter, exporting to console only");
            return;
        }
    };

    let resource = opentelemetry_sdk::Resource::builder()
        .with_service_name(SERVICE_NAME)
        .build();

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(otlp_exporter)
        .with_resource(resource)
        .build();

    let tracer = tracer_provider.tracer(SERVICE_NAME);
    let otel_layer = OpenTelemetryLayer::new(tracer);

    // Store provider for shutdown
    let _ = TRACER_PROVIDER.set(tracer_provider.clone());

    opentelemetry::global::set_tracer_provider(tracer_provider);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .init();
}

/// Shutdown OpenTelemetry and flush remaining spans.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get()
        && let Err(e) = provider.shutdown()
    {
        tracing::error!("Error shutting down tracer provider: {e:?}");
    }
}
