//! OpenTelemetry tracing setup.
//!
//! The tracer provider is process-wide and installed once at startup. The
//! returned [`Telemetry`] handle owns the shutdown: call
//! [`Telemetry::shutdown`] before exit to flush buffered spans.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};

use crate::config::TelemetryConfig;
use crate::error::{Result, ZtcError};

const SERVICE_NAME: &str = "ztc";

/// Handle to the installed tracer provider.
///
/// When telemetry is disabled this is inert and all methods are no-ops.
pub struct Telemetry {
    tracer: Option<sdktrace::Tracer>,
}

/// Initialize tracing export.
///
/// With `enabled = false` or no OTLP endpoint configured, returns an inert
/// handle so span recording stays zero-cost. Must be called from within a
/// tokio runtime (the batch exporter spawns its worker there).
pub fn init(cfg: &TelemetryConfig) -> Result<Telemetry> {
    if !cfg.enabled || cfg.otlp_endpoint.is_empty() {
        return Ok(Telemetry { tracer: None });
    }

    let exporter = opentelemetry_otlp::new_exporter()
        .http()
        .with_endpoint(cfg.otlp_endpoint.clone())
        .build_span_exporter()
        .map_err(|e| ZtcError::config(format!("failed to create OTLP exporter: {e}")))?;

    let provider = sdktrace::TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_config(
            sdktrace::Config::default()
                .with_resource(Resource::new(vec![KeyValue::new("service.name", SERVICE_NAME)])),
        )
        .build();

    let tracer = provider.tracer(SERVICE_NAME);
    opentelemetry::global::set_tracer_provider(provider);

    Ok(Telemetry {
        tracer: Some(tracer),
    })
}

impl Telemetry {
    /// The tracer to bridge into the `tracing` subscriber, if exporting.
    pub fn tracer(&self) -> Option<sdktrace::Tracer> {
        self.tracer.clone()
    }

    /// Flush buffered spans and tear down the provider.
    pub fn shutdown(self) {
        if self.tracer.is_some() {
            opentelemetry::global::shutdown_tracer_provider();
        }
    }
}
