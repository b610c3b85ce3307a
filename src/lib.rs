//! # otel-plane
//!
//! Telemetry bootstrap for Rust services: OTLP export of traces, metrics and
//! logs, verbosity-gated logging correlated with the active span, multi-sink
//! log fan-out and an ordered, deadline-bounded shutdown.
//!
//! One call builds the whole pipeline and returns a [`TelemetryHandle`] to pass
//! to every component that traces, measures or logs.
//!
//! ## Quick Start
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::time::Duration;
//! use otel_plane::re_exports::{Context, KeyValue, TraceContextExt};
//!
//! let telemetry = otel_plane::setup_telemetry("my-service", None)?;
//!
//! let cx = Context::current_with_span(telemetry.start_span("startup", vec![]));
//! telemetry.logger().warn(&cx, "cache cold", &[KeyValue::new("cache", "users")]);
//! cx.span().end();
//!
//! telemetry.shutdown(Duration::from_secs(10))?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Configured Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use otel_plane::{LogFormat, Protocol, TelemetryOptions, Verbosity};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let telemetry = otel_plane::setup_telemetry("my-service", Some(
//!     TelemetryOptions::builder()
//!         .endpoint("collector:4318")
//!         .protocol(Protocol::HttpProtobuf)
//!         .basic_auth("ingest", "s3cret")
//!         .resource_attributes([("deployment.environment", "production")])
//!         .verbosity(Verbosity::Verbose)
//!         .log_format(LogFormat::Json)
//!         .export_timeout(Duration::from_secs(30))
//!         .build()
//! ))?;
//! # Ok(())
//! # }
//! ```

mod emitter;
mod env;
mod error;
mod handle;
mod options;
mod providers;
mod resource;
mod shutdown;
mod sinks;
mod subscriber;
mod verbosity;

pub mod re_exports;

pub use emitter::{CorrelatedLogger, EmitterStats};
pub use error::{ConstructionError, ShutdownError, Signal, SinkError, StepError, StepFailure};
pub use handle::{TelemetryHandle, DEFAULT_SHUTDOWN_TIMEOUT};
pub use options::{LogFormat, LogOutput, Protocol, TelemetryOptions, TelemetryOptionsBuilder};
pub use shutdown::ShutdownRegistry;
pub use sinks::{ConsoleSink, FanOutSink, Field, FieldValue, LogSink, Record, RemoteSink};
pub use verbosity::{InvalidVerbosity, Severity, Verbosity, VerbosityGate};

use std::sync::Arc;

use resource::ServiceIdentity;

/// Build the telemetry pipeline for `service_name`.
///
/// Builds the resource, the three OTLP exporters and their batching providers,
/// installs the tracer and meter providers and the W3C trace-context
/// propagator as OpenTelemetry globals, and wires the default log sinks behind
/// a [`CorrelatedLogger`]. Nothing is returned unless every piece was built.
///
/// The returned handle owns the shutdown of everything built here.
///
/// # Configuration Priority
///
/// 1. **Programmatic**: values set in [`TelemetryOptions`]
/// 2. **Environment variables**: `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`, etc.
/// 3. **Defaults**: `http://localhost:4318` (HTTP+protobuf), 30s export timeout, verbosity 1
///
/// # Errors
///
/// Returns an error if:
/// - The merged configuration is invalid
/// - A required transport feature is not enabled (e.g. `grpc` or `http`)
/// - The transport or any exporter fails to initialize
pub fn setup_telemetry(
    service_name: &str,
    options: Option<TelemetryOptions>,
) -> Result<TelemetryHandle, ConstructionError> {
    let opts = options.unwrap_or_default();
    let config = env::resolve_config(service_name, &opts)?;

    opentelemetry::global::set_text_map_propagator(
        opentelemetry_sdk::propagation::TraceContextPropagator::new(),
    );

    let identity = ServiceIdentity {
        name: &config.service_name,
        version: &config.service_version,
        namespace: config.service_namespace.as_deref(),
        host: config.host_name.as_deref(),
    };
    let resource = resource::build_resource(&identity, &config.resource_attributes)?;

    let exporters = providers::build_exporters(&config)?;
    let mut registry = ShutdownRegistry::new();
    let providers = providers::register(exporters, resource, &config.batch, &mut registry);

    opentelemetry::global::set_tracer_provider(providers.tracer.clone());
    opentelemetry::global::set_meter_provider(providers.meter.clone());

    let gate = Arc::new(VerbosityGate::new(config.verbosity));
    let sink = sinks::default_sink(
        &providers.logger,
        &config.service_name,
        config.log_output,
        config.log_format,
    );
    let logger = CorrelatedLogger::new(gate, sink);

    tracing::info!(
        service = %config.service_name,
        verbosity = config.verbosity.as_u8(),
        "telemetry initialized"
    );

    Ok(TelemetryHandle::new(providers, registry, &config, logger))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::env::tests::{clear_otel_env, ENV_LOCK};

    #[test]
    fn invalid_configuration_is_fatal() {
        let _lock = ENV_LOCK.lock();
        clear_otel_env();

        let result = setup_telemetry(
            "svc",
            Some(TelemetryOptions::builder().max_queue_size(0).build()),
        );

        assert!(matches!(result, Err(ConstructionError::Config(_))));
    }

    #[cfg(feature = "http")]
    #[test]
    fn http_pipeline_builds_and_shuts_down_once() {
        let _lock = ENV_LOCK.lock();
        clear_otel_env();

        let telemetry = setup_telemetry(
            "svc",
            Some(
                TelemetryOptions::builder()
                    .protocol(Protocol::HttpProtobuf)
                    .endpoint("127.0.0.1:9")
                    .log_output(LogOutput::RemoteOnly)
                    .export_timeout(Duration::from_millis(200))
                    .verbosity(Verbosity::Errors)
                    .build(),
            ),
        )
        .unwrap();

        assert_eq!(telemetry.verbosity(), Verbosity::Errors);

        // Nothing was recorded, but the unreachable collector may still fail the flush.
        let _ = telemetry.shutdown(Duration::from_secs(5));
        telemetry.shutdown(Duration::from_secs(5)).unwrap();
    }
}
