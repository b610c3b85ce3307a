use opentelemetry_sdk::trace::SdkTracer;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::error::ConstructionError;
use crate::options::{LogFormat, LogOutput};

/// Compose a tracing subscriber bound to `tracer`.
///
/// Layers added:
/// - [`EnvFilter`] from `RUST_LOG` (defaults to `info`)
/// - `fmt` to stdout or stderr, as text or JSON; left out for remote-only output
/// - `OpenTelemetryLayer`, turning `tracing` spans into exported OTel spans
pub(crate) fn build_subscriber(
    tracer: SdkTracer,
    output: LogOutput,
    format: LogFormat,
) -> impl tracing::Subscriber + Send + Sync + 'static {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let writer = match output {
        LogOutput::Stdout => Some(BoxMakeWriter::new(std::io::stdout)),
        LogOutput::Stderr => Some(BoxMakeWriter::new(std::io::stderr)),
        LogOutput::RemoteOnly => None,
    };
    let fmt_layer = writer.map(|writer| {
        let layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(writer);
        match format {
            LogFormat::Text => layer.boxed(),
            LogFormat::Json => layer.json().boxed(),
        }
    });

    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
}

/// Register the subscriber from [`build_subscriber`] as the global default.
///
/// # Errors
///
/// Returns [`ConstructionError::Subscriber`] if a global subscriber is already set.
pub(crate) fn install_subscriber(
    tracer: SdkTracer,
    output: LogOutput,
    format: LogFormat,
) -> Result<(), ConstructionError> {
    tracing::subscriber::set_global_default(build_subscriber(tracer, output, format))
        .map_err(|e| ConstructionError::Subscriber(e.to_string()))
}
