use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{BatchConfigBuilder, BatchSpanProcessor, SdkTracerProvider};
use opentelemetry_sdk::Resource;

use super::transport::Transport;
use super::MAX_EXPORT_BATCH_SIZE;
use crate::env::BatchSettings;
use crate::error::{ConstructionError, Signal};

/// Build a [`SdkTracerProvider`] that batches spans into the given exporter.
///
/// Spans are flushed every `batch_timeout` or once a full batch is queued.
/// When the queue is full, newly ended spans are dropped.
pub(crate) fn build_tracer_provider<E>(
    exporter: E,
    resource: Resource,
    batch: &BatchSettings,
) -> SdkTracerProvider
where
    E: opentelemetry_sdk::trace::SpanExporter + 'static,
{
    let config = BatchConfigBuilder::default()
        .with_max_queue_size(batch.max_queue_size)
        .with_max_export_batch_size(batch.max_queue_size.min(MAX_EXPORT_BATCH_SIZE))
        .with_scheduled_delay(batch.batch_timeout)
        .build();

    let processor = BatchSpanProcessor::builder(exporter)
        .with_batch_config(config)
        .build();

    SdkTracerProvider::builder()
        .with_resource(resource)
        .with_span_processor(processor)
        .build()
}

/// Build the OTLP span exporter over the shared transport.
///
/// # Errors
///
/// Returns an error if the exporter fails to initialize or the transport's
/// feature is disabled.
pub(crate) fn build_span_exporter(
    transport: &Transport,
    batch: &BatchSettings,
) -> Result<opentelemetry_otlp::SpanExporter, ConstructionError> {
    let exporter = match transport {
        #[cfg(feature = "grpc")]
        Transport::Channel(shared) => {
            use opentelemetry_otlp::WithTonicConfig;

            let channel = shared.channel().ok_or_else(|| {
                ConstructionError::exporter(Signal::Traces, "shared gRPC channel already closed")
            })?;
            opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_channel(channel)
                .with_timeout(batch.export_timeout)
                .build()
        }
        Transport::Requests(settings) => {
            #[cfg(feature = "http")]
            {
                use opentelemetry_otlp::WithHttpConfig;

                opentelemetry_otlp::SpanExporter::builder()
                    .with_http()
                    .with_endpoint(settings.endpoint_for(Signal::Traces))
                    .with_protocol(settings.otlp_protocol())
                    .with_headers(settings.headers.clone())
                    .with_timeout(batch.export_timeout)
                    .build()
            }
            #[cfg(not(feature = "http"))]
            {
                let _ = settings;
                return Err(ConstructionError::FeatureDisabled {
                    signal: Signal::Traces,
                    protocol: "http",
                    feature: "http",
                });
            }
        }
    };

    exporter.map_err(|e| ConstructionError::exporter(Signal::Traces, e))
}
