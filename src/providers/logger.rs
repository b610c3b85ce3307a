use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::logs::{BatchConfigBuilder, BatchLogProcessor, SdkLoggerProvider};
use opentelemetry_sdk::Resource;

use super::transport::Transport;
use super::MAX_EXPORT_BATCH_SIZE;
use crate::env::BatchSettings;
use crate::error::{ConstructionError, Signal};

/// Build a [`SdkLoggerProvider`] that batches log records into the given exporter.
///
/// Batches are flushed every `export_interval`; records emitted while the
/// queue is full are dropped.
pub(crate) fn build_logger_provider<E>(
    exporter: E,
    resource: Resource,
    batch: &BatchSettings,
) -> SdkLoggerProvider
where
    E: opentelemetry_sdk::logs::LogExporter + 'static,
{
    let config = BatchConfigBuilder::default()
        .with_max_queue_size(batch.max_queue_size)
        .with_max_export_batch_size(batch.max_queue_size.min(MAX_EXPORT_BATCH_SIZE))
        .with_scheduled_delay(batch.export_interval)
        .build();

    let processor = BatchLogProcessor::builder(exporter)
        .with_batch_config(config)
        .build();

    SdkLoggerProvider::builder()
        .with_resource(resource)
        .with_log_processor(processor)
        .build()
}

/// Build the OTLP log exporter over the shared transport.
///
/// # Errors
///
/// Returns an error if the exporter fails to initialize or the transport's
/// feature is disabled.
pub(crate) fn build_log_exporter(
    transport: &Transport,
    batch: &BatchSettings,
) -> Result<opentelemetry_otlp::LogExporter, ConstructionError> {
    let exporter = match transport {
        #[cfg(feature = "grpc")]
        Transport::Channel(shared) => {
            use opentelemetry_otlp::WithTonicConfig;

            let channel = shared.channel().ok_or_else(|| {
                ConstructionError::exporter(Signal::Logs, "shared gRPC channel already closed")
            })?;
            opentelemetry_otlp::LogExporter::builder()
                .with_tonic()
                .with_channel(channel)
                .with_timeout(batch.export_timeout)
                .build()
        }
        Transport::Requests(settings) => {
            #[cfg(feature = "http")]
            {
                use opentelemetry_otlp::WithHttpConfig;

                opentelemetry_otlp::LogExporter::builder()
                    .with_http()
                    .with_endpoint(settings.endpoint_for(Signal::Logs))
                    .with_protocol(settings.otlp_protocol())
                    .with_headers(settings.headers.clone())
                    .with_timeout(batch.export_timeout)
                    .build()
            }
            #[cfg(not(feature = "http"))]
            {
                let _ = settings;
                return Err(ConstructionError::FeatureDisabled {
                    signal: Signal::Logs,
                    protocol: "http",
                    feature: "http",
                });
            }
        }
    };

    exporter.map_err(|e| ConstructionError::exporter(Signal::Logs, e))
}
