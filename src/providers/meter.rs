use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider, Temporality};
use opentelemetry_sdk::Resource;

use super::transport::Transport;
use crate::env::BatchSettings;
use crate::error::{ConstructionError, Signal};

/// Build a [`SdkMeterProvider`] whose reader pulls instrument values every
/// `metric_export_interval`, independently of the span batch timeout.
pub(crate) fn build_meter_provider<E>(
    exporter: E,
    resource: Resource,
    batch: &BatchSettings,
) -> SdkMeterProvider
where
    E: opentelemetry_sdk::metrics::exporter::PushMetricExporter,
{
    let reader = PeriodicReader::builder(exporter)
        .with_interval(batch.metric_export_interval)
        .build();

    SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build()
}

/// Build the OTLP metric exporter over the shared transport.
///
/// Counters and histograms are exported with cumulative temporality.
///
/// # Errors
///
/// Returns an error if the exporter fails to initialize or the transport's
/// feature is disabled.
pub(crate) fn build_metric_exporter(
    transport: &Transport,
    batch: &BatchSettings,
) -> Result<opentelemetry_otlp::MetricExporter, ConstructionError> {
    let builder =
        opentelemetry_otlp::MetricExporter::builder().with_temporality(Temporality::Cumulative);

    let exporter = match transport {
        #[cfg(feature = "grpc")]
        Transport::Channel(shared) => {
            use opentelemetry_otlp::WithTonicConfig;

            let channel = shared.channel().ok_or_else(|| {
                ConstructionError::exporter(Signal::Metrics, "shared gRPC channel already closed")
            })?;
            builder
                .with_tonic()
                .with_channel(channel)
                .with_timeout(batch.export_timeout)
                .build()
        }
        Transport::Requests(settings) => {
            #[cfg(feature = "http")]
            {
                use opentelemetry_otlp::WithHttpConfig;

                builder
                    .with_http()
                    .with_endpoint(settings.endpoint_for(Signal::Metrics))
                    .with_protocol(settings.otlp_protocol())
                    .with_headers(settings.headers.clone())
                    .with_timeout(batch.export_timeout)
                    .build()
            }
            #[cfg(not(feature = "http"))]
            {
                let _ = (settings, builder);
                return Err(ConstructionError::FeatureDisabled {
                    signal: Signal::Metrics,
                    protocol: "http",
                    feature: "http",
                });
            }
        }
    };

    exporter.map_err(|e| ConstructionError::exporter(Signal::Metrics, e))
}
