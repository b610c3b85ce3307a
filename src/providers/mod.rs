//! Exporter construction and the batching providers built on top of them.

pub(crate) mod logger;
pub(crate) mod meter;
pub(crate) mod tracer;
pub(crate) mod transport;

use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;

use crate::env::{BatchSettings, ResolvedConfig};
use crate::error::ConstructionError;
use crate::shutdown::ShutdownRegistry;
use transport::Transport;

/// Upper bound on records per export request; the SDK default.
pub(crate) const MAX_EXPORT_BATCH_SIZE: usize = 512;

/// The three OTLP exporters of one pipeline and the transport they share.
pub(crate) struct ExporterSet<S, M, L> {
    pub spans: S,
    pub metrics: M,
    pub logs: L,
    pub transport: Transport,
}

pub(crate) type OtlpExporters = ExporterSet<
    opentelemetry_otlp::SpanExporter,
    opentelemetry_otlp::MetricExporter,
    opentelemetry_otlp::LogExporter,
>;

/// Build span, metric and log exporters for the configured protocol.
///
/// gRPC exporters share one channel; HTTP exporters each get their own client
/// carrying the same headers. Any single failure aborts the whole build and
/// releases the transport.
///
/// # Errors
///
/// Returns an error naming the signal whose exporter failed, or the transport
/// if it could not be opened.
pub(crate) fn build_exporters(config: &ResolvedConfig) -> Result<OtlpExporters, ConstructionError> {
    let transport = Transport::open(config)?;
    tracing::info!(
        protocol = ?config.protocol,
        endpoint = %config.endpoint,
        shared = transport.is_shared(),
        "building OTLP exporters"
    );

    let built = (|| -> Result<_, ConstructionError> {
        Ok((
            tracer::build_span_exporter(&transport, &config.batch)?,
            meter::build_metric_exporter(&transport, &config.batch)?,
            logger::build_log_exporter(&transport, &config.batch)?,
        ))
    })();

    match built {
        Ok((spans, metrics, logs)) => Ok(ExporterSet {
            spans,
            metrics,
            logs,
            transport,
        }),
        Err(err) => {
            let _ = (transport.closer())();
            Err(err)
        }
    }
}

/// Batching providers sharing one resource.
pub(crate) struct Providers {
    pub tracer: SdkTracerProvider,
    pub meter: SdkMeterProvider,
    pub logger: SdkLoggerProvider,
}

/// Wrap each exporter in its batching provider and record teardown steps.
///
/// Steps are appended as transport, tracer, meter, logger so that shutdown
/// replays them as logger, meter, tracer, transport.
pub(crate) fn register<S, M, L>(
    exporters: ExporterSet<S, M, L>,
    resource: Resource,
    batch: &BatchSettings,
    registry: &mut ShutdownRegistry,
) -> Providers
where
    S: opentelemetry_sdk::trace::SpanExporter + 'static,
    M: opentelemetry_sdk::metrics::exporter::PushMetricExporter,
    L: opentelemetry_sdk::logs::LogExporter + 'static,
{
    registry.register("transport", exporters.transport.closer());

    let tracer = tracer::build_tracer_provider(exporters.spans, resource.clone(), batch);
    let tp = tracer.clone();
    registry.register("tracer", move || tp.shutdown());

    let meter = meter::build_meter_provider(exporters.metrics, resource.clone(), batch);
    let mp = meter.clone();
    registry.register("meter", move || mp.shutdown());

    let logger = logger::build_logger_provider(exporters.logs, resource, batch);
    let lp = logger.clone();
    registry.register("logger", move || lp.shutdown());

    Providers {
        tracer,
        meter,
        logger,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use opentelemetry_sdk::logs::InMemoryLogExporter;
    use opentelemetry_sdk::metrics::InMemoryMetricExporter;
    use opentelemetry_sdk::trace::InMemorySpanExporter;

    use super::*;
    use crate::env::tests::{clear_otel_env, ENV_LOCK};
    use crate::options::{Protocol, TelemetryOptions};

    fn batch() -> BatchSettings {
        BatchSettings {
            max_queue_size: 64,
            batch_timeout: Duration::from_secs(5),
            export_timeout: Duration::from_secs(1),
            export_interval: Duration::from_secs(1),
            metric_export_interval: Duration::from_secs(60),
        }
    }

    fn resolve(opts: TelemetryOptions) -> ResolvedConfig {
        let _lock = ENV_LOCK.lock();
        clear_otel_env();
        crate::env::resolve_config("svc", &opts).unwrap()
    }

    #[test]
    fn registry_records_steps_in_construction_order() {
        let exporters = ExporterSet {
            spans: InMemorySpanExporter::default(),
            metrics: InMemoryMetricExporter::default(),
            logs: InMemoryLogExporter::default(),
            transport: Transport::Requests(transport::RequestSettings {
                base_endpoint: "http://localhost:4318".to_owned(),
                protocol: Protocol::HttpProtobuf,
                headers: Default::default(),
            }),
        };
        let mut registry = ShutdownRegistry::new();

        let _providers = register(exporters, Resource::builder().build(), &batch(), &mut registry);

        assert_eq!(registry.steps(), vec!["transport", "tracer", "meter", "logger"]);
        registry.shutdown(Duration::from_secs(5)).unwrap();
    }

    #[cfg(feature = "http")]
    #[test]
    fn http_exporters_carry_basic_auth() {
        let config = resolve(
            TelemetryOptions::builder()
                .protocol(Protocol::HttpProtobuf)
                .endpoint("collector:4318")
                .basic_auth("u", "p")
                .build(),
        );

        let exporters = build_exporters(&config).unwrap();

        assert!(!exporters.transport.is_shared());
        match &exporters.transport {
            Transport::Requests(settings) => {
                assert_eq!(
                    settings.headers.get("Authorization").map(String::as_str),
                    Some("Basic dTpw")
                );
                assert_eq!(settings.base_endpoint, "http://collector:4318");
            }
            #[allow(unreachable_patterns)]
            _ => panic!("HTTP protocol must use per-signal clients"),
        }
    }

    #[cfg(feature = "http")]
    #[test]
    fn http_without_credentials_sends_no_auth_header() {
        let config = resolve(TelemetryOptions::builder().build());
        let exporters = build_exporters(&config).unwrap();

        match &exporters.transport {
            Transport::Requests(settings) => assert!(settings.headers.is_empty()),
            #[allow(unreachable_patterns)]
            _ => panic!("HTTP protocol must use per-signal clients"),
        }
    }

    #[cfg(feature = "grpc")]
    #[tokio::test]
    async fn grpc_exporters_share_one_channel() {
        let config = resolve(
            TelemetryOptions::builder()
                .protocol(Protocol::Grpc)
                .endpoint("collector:4317")
                .insecure(true)
                .build(),
        );

        let exporters = build_exporters(&config).unwrap();
        assert!(exporters.transport.is_shared());

        let Transport::Channel(shared) = &exporters.transport else {
            panic!("gRPC must use a shared channel");
        };
        assert_eq!(shared.endpoint(), "http://collector:4317");

        (exporters.transport.closer())().unwrap();
        assert!(shared.channel().is_none());
        // A second close is harmless.
        (exporters.transport.closer())().unwrap();
    }

    #[cfg(feature = "grpc")]
    #[test]
    fn grpc_outside_runtime_fails_whole_build() {
        let config = resolve(
            TelemetryOptions::builder()
                .protocol(Protocol::Grpc)
                .endpoint("collector:4317")
                .build(),
        );

        assert!(matches!(
            build_exporters(&config),
            Err(ConstructionError::Transport { .. })
        ));
    }

    /// Request line and lowercased headers of one request a local collector received.
    #[cfg(feature = "http")]
    type Received = std::sync::Arc<std::sync::Mutex<Vec<(String, Vec<(String, String)>)>>>;

    /// Accept OTLP/HTTP requests on `listener`, answering each with an empty 200.
    #[cfg(feature = "http")]
    fn serve_collector(listener: std::net::TcpListener) -> Received {
        use std::io::{BufRead, BufReader, Read, Write};

        let received = Received::default();
        let sink = std::sync::Arc::clone(&received);
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let mut reader = BufReader::new(stream);

                let mut request_line = String::new();
                if reader.read_line(&mut request_line).is_err() {
                    continue;
                }
                let mut headers = Vec::new();
                loop {
                    let mut line = String::new();
                    match reader.read_line(&mut line) {
                        Ok(0) | Err(_) => break,
                        Ok(_) if line.trim().is_empty() => break,
                        Ok(_) => {
                            if let Some((name, value)) = line.split_once(':') {
                                headers.push((
                                    name.trim().to_ascii_lowercase(),
                                    value.trim().to_owned(),
                                ));
                            }
                        }
                    }
                }
                let length = headers
                    .iter()
                    .find(|(name, _)| name == "content-length")
                    .and_then(|(_, value)| value.parse::<usize>().ok())
                    .unwrap_or(0);
                let mut body = vec![0; length];
                let _ = reader.read_exact(&mut body);

                sink.lock()
                    .unwrap()
                    .push((request_line.trim().to_owned(), headers));
                let _ = reader.get_mut().write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                );
            }
        });
        received
    }

    #[cfg(feature = "http")]
    #[test]
    fn every_signal_request_carries_basic_auth() {
        use opentelemetry::logs::{LogRecord as _, Logger as _, LoggerProvider as _};
        use opentelemetry::metrics::MeterProvider as _;
        use opentelemetry::trace::{Span as _, Tracer as _, TracerProvider as _};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let received = serve_collector(listener);

        let config = resolve(
            TelemetryOptions::builder()
                .protocol(Protocol::HttpProtobuf)
                .endpoint(format!("127.0.0.1:{port}"))
                .basic_auth("u", "p")
                .insecure(true)
                .export_timeout(Duration::from_secs(2))
                .build(),
        );
        let exporters = build_exporters(&config).unwrap();
        let mut registry = ShutdownRegistry::new();
        let providers = register(exporters, Resource::builder().build(), &config.batch, &mut registry);

        providers.tracer.tracer("test").start("checkout").end();
        providers
            .meter
            .meter("test")
            .u64_counter("orders")
            .build()
            .add(1, &[]);
        let logger = providers.logger.logger("test");
        let mut record = logger.create_log_record();
        record.set_body("order placed".into());
        logger.emit(record);

        let _ = providers.tracer.force_flush();
        let _ = providers.meter.force_flush();
        let _ = providers.logger.force_flush();

        let requests = received.lock().unwrap().clone();
        for path in ["/v1/traces", "/v1/metrics", "/v1/logs"] {
            let (_, headers) = requests
                .iter()
                .find(|(line, _)| line.starts_with(&format!("POST {path} ")))
                .unwrap_or_else(|| panic!("no request to {path} in {requests:?}"));
            assert!(
                headers
                    .iter()
                    .any(|(name, value)| name == "authorization" && value == "Basic dTpw"),
                "{path} headers: {headers:?}"
            );
        }

        let _ = registry.shutdown(Duration::from_secs(5));
    }

    #[cfg(all(feature = "http", feature = "tls"))]
    #[test]
    fn secure_http_endpoint_negotiates_tls() {
        use std::io::Read;

        use opentelemetry::trace::{Span as _, Tracer as _, TracerProvider as _};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut first = [0_u8; 1];
                if stream.read_exact(&mut first).is_ok() {
                    let _ = tx.send(first[0]);
                }
            }
        });

        let config = resolve(
            TelemetryOptions::builder()
                .protocol(Protocol::HttpProtobuf)
                .endpoint(format!("127.0.0.1:{port}"))
                .insecure(false)
                .export_timeout(Duration::from_millis(500))
                .build(),
        );
        let exporters = build_exporters(&config).unwrap();
        let provider =
            tracer::build_tracer_provider(exporters.spans, Resource::builder().build(), &config.batch);

        provider.tracer("test").start("checkout").end();
        // The handshake cannot complete against a plain socket.
        let _ = provider.force_flush();

        // 0x16 opens a TLS handshake record (ClientHello).
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(0x16));
        let _ = provider.shutdown();
    }
}
