use std::borrow::Cow;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use opentelemetry::metrics::{Counter, Meter, MeterProvider as _, ObservableGauge};
use opentelemetry::trace::{Tracer as _, TracerProvider as _};
use opentelemetry::{InstrumentationScope, KeyValue};
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider, Span};

use crate::emitter::CorrelatedLogger;
use crate::env::ResolvedConfig;
use crate::error::{ConstructionError, ShutdownError, StepError, StepFailure};
use crate::options::{LogFormat, LogOutput};
use crate::providers::Providers;
use crate::shutdown::ShutdownRegistry;
use crate::verbosity::{Verbosity, VerbosityGate};

/// Deadline used when a handle is dropped without an explicit shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Instruments created once at startup.
///
/// Besides the application counter this registers process gauges, observed
/// on every metric collection.
struct Instruments {
    operations: Counter<u64>,
    _uptime: ObservableGauge<f64>,
    _cpus: ObservableGauge<u64>,
}

impl Instruments {
    fn new(meter: &Meter) -> Self {
        let started = Instant::now();
        let cpus = std::thread::available_parallelism().map_or(1, |n| n.get() as u64);

        Self {
            operations: meter
                .u64_counter("app.operations.total")
                .with_description("Operations processed by the application")
                .with_unit("{operation}")
                .build(),
            _uptime: meter
                .f64_observable_gauge("process.uptime")
                .with_description("Time since telemetry was initialized")
                .with_unit("s")
                .with_callback(move |observer| {
                    observer.observe(started.elapsed().as_secs_f64(), &[]);
                })
                .build(),
            _cpus: meter
                .u64_observable_gauge("system.cpu.logical.count")
                .with_description("Logical CPUs available to the process")
                .with_unit("{cpu}")
                .with_callback(move |observer| observer.observe(cpus, &[]))
                .build(),
        }
    }
}

/// The running telemetry pipeline.
///
/// Holds the tracer, meter and logger handed to the rest of the application
/// and owns the teardown of every provider. **Must be held for the duration
/// of the application.**
///
/// Call [`shutdown`](Self::shutdown) to flush and release everything within a
/// deadline. A handle dropped without an explicit shutdown runs one with
/// [`DEFAULT_SHUTDOWN_TIMEOUT`] and reports failures on stderr.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
///
/// let telemetry = otel_plane::setup_telemetry("my-service", None).unwrap();
/// // ... application runs ...
/// telemetry.shutdown(Duration::from_secs(10)).unwrap();
/// ```
#[must_use = "dropping the TelemetryHandle immediately shuts down every provider; \
              hold it for the lifetime of your application"]
pub struct TelemetryHandle {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
    logger_provider: SdkLoggerProvider,
    tracer: SdkTracer,
    meter: Meter,
    instruments: Instruments,
    logger: CorrelatedLogger,
    log_output: LogOutput,
    log_format: LogFormat,
    registry: Mutex<Option<ShutdownRegistry>>,
}

impl std::fmt::Debug for TelemetryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryHandle")
            .field("verbosity", &self.verbosity())
            .field("log_output", &self.log_output)
            .field("log_format", &self.log_format)
            .finish_non_exhaustive()
    }
}

impl TelemetryHandle {
    pub(crate) fn new(
        providers: Providers,
        registry: ShutdownRegistry,
        config: &ResolvedConfig,
        logger: CorrelatedLogger,
    ) -> Self {
        let tracer = providers
            .tracer
            .tracer_with_scope(InstrumentationScope::builder(config.tracer_name.clone()).build());
        let meter = providers
            .meter
            .meter_with_scope(InstrumentationScope::builder(config.meter_name.clone()).build());
        let instruments = Instruments::new(&meter);

        Self {
            tracer_provider: providers.tracer,
            meter_provider: providers.meter,
            logger_provider: providers.logger,
            tracer,
            meter,
            instruments,
            logger,
            log_output: config.log_output,
            log_format: config.log_format,
            registry: Mutex::new(Some(registry)),
        }
    }

    pub fn tracer(&self) -> &SdkTracer {
        &self.tracer
    }

    pub fn meter(&self) -> &Meter {
        &self.meter
    }

    /// Start a span on the handle's tracer.
    ///
    /// The span is parented to the current OTel context, if any.
    pub fn start_span(&self, name: impl Into<Cow<'static, str>>, attributes: Vec<KeyValue>) -> Span {
        self.tracer
            .span_builder(name)
            .with_attributes(attributes)
            .start(&self.tracer)
    }

    /// A monotonic counter on the handle's meter. Values are cumulative
    /// across exports.
    pub fn counter(&self, name: impl Into<Cow<'static, str>>) -> Counter<u64> {
        self.meter.u64_counter(name).build()
    }

    /// The `app.operations.total` counter.
    pub fn operations(&self) -> &Counter<u64> {
        &self.instruments.operations
    }

    pub fn logger(&self) -> &CorrelatedLogger {
        &self.logger
    }

    pub fn verbosity_gate(&self) -> &Arc<VerbosityGate> {
        self.logger.gate()
    }

    pub fn verbosity(&self) -> Verbosity {
        self.logger.gate().level()
    }

    /// Change the verbosity threshold; applies to the next log call on every thread.
    pub fn set_verbosity(&self, level: Verbosity) {
        tracing::info!(level = level.as_u8(), "log verbosity changed");
        self.logger.gate().set_level(level);
    }

    /// Install a global `tracing` subscriber that exports `tracing` spans
    /// through this handle's tracer and writes `tracing` events to the
    /// configured console output.
    ///
    /// # Errors
    ///
    /// Returns an error if a global subscriber has already been set.
    pub fn install_subscriber(&self) -> Result<(), ConstructionError> {
        crate::subscriber::install_subscriber(self.tracer.clone(), self.log_output, self.log_format)
    }

    /// Export everything buffered by the three providers.
    ///
    /// # Errors
    ///
    /// Returns every provider that failed to flush.
    pub fn force_flush(&self) -> Result<(), ShutdownError> {
        let results = [
            ("tracer", self.tracer_provider.force_flush()),
            ("meter", self.meter_provider.force_flush()),
            ("logger", self.logger_provider.force_flush()),
        ];

        let failures: Vec<StepFailure> = results
            .into_iter()
            .filter_map(|(step, result)| {
                let cause = StepError::Failed(result.err()?.into());
                Some(StepFailure { step, cause })
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ShutdownError { failures })
        }
    }

    /// Flush and release every provider, then the transport, within `timeout`.
    ///
    /// Only the first call does any work; later calls return `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns every teardown step that failed or missed the deadline.
    pub fn shutdown(&self, timeout: Duration) -> Result<(), ShutdownError> {
        let registry = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match registry {
            Some(registry) => {
                tracing::info!(steps = registry.len(), "shutting down telemetry");
                registry.shutdown(timeout)
            }
            None => Ok(()),
        }
    }
}

impl Drop for TelemetryHandle {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown(DEFAULT_SHUTDOWN_TIMEOUT) {
            eprintln!("otel-plane: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use opentelemetry::trace::Span as _;
    use opentelemetry_sdk::logs::InMemoryLogExporter;
    use opentelemetry_sdk::metrics::InMemoryMetricExporter;
    use opentelemetry_sdk::trace::InMemorySpanExporter;
    use opentelemetry_sdk::Resource;

    use super::*;
    use crate::env::tests::{clear_otel_env, ENV_LOCK};
    use crate::options::{Protocol, TelemetryOptions};
    use crate::providers::transport::{RequestSettings, Transport};
    use crate::providers::{register, ExporterSet};
    use crate::sinks::test_support::CollectingSink;

    struct Fixture {
        handle: TelemetryHandle,
        spans: InMemorySpanExporter,
        metrics: InMemoryMetricExporter,
        sink: CollectingSink,
    }

    fn fixture() -> Fixture {
        let config = {
            let _lock = ENV_LOCK.lock();
            clear_otel_env();
            crate::env::resolve_config(
                "checkout",
                &TelemetryOptions::builder().tracer_name("checkout-tracer").build(),
            )
            .unwrap()
        };

        let spans = InMemorySpanExporter::default();
        let metrics = InMemoryMetricExporter::default();
        let exporters = ExporterSet {
            spans: spans.clone(),
            metrics: metrics.clone(),
            logs: InMemoryLogExporter::default(),
            transport: Transport::Requests(RequestSettings {
                base_endpoint: config.endpoint.clone(),
                protocol: Protocol::HttpProtobuf,
                headers: Default::default(),
            }),
        };
        let mut registry = ShutdownRegistry::new();
        let providers = register(exporters, Resource::builder().build(), &config.batch, &mut registry);

        let sink = CollectingSink::new();
        let gate = Arc::new(VerbosityGate::new(config.verbosity));
        let logger = CorrelatedLogger::new(gate, Arc::new(sink.clone()));

        Fixture {
            handle: TelemetryHandle::new(providers, registry, &config, logger),
            spans,
            metrics,
            sink,
        }
    }

    #[test]
    fn spans_are_exported_on_flush() {
        let fx = fixture();

        let mut span = fx
            .handle
            .start_span("charge_card", vec![KeyValue::new("payment.provider", "acme")]);
        span.end();
        fx.handle.force_flush().unwrap();

        let spans = fx.spans.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "charge_card");
        assert_eq!(spans[0].instrumentation_scope.name(), "checkout-tracer");
        assert!(spans[0]
            .attributes
            .iter()
            .any(|kv| kv.key.as_str() == "payment.provider"));
    }

    fn exported_metric_names(metrics: &InMemoryMetricExporter) -> Vec<String> {
        metrics
            .get_finished_metrics()
            .unwrap()
            .iter()
            .flat_map(|rm| rm.scope_metrics())
            .flat_map(|sm| sm.metrics())
            .map(|m| m.name().to_owned())
            .collect()
    }

    #[test]
    fn operations_counter_is_exported() {
        let fx = fixture();

        fx.handle.operations().add(3, &[KeyValue::new("kind", "order")]);
        fx.handle.force_flush().unwrap();

        let names = exported_metric_names(&fx.metrics);
        assert!(names.iter().any(|n| n == "app.operations.total"), "{names:?}");
    }

    #[test]
    fn process_gauges_are_collected_without_recording() {
        let fx = fixture();

        fx.handle.force_flush().unwrap();

        let names = exported_metric_names(&fx.metrics);
        assert!(names.iter().any(|n| n == "process.uptime"), "{names:?}");
        assert!(names.iter().any(|n| n == "system.cpu.logical.count"), "{names:?}");
    }

    #[test]
    fn verbosity_changes_reach_the_logger() {
        let fx = fixture();
        let cx = opentelemetry::Context::new();

        assert_eq!(fx.handle.verbosity(), Verbosity::Warnings);
        fx.handle.logger().info(&cx, "hidden", &[]);
        fx.handle.set_verbosity(Verbosity::Verbose);
        fx.handle.logger().info(&cx, "shown", &[]);

        let messages: Vec<String> = fx.sink.delivered().into_iter().map(|r| r.message).collect();
        assert_eq!(messages, vec!["shown"]);
    }

    #[test]
    fn second_shutdown_is_a_no_op() {
        let fx = fixture();

        fx.handle.shutdown(Duration::from_secs(5)).unwrap();
        fx.handle.shutdown(Duration::from_secs(5)).unwrap();
    }
}
