use std::borrow::Cow;
use std::sync::Arc;
use std::time::SystemTime;

use opentelemetry::logs::{AnyValue, LogRecord as _, Logger as _, LoggerProvider as _};
use opentelemetry::trace::TraceContextExt;
use opentelemetry::Context;
use opentelemetry_sdk::logs::{SdkLogger, SdkLoggerProvider};

use super::{Field, FieldValue, LogSink, Record, Scope};
use crate::error::SinkError;
use crate::verbosity::Severity;

/// Bridges records into the OTLP log pipeline, stamping the active span's
/// trace and span ids so the collector can correlate logs with traces.
pub struct RemoteSink {
    logger: Arc<SdkLogger>,
    min_severity: Severity,
    scope: Scope,
}

impl RemoteSink {
    pub fn new(provider: &SdkLoggerProvider, scope_name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            logger: Arc::new(provider.logger(scope_name)),
            min_severity: Severity::Debug,
            scope: Scope::default(),
        }
    }

    /// Drop records below `severity`.
    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = severity;
        self
    }

    fn derive(&self, scope: Scope) -> Box<dyn LogSink> {
        Box::new(Self {
            logger: Arc::clone(&self.logger),
            min_severity: self.min_severity,
            scope,
        })
    }
}

fn otel_severity(severity: Severity) -> opentelemetry::logs::Severity {
    match severity {
        Severity::Debug => opentelemetry::logs::Severity::Debug,
        Severity::Info => opentelemetry::logs::Severity::Info,
        Severity::Warn => opentelemetry::logs::Severity::Warn,
        Severity::Error => opentelemetry::logs::Severity::Error,
    }
}

fn any_value(value: &FieldValue) -> AnyValue {
    match value {
        FieldValue::Bool(v) => AnyValue::from(*v),
        FieldValue::I64(v) => AnyValue::from(*v),
        FieldValue::F64(v) => AnyValue::from(*v),
        FieldValue::Str(v) => AnyValue::from(v.clone()),
    }
}

impl LogSink for RemoteSink {
    fn name(&self) -> &'static str {
        "otlp"
    }

    fn enabled(&self, _cx: &Context, severity: Severity) -> bool {
        severity >= self.min_severity
    }

    fn handle(&self, cx: &Context, record: &Record) -> Result<(), SinkError> {
        let mut log = self.logger.create_log_record();
        log.set_timestamp(record.timestamp);
        log.set_observed_timestamp(SystemTime::now());
        log.set_severity_number(otel_severity(record.severity));
        log.set_severity_text(record.severity.as_str());
        log.set_body(AnyValue::from(record.message.clone()));

        for (key, value) in self.scope.fields(record) {
            log.add_attribute(key.into_owned(), any_value(value));
        }

        let span = cx.span();
        let span_context = span.span_context();
        if span_context.is_valid() {
            log.set_trace_context(
                span_context.trace_id(),
                span_context.span_id(),
                Some(span_context.trace_flags()),
            );
        }

        // The batch processor drops the record if its queue is full.
        self.logger.emit(log);
        Ok(())
    }

    fn with_fields(&self, fields: &[Field]) -> Box<dyn LogSink> {
        self.derive(self.scope.with_fields(fields))
    }

    fn with_group(&self, name: &str) -> Box<dyn LogSink> {
        self.derive(self.scope.with_group(name))
    }
}

#[cfg(test)]
mod tests {
    use opentelemetry::trace::{Tracer as _, TracerProvider as _};
    use opentelemetry_sdk::logs::InMemoryLogExporter;
    use opentelemetry_sdk::trace::SdkTracerProvider;

    use super::*;

    fn provider() -> (SdkLoggerProvider, InMemoryLogExporter) {
        let exporter = InMemoryLogExporter::default();
        let provider = SdkLoggerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        (provider, exporter)
    }

    #[test]
    fn records_are_correlated_with_the_active_span() {
        let (provider, exporter) = provider();
        let tracer_provider = SdkTracerProvider::builder().build();
        let cx = Context::new().with_span(tracer_provider.tracer("test").start("op"));
        let expected = cx.span().span_context().clone();

        let sink = RemoteSink::new(&provider, "test").with_group("order");
        sink.handle(
            &cx,
            &Record::new(Severity::Warn, "stock low", vec![Field::new("sku", "A-1")]),
        )
        .unwrap();

        let logs = exporter.get_emitted_logs().unwrap();
        assert_eq!(logs.len(), 1);
        let log = &logs[0].record;

        assert_eq!(log.body(), Some(&AnyValue::from("stock low".to_owned())));
        assert_eq!(
            log.severity_number(),
            Some(opentelemetry::logs::Severity::Warn)
        );
        let trace = log.trace_context().expect("trace context stamped");
        assert_eq!(trace.trace_id, expected.trace_id());
        assert_eq!(trace.span_id, expected.span_id());
        assert!(log
            .attributes_iter()
            .any(|(key, _)| key.as_str() == "order.sku"));
    }

    #[test]
    fn records_without_a_span_carry_no_trace_context() {
        let (provider, exporter) = provider();
        let sink = RemoteSink::new(&provider, "test");

        sink.handle(&Context::new(), &Record::new(Severity::Info, "boot", vec![]))
            .unwrap();

        let logs = exporter.get_emitted_logs().unwrap();
        assert!(logs[0].record.trace_context().is_none());
    }

    #[test]
    fn minimum_severity_carries_into_derived_sinks() {
        let (provider, _exporter) = provider();
        let cx = Context::new();
        let sink = RemoteSink::new(&provider, "test").with_min_severity(Severity::Info);

        assert!(!sink.enabled(&cx, Severity::Debug));
        assert!(sink.enabled(&cx, Severity::Info));
        assert!(sink.enabled(&cx, Severity::Warn));

        let grouped = sink.with_group("order");
        assert!(!grouped.enabled(&cx, Severity::Debug));
        assert!(grouped.enabled(&cx, Severity::Error));
    }
}
