//! Logging that always enriches the active span and, verbosity permitting,
//! writes a structured record.

use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use opentelemetry::trace::{Status, TraceContextExt};
use opentelemetry::{Context, KeyValue};

use crate::sinks::{Field, LogSink, Record};
use crate::verbosity::{Severity, VerbosityGate};

/// Counts of records handed to an enabled sink and records held back by verbosity.
#[derive(Debug, Default)]
pub struct EmitterStats {
    emitted: AtomicU64,
    suppressed: AtomicU64,
}

impl EmitterStats {
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    pub fn suppressed(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }
}

/// Single entry point for application logging.
///
/// Every call annotates the span in `cx`: errors set the span status and
/// record an `exception` event, other severities add the message as a span
/// event. Only then is the [`VerbosityGate`] consulted; records it rejects are
/// never converted or handed to the sink, so traces stay complete while log
/// volume is throttled.
#[derive(Clone)]
pub struct CorrelatedLogger {
    gate: Arc<VerbosityGate>,
    sink: Arc<dyn LogSink>,
    stats: Arc<EmitterStats>,
}

impl CorrelatedLogger {
    pub fn new(gate: Arc<VerbosityGate>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            gate,
            sink,
            stats: Arc::default(),
        }
    }

    pub fn stats(&self) -> &EmitterStats {
        &self.stats
    }

    pub fn gate(&self) -> &Arc<VerbosityGate> {
        &self.gate
    }

    /// A logger whose records all carry `attributes`.
    pub fn with_attributes(&self, attributes: &[KeyValue]) -> Self {
        let fields: Vec<Field> = attributes.iter().map(Field::from).collect();
        Self {
            sink: Arc::from(self.sink.with_fields(&fields)),
            ..self.clone()
        }
    }

    /// A logger whose subsequent attribute keys are qualified with `name`.
    pub fn with_group(&self, name: &str) -> Self {
        Self {
            sink: Arc::from(self.sink.with_group(name)),
            ..self.clone()
        }
    }

    pub fn log(
        &self,
        cx: &Context,
        severity: Severity,
        message: &str,
        err: Option<&dyn Error>,
        attributes: &[KeyValue],
    ) {
        let span = cx.span();
        if span.is_recording() {
            if severity == Severity::Error {
                span.set_status(Status::error(message.to_owned()));
                if let Some(err) = err {
                    let mut event = Vec::with_capacity(attributes.len() + 1);
                    event.push(KeyValue::new("exception.message", err.to_string()));
                    event.extend_from_slice(attributes);
                    span.add_event("exception", event);
                }
            } else {
                span.add_event(message.to_owned(), attributes.to_vec());
            }
        }

        if !self.gate.should_emit(severity) {
            self.stats.suppressed.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let mut fields: Vec<Field> = attributes.iter().map(Field::from).collect();
        if let Some(err) = err {
            fields.push(Field::new("error", err.to_string()));
        }
        let record = Record::new(severity, message, fields);

        if !self.sink.enabled(cx, severity) {
            return;
        }
        self.stats.emitted.fetch_add(1, Ordering::Relaxed);
        if let Err(error) = self.sink.handle(cx, &record) {
            tracing::warn!(%error, "log record delivery failed");
        }
    }

    /// [`log`](Self::log) against the OpenTelemetry context of the current
    /// `tracing` span.
    pub fn log_in_current_span(
        &self,
        severity: Severity,
        message: &str,
        err: Option<&dyn Error>,
        attributes: &[KeyValue],
    ) {
        use tracing_opentelemetry::OpenTelemetrySpanExt;

        let cx = tracing::Span::current().context();
        self.log(&cx, severity, message, err, attributes);
    }

    pub fn error(&self, cx: &Context, message: &str, err: Option<&dyn Error>, attributes: &[KeyValue]) {
        self.log(cx, Severity::Error, message, err, attributes);
    }

    pub fn warn(&self, cx: &Context, message: &str, attributes: &[KeyValue]) {
        self.log(cx, Severity::Warn, message, None, attributes);
    }

    pub fn info(&self, cx: &Context, message: &str, attributes: &[KeyValue]) {
        self.log(cx, Severity::Info, message, None, attributes);
    }
}
