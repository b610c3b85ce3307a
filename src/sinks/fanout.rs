use opentelemetry::Context;

use super::{Field, LogSink, Record};
use crate::error::SinkError;
use crate::verbosity::Severity;

/// Presents an ordered set of sinks as one.
///
/// A record is offered to every child in order; children that report
/// themselves disabled for the record's severity are skipped, so each child
/// keeps its own filtering. A failing child does not stop delivery to the
/// rest, and every failure is returned.
pub struct FanOutSink {
    children: Vec<Box<dyn LogSink>>,
}

impl FanOutSink {
    pub fn new(children: Vec<Box<dyn LogSink>>) -> Self {
        Self { children }
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl LogSink for FanOutSink {
    fn name(&self) -> &'static str {
        "fanout"
    }

    fn enabled(&self, cx: &Context, severity: Severity) -> bool {
        self.children.iter().any(|c| c.enabled(cx, severity))
    }

    fn handle(&self, cx: &Context, record: &Record) -> Result<(), SinkError> {
        let errors: Vec<SinkError> = self
            .children
            .iter()
            .filter(|c| c.enabled(cx, record.severity))
            .filter_map(|c| c.handle(cx, record).err())
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SinkError::Fanout(errors))
        }
    }

    fn with_fields(&self, fields: &[Field]) -> Box<dyn LogSink> {
        Box::new(Self {
            children: self.children.iter().map(|c| c.with_fields(fields)).collect(),
        })
    }

    fn with_group(&self, name: &str) -> Box<dyn LogSink> {
        Box::new(Self {
            children: self.children.iter().map(|c| c.with_group(name)).collect(),
        })
    }
}
