use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use opentelemetry::trace::TraceContextExt;
use opentelemetry::Context;

use super::{Field, LogSink, Record, Scope};
use crate::error::SinkError;
use crate::options::LogFormat;
use crate::verbosity::Severity;

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Human-readable local output, as `key=value` text or one JSON object per line.
///
/// Records carry `trace_id`/`span_id` when the context has a valid span.
pub struct ConsoleSink {
    writer: SharedWriter,
    format: LogFormat,
    min_severity: Severity,
    scope: Scope,
}

impl ConsoleSink {
    pub fn new(writer: impl Write + Send + 'static, format: LogFormat) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
            format,
            min_severity: Severity::Debug,
            scope: Scope::default(),
        }
    }

    pub fn stdout(format: LogFormat) -> Self {
        Self::new(std::io::stdout(), format)
    }

    pub fn stderr(format: LogFormat) -> Self {
        Self::new(std::io::stderr(), format)
    }

    /// Drop records below `severity`.
    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = severity;
        self
    }

    fn derive(&self, scope: Scope) -> Box<dyn LogSink> {
        Box::new(Self {
            writer: Arc::clone(&self.writer),
            format: self.format,
            min_severity: self.min_severity,
            scope,
        })
    }

    fn encode(&self, cx: &Context, record: &Record) -> Result<String, SinkError> {
        let time = DateTime::<Utc>::from(record.timestamp).to_rfc3339_opts(SecondsFormat::Millis, true);
        let span = cx.span();
        let span_context = span.span_context();
        let correlation = span_context.is_valid().then(|| {
            (
                span_context.trace_id().to_string(),
                span_context.span_id().to_string(),
            )
        });

        match self.format {
            LogFormat::Json => {
                let mut obj = serde_json::Map::new();
                obj.insert("time".into(), time.into());
                obj.insert("level".into(), record.severity.as_str().into());
                obj.insert("msg".into(), record.message.clone().into());
                for (key, value) in self.scope.fields(record) {
                    let value = serde_json::to_value(value).map_err(|source| SinkError::Encode {
                        sink: self.name(),
                        source,
                    })?;
                    obj.insert(key.into_owned(), value);
                }
                if let Some((trace_id, span_id)) = correlation {
                    obj.insert("trace_id".into(), trace_id.into());
                    obj.insert("span_id".into(), span_id.into());
                }
                serde_json::to_string(&obj).map_err(|source| SinkError::Encode {
                    sink: self.name(),
                    source,
                })
            }
            LogFormat::Text => {
                let mut line = format!(
                    "time={time} level={} msg={}",
                    record.severity,
                    quote(&record.message)
                );
                for (key, value) in self.scope.fields(record) {
                    line.push_str(&format!(" {key}={}", quote(&value.to_string())));
                }
                if let Some((trace_id, span_id)) = correlation {
                    line.push_str(&format!(" trace_id={trace_id} span_id={span_id}"));
                }
                Ok(line)
            }
        }
    }
}

/// Quote values containing whitespace, quotes or `=`.
fn quote(value: &str) -> String {
    if value.is_empty() || value.contains(|c: char| c.is_whitespace() || c == '"' || c == '=') {
        format!("{value:?}")
    } else {
        value.to_owned()
    }
}

impl LogSink for ConsoleSink {
    fn name(&self) -> &'static str {
        "console"
    }

    fn enabled(&self, _cx: &Context, severity: Severity) -> bool {
        severity >= self.min_severity
    }

    fn handle(&self, cx: &Context, record: &Record) -> Result<(), SinkError> {
        let line = self.encode(cx, record)?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{line}").map_err(|source| SinkError::Write {
            sink: self.name(),
            source,
        })
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
    use opentelemetry_sdk::trace::SdkTracerProvider;

    use super::*;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Buffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn text_lines_quote_values_with_spaces() {
        let buf = Buffer::default();
        let sink = ConsoleSink::new(buf.clone(), LogFormat::Text);
        let record = Record::new(
            Severity::Warn,
            "slow query",
            vec![Field::new("table", "users"), Field::new("elapsed_ms", 812_i64)],
        );

        sink.handle(&Context::new(), &record).unwrap();

        let out = buf.contents();
        assert!(out.contains("level=WARN msg=\"slow query\" table=users elapsed_ms=812"), "{out}");
        assert!(!out.contains("trace_id"), "{out}");
        assert!(out.ends_with('\n'));
    }

    #[test]
    fn json_lines_include_group_qualified_fields() {
        let buf = Buffer::default();
        let sink = ConsoleSink::new(buf.clone(), LogFormat::Json)
            .with_group("db")
            .with_fields(&[Field::new("pool", "primary")]);
        let record = Record::new(Severity::Error, "timeout", vec![Field::new("retries", 3_i64)]);

        sink.handle(&Context::new(), &record).unwrap();

        let line: serde_json::Value = serde_json::from_str(buf.contents().trim()).unwrap();
        assert_eq!(line["level"], "ERROR");
        assert_eq!(line["msg"], "timeout");
        assert_eq!(line["db.pool"], "primary");
        assert_eq!(line["db.retries"], 3);
    }

    #[test]
    fn active_span_ids_are_stamped() {
        let provider = SdkTracerProvider::builder().build();
        let cx = Context::new().with_span(provider.tracer("test").start("op"));
        let trace_id = cx.span().span_context().trace_id().to_string();

        let buf = Buffer::default();
        let sink = ConsoleSink::new(buf.clone(), LogFormat::Text);
        sink.handle(&cx, &Record::new(Severity::Info, "hi", vec![]))
            .unwrap();

        assert!(buf.contents().contains(&format!("trace_id={trace_id}")));
    }

    #[test]
    fn min_severity_gates_enabled() {
        let sink = ConsoleSink::new(Buffer::default(), LogFormat::Text)
            .with_min_severity(Severity::Info);
        assert!(!sink.enabled(&Context::new(), Severity::Debug));
        assert!(sink.enabled(&Context::new(), Severity::Info));
        assert!(sink.enabled(&Context::new(), Severity::Error));
    }
}
