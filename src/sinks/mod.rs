//! Structured log destinations.
//!
//! Every destination implements [`LogSink`]. [`FanOutSink`] composes several
//! of them behind the same trait, so callers never know how many there are.

mod console;
mod fanout;
mod remote;

use std::borrow::Cow;
use std::sync::Arc;
use std::time::SystemTime;

use opentelemetry::{Context, KeyValue, Value};
use opentelemetry_sdk::logs::SdkLoggerProvider;
use serde::Serialize;

pub use console::ConsoleSink;
pub use fanout::FanOutSink;
pub use remote::RemoteSink;

use crate::error::SinkError;
use crate::options::{LogFormat, LogOutput};
use crate::verbosity::Severity;

/// A log destination.
///
/// Implementations own whatever synchronization their output needs;
/// `handle` may be called from many threads at once.
pub trait LogSink: Send + Sync {
    /// Short name used in delivery errors.
    fn name(&self) -> &'static str;

    /// Whether a record of this severity would be written.
    fn enabled(&self, cx: &Context, severity: Severity) -> bool;

    /// Write one record. `cx` carries the active span for trace correlation.
    fn handle(&self, cx: &Context, record: &Record) -> Result<(), SinkError>;

    /// A copy of this sink that adds `fields` to every record.
    fn with_fields(&self, fields: &[Field]) -> Box<dyn LogSink>;

    /// A copy of this sink that qualifies subsequent field keys with `name`.
    fn with_group(&self, name: &str) -> Box<dyn LogSink>;
}

/// A single log record as handed to sinks.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub timestamp: SystemTime,
    pub severity: Severity,
    pub message: String,
    pub fields: Vec<Field>,
}

impl Record {
    pub fn new(severity: Severity, message: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            timestamp: SystemTime::now(),
            severity,
            message: message.into(),
            fields,
        }
    }
}

/// A structured key/value pair on a [`Record`].
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub key: Cow<'static, str>,
    pub value: FieldValue,
}

impl Field {
    pub fn new(key: impl Into<Cow<'static, str>>, value: impl Into<FieldValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    I64(i64),
    F64(f64),
    Str(String),
}

impl From<&KeyValue> for Field {
    fn from(kv: &KeyValue) -> Self {
        let value = match &kv.value {
            Value::Bool(b) => FieldValue::Bool(*b),
            Value::I64(i) => FieldValue::I64(*i),
            Value::F64(f) => FieldValue::F64(*f),
            Value::String(s) => FieldValue::Str(s.as_str().to_owned()),
            other => FieldValue::Str(other.to_string()),
        };
        Field {
            key: Cow::Owned(kv.key.as_str().to_owned()),
            value,
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::I64(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::F64(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_owned())
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Bool(v) => write!(f, "{v}"),
            FieldValue::I64(v) => write!(f, "{v}"),
            FieldValue::F64(v) => write!(f, "{v}"),
            FieldValue::Str(v) => f.write_str(v),
        }
    }
}

/// Group prefix and preset fields accumulated through `with_group`/`with_fields`.
#[derive(Debug, Clone, Default)]
pub(crate) struct Scope {
    prefix: String,
    preset: Vec<Field>,
}

impl Scope {
    pub(crate) fn with_fields(&self, fields: &[Field]) -> Self {
        let mut scope = self.clone();
        scope.preset.extend(fields.iter().map(|f| Field {
            key: Cow::Owned(self.qualify(&f.key).into_owned()),
            value: f.value.clone(),
        }));
        scope
    }

    /// Empty group names are ignored.
    pub(crate) fn with_group(&self, name: &str) -> Self {
        let mut scope = self.clone();
        if !name.is_empty() {
            scope.prefix = self.qualify(name).into_owned();
        }
        scope
    }

    fn qualify<'a>(&self, key: &'a str) -> Cow<'a, str> {
        if self.prefix.is_empty() {
            Cow::Borrowed(key)
        } else {
            Cow::Owned(format!("{}.{key}", self.prefix))
        }
    }

    /// Preset fields followed by the record's own, with keys qualified.
    pub(crate) fn fields<'a>(
        &'a self,
        record: &'a Record,
    ) -> impl Iterator<Item = (Cow<'a, str>, &'a FieldValue)> + 'a {
        self.preset
            .iter()
            .map(|f| (Cow::Borrowed(f.key.as_ref()), &f.value))
            .chain(record.fields.iter().map(|f| (self.qualify(&f.key), &f.value)))
    }
}

/// The default sink set: local console output (unless remote-only) plus the
/// OTLP log pipeline.
pub(crate) fn default_sink(
    provider: &SdkLoggerProvider,
    scope_name: &str,
    output: LogOutput,
    format: LogFormat,
) -> Arc<dyn LogSink> {
    let remote: Box<dyn LogSink> = Box::new(RemoteSink::new(provider, scope_name.to_owned()));

    let console = match output {
        LogOutput::Stdout => ConsoleSink::stdout(format),
        LogOutput::Stderr => ConsoleSink::stderr(format),
        LogOutput::RemoteOnly => return Arc::from(remote),
    };
    let console: Box<dyn LogSink> = Box::new(console.with_min_severity(Severity::Info));

    Arc::new(FanOutSink::new(vec![console, remote]))
}
