use std::collections::HashMap;
use std::time::Duration;

use crate::verbosity::Verbosity;

/// OTLP transport protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// gRPC transport (port 4317). One connection is shared by all signals.
    Grpc,
    /// HTTP with Protobuf encoding (default, port 4318).
    HttpProtobuf,
    /// HTTP with JSON encoding (port 4318).
    HttpJson,
}

impl Protocol {
    /// Whether the protocol multiplexes every signal over one long-lived connection.
    pub fn is_connection_oriented(self) -> bool {
        matches!(self, Protocol::Grpc)
    }

    pub(crate) fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "grpc" => Some(Protocol::Grpc),
            "http" | "http/protobuf" => Some(Protocol::HttpProtobuf),
            "http/json" => Some(Protocol::HttpJson),
            _ => None,
        }
    }
}

/// Where local (human-readable) log records are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    /// No local output; records only reach the OTLP log pipeline.
    RemoteOnly,
}

impl LogOutput {
    pub(crate) fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stdout" => Some(LogOutput::Stdout),
            "stderr" => Some(LogOutput::Stderr),
            "otel" | "remote" | "remote-only" => Some(LogOutput::RemoteOnly),
            _ => None,
        }
    }
}

/// Encoding of local log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// `key=value` lines.
    Text,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    pub(crate) fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Some(LogFormat::Text),
            "json" | "structured" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Configuration options for telemetry setup.
///
/// Use [`TelemetryOptions::builder()`] to construct an instance.
/// All fields are optional; unset values fall back to environment variables, then defaults.
#[derive(Debug, Clone, Default)]
pub struct TelemetryOptions {
    pub(crate) service_version: Option<String>,
    pub(crate) service_namespace: Option<String>,
    pub(crate) endpoint: Option<String>,
    pub(crate) protocol: Option<Protocol>,
    pub(crate) insecure: Option<bool>,
    pub(crate) credentials: Option<(String, String)>,
    pub(crate) resource_attributes: HashMap<String, String>,
    pub(crate) verbosity: Option<Verbosity>,
    pub(crate) max_queue_size: Option<usize>,
    pub(crate) batch_timeout: Option<Duration>,
    pub(crate) export_timeout: Option<Duration>,
    pub(crate) export_interval: Option<Duration>,
    pub(crate) metric_export_interval: Option<Duration>,
    pub(crate) log_output: Option<LogOutput>,
    pub(crate) log_format: Option<LogFormat>,
    pub(crate) tracer_name: Option<String>,
    pub(crate) meter_name: Option<String>,
}

impl TelemetryOptions {
    /// Create a new builder for `TelemetryOptions`.
    pub fn builder() -> TelemetryOptionsBuilder {
        TelemetryOptionsBuilder::default()
    }
}

/// Builder for [`TelemetryOptions`].
#[derive(Debug, Default)]
pub struct TelemetryOptionsBuilder {
    opts: TelemetryOptions,
}

impl TelemetryOptionsBuilder {
    /// Set the `service.version` resource attribute.
    pub fn service_version(mut self, version: impl Into<String>) -> Self {
        self.opts.service_version = Some(version.into());
        self
    }

    /// Set the `service.namespace` resource attribute. Omitted from the resource when unset.
    pub fn service_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.opts.service_namespace = Some(namespace.into());
        self
    }

    /// Set the OTLP endpoint (e.g. `"collector:4317"` or `"https://collector:4318"`).
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.opts.endpoint = Some(endpoint.into());
        self
    }

    /// Set the OTLP transport protocol.
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.opts.protocol = Some(protocol);
        self
    }

    /// Use plaintext transport instead of TLS.
    pub fn insecure(mut self, insecure: bool) -> Self {
        self.opts.insecure = Some(insecure);
        self
    }

    /// Send a `Basic` authorization header on every HTTP export request.
    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.opts.credentials = Some((username.into(), password.into()));
        self
    }

    /// Set additional resource attributes (e.g. `("deployment.environment", "production")`).
    pub fn resource_attributes(
        mut self,
        attrs: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        self.opts.resource_attributes = attrs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// Set the initial log verbosity.
    pub fn verbosity(mut self, verbosity: Verbosity) -> Self {
        self.opts.verbosity = Some(verbosity);
        self
    }

    /// Set the queue capacity of the span and log batch processors.
    pub fn max_queue_size(mut self, size: usize) -> Self {
        self.opts.max_queue_size = Some(size);
        self
    }

    /// Set the delay between span batch exports.
    pub fn batch_timeout(mut self, timeout: Duration) -> Self {
        self.opts.batch_timeout = Some(timeout);
        self
    }

    /// Set the hard limit for a single OTLP export request.
    pub fn export_timeout(mut self, timeout: Duration) -> Self {
        self.opts.export_timeout = Some(timeout);
        self
    }

    /// Set the delay between log batch exports.
    pub fn export_interval(mut self, interval: Duration) -> Self {
        self.opts.export_interval = Some(interval);
        self
    }

    /// Set the interval at which the meter provider pulls and exports instrument values.
    pub fn metric_export_interval(mut self, interval: Duration) -> Self {
        self.opts.metric_export_interval = Some(interval);
        self
    }

    /// Set the local log destination.
    pub fn log_output(mut self, output: LogOutput) -> Self {
        self.opts.log_output = Some(output);
        self
    }

    /// Set the local log encoding.
    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.opts.log_format = Some(format);
        self
    }

    /// Set the instrumentation scope name of the tracer.
    pub fn tracer_name(mut self, name: impl Into<String>) -> Self {
        self.opts.tracer_name = Some(name.into());
        self
    }

    /// Set the instrumentation scope name of the meter.
    pub fn meter_name(mut self, name: impl Into<String>) -> Self {
        self.opts.meter_name = Some(name.into());
        self
    }

    /// Build the [`TelemetryOptions`].
    pub fn build(self) -> TelemetryOptions {
        self.opts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_parsing_accepts_otlp_names() {
        assert_eq!(Protocol::parse("grpc"), Some(Protocol::Grpc));
        assert_eq!(Protocol::parse("http/protobuf"), Some(Protocol::HttpProtobuf));
        assert_eq!(Protocol::parse("HTTP/JSON"), Some(Protocol::HttpJson));
        assert_eq!(Protocol::parse("carrier-pigeon"), None);
    }

    #[test]
    fn only_grpc_is_connection_oriented() {
        assert!(Protocol::Grpc.is_connection_oriented());
        assert!(!Protocol::HttpProtobuf.is_connection_oriented());
        assert!(!Protocol::HttpJson.is_connection_oriented());
    }

    #[test]
    fn log_output_accepts_otel_alias() {
        assert_eq!(LogOutput::parse("otel"), Some(LogOutput::RemoteOnly));
        assert_eq!(LogOutput::parse("Stderr"), Some(LogOutput::Stderr));
        assert_eq!(LogFormat::parse("structured"), Some(LogFormat::Json));
    }
}
