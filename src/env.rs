use std::collections::HashMap;
use std::time::Duration;

use crate::error::ConstructionError;
use crate::options::{LogFormat, LogOutput, Protocol, TelemetryOptions};
use crate::verbosity::Verbosity;

const DEFAULT_SERVICE_VERSION: &str = "0.1.0";
const DEFAULT_GRPC_ENDPOINT: &str = "localhost:4317";
const DEFAULT_HTTP_ENDPOINT: &str = "localhost:4318";
const DEFAULT_MAX_QUEUE_SIZE: usize = 2048;
const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_EXPORT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_EXPORT_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_METRIC_EXPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Batching parameters for the span and log processors and the metric reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BatchSettings {
    pub max_queue_size: usize,
    /// Delay between span batch exports.
    pub batch_timeout: Duration,
    /// Hard limit of one export request, applied to every exporter.
    pub export_timeout: Duration,
    /// Delay between log batch exports.
    pub export_interval: Duration,
    /// Interval of the periodic metric reader.
    pub metric_export_interval: Duration,
}

/// Fully resolved configuration after merging programmatic options, env vars, and defaults.
///
/// Priority (highest to lowest):
/// 1. Programmatic: values set in [`TelemetryOptions`]
/// 2. Environment variables: `OTEL_*`
/// 3. Defaults
#[derive(Debug, Clone)]
pub(crate) struct ResolvedConfig {
    pub service_name: String,
    pub service_version: String,
    pub service_namespace: Option<String>,
    pub host_name: Option<String>,
    pub endpoint: String,
    pub protocol: Protocol,
    pub insecure: bool,
    pub credentials: Option<(String, String)>,
    pub resource_attributes: HashMap<String, String>,
    pub verbosity: Verbosity,
    pub batch: BatchSettings,
    pub log_output: LogOutput,
    pub log_format: LogFormat,
    pub tracer_name: String,
    pub meter_name: String,
}

/// Resolve configuration by merging programmatic options, env vars, and defaults.
///
/// # Errors
///
/// Returns [`ConstructionError::Config`] if an environment value cannot be parsed
/// or the merged result is invalid.
pub(crate) fn resolve_config(
    service_name: &str,
    opts: &TelemetryOptions,
) -> Result<ResolvedConfig, ConstructionError> {
    let service_name =
        env_var_non_empty("OTEL_SERVICE_NAME").unwrap_or_else(|| service_name.to_owned());

    let service_version = opts
        .service_version
        .clone()
        .or_else(|| env_var_non_empty("OTEL_SERVICE_VERSION"))
        .unwrap_or_else(|| DEFAULT_SERVICE_VERSION.to_owned());

    let service_namespace = opts
        .service_namespace
        .clone()
        .or_else(|| env_var_non_empty("OTEL_SERVICE_NAMESPACE"))
        .filter(|ns| !ns.is_empty());

    let protocol = match opts.protocol {
        Some(protocol) => protocol,
        None => parse_env("OTEL_EXPORTER_OTLP_PROTOCOL", Protocol::parse)?
            .unwrap_or(Protocol::HttpProtobuf),
    };

    let default_endpoint = match protocol {
        Protocol::Grpc => DEFAULT_GRPC_ENDPOINT,
        Protocol::HttpProtobuf | Protocol::HttpJson => DEFAULT_HTTP_ENDPOINT,
    };

    let endpoint = opts
        .endpoint
        .clone()
        .or_else(|| env_var_non_empty("OTEL_EXPORTER_OTLP_ENDPOINT"))
        .unwrap_or_else(|| default_endpoint.to_owned());

    let insecure = match opts.insecure {
        Some(insecure) => insecure,
        None => parse_env("OTEL_EXPORTER_OTLP_INSECURE", parse_bool)?.unwrap_or(true),
    };

    let credentials = match opts.credentials.clone() {
        Some(creds) => Some(creds),
        None => match (
            env_var_non_empty("OTEL_EXPORTER_OTLP_USERNAME"),
            env_var_non_empty("OTEL_EXPORTER_OTLP_PASSWORD"),
        ) {
            (Some(user), Some(pass)) => Some((user, pass)),
            (None, None) => None,
            _ => {
                return Err(ConstructionError::Config(
                    "OTEL_EXPORTER_OTLP_USERNAME and OTEL_EXPORTER_OTLP_PASSWORD must be set together"
                        .to_owned(),
                ))
            }
        },
    };

    let verbosity = match opts.verbosity {
        Some(verbosity) => verbosity,
        None => parse_env("OTEL_LOG_VERBOSITY", |v| {
            v.parse::<u8>().ok().and_then(|n| Verbosity::try_from(n).ok())
        })?
        .unwrap_or_default(),
    };

    let batch = BatchSettings {
        max_queue_size: match opts.max_queue_size {
            Some(size) => size,
            None => parse_env("OTEL_MAX_QUEUE_SIZE", |v| v.parse().ok())?
                .unwrap_or(DEFAULT_MAX_QUEUE_SIZE),
        },
        batch_timeout: resolve_seconds(
            opts.batch_timeout,
            "OTEL_BATCH_TIMEOUT_SECONDS",
            DEFAULT_BATCH_TIMEOUT,
        )?,
        export_timeout: resolve_seconds(
            opts.export_timeout,
            "OTEL_EXPORT_TIMEOUT_SECONDS",
            DEFAULT_EXPORT_TIMEOUT,
        )?,
        export_interval: resolve_seconds(
            opts.export_interval,
            "OTEL_EXPORT_INTERVAL_SECONDS",
            DEFAULT_EXPORT_INTERVAL,
        )?,
        metric_export_interval: resolve_seconds(
            opts.metric_export_interval,
            "OTEL_METRIC_EXPORT_INTERVAL_SECONDS",
            DEFAULT_METRIC_EXPORT_INTERVAL,
        )?,
    };

    let log_output = match opts.log_output {
        Some(output) => output,
        None => parse_env("OTEL_LOG_OUTPUT", LogOutput::parse)?.unwrap_or(LogOutput::Stdout),
    };

    let log_format = match opts.log_format {
        Some(format) => format,
        None => parse_env("OTEL_LOG_FORMAT", LogFormat::parse)?.unwrap_or(LogFormat::Text),
    };

    let tracer_name = opts
        .tracer_name
        .clone()
        .unwrap_or_else(|| service_name.clone());
    let meter_name = opts
        .meter_name
        .clone()
        .unwrap_or_else(|| service_name.clone());

    let resolved = ResolvedConfig {
        service_name,
        service_version,
        service_namespace,
        host_name: env_var_non_empty("HOSTNAME"),
        endpoint,
        protocol,
        insecure,
        credentials,
        resource_attributes: opts.resource_attributes.clone(),
        verbosity,
        batch,
        log_output,
        log_format,
        tracer_name,
        meter_name,
    };
    resolved.validate()?;
    Ok(resolved)
}

impl ResolvedConfig {
    fn validate(&self) -> Result<(), ConstructionError> {
        let invalid = |msg: &str| Err(ConstructionError::Config(msg.to_owned()));

        if self.service_name.trim().is_empty() {
            return invalid("service name must not be empty");
        }
        if self.endpoint.trim().is_empty() {
            return invalid("OTLP endpoint must not be empty");
        }
        if self.batch.max_queue_size == 0 {
            return invalid("max queue size must be greater than zero");
        }
        let durations = [
            ("batch timeout", self.batch.batch_timeout),
            ("export timeout", self.batch.export_timeout),
            ("export interval", self.batch.export_interval),
            ("metric export interval", self.batch.metric_export_interval),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(ConstructionError::Config(format!(
                "{name} must be greater than zero"
            )));
        }
        if let Some((user, pass)) = &self.credentials {
            if user.is_empty() || pass.is_empty() {
                return invalid("basic auth username and password must both be non-empty");
            }
        }
        Ok(())
    }
}

fn env_var_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

/// Parse an env var, treating an unparseable value as a configuration error
/// rather than silently falling back.
fn parse_env<T>(
    key: &str,
    parse: impl FnOnce(&str) -> Option<T>,
) -> Result<Option<T>, ConstructionError> {
    match env_var_non_empty(key) {
        None => Ok(None),
        Some(raw) => parse(&raw)
            .map(Some)
            .ok_or_else(|| ConstructionError::Config(format!("invalid value for {key}: {raw:?}"))),
    }
}

fn resolve_seconds(
    programmatic: Option<Duration>,
    key: &str,
    default: Duration,
) -> Result<Duration, ConstructionError> {
    match programmatic {
        Some(d) => Ok(d),
        None => Ok(parse_env(key, |v| v.parse::<u64>().ok())?
            .map(Duration::from_secs)
            .unwrap_or(default)),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" => Some(true),
        "0" | "false" | "f" | "no" => Some(false),
        _ => None,
    }
}
