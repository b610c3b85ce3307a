//! Error types for construction, log delivery and shutdown.

use std::fmt;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Telemetry signal kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Traces,
    Metrics,
    Logs,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Signal::Traces => "traces",
            Signal::Metrics => "metrics",
            Signal::Logs => "logs",
        })
    }
}

/// Failure while building the telemetry pipeline. Always fatal for startup.
#[derive(Debug, thiserror::Error)]
pub enum ConstructionError {
    #[error("invalid telemetry configuration: {0}")]
    Config(String),

    #[error("failed to build resource: {0}")]
    Resource(String),

    #[error("failed to open OTLP transport to {endpoint}")]
    Transport {
        endpoint: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to build OTLP {signal} exporter")]
    Exporter {
        signal: Signal,
        #[source]
        source: BoxError,
    },

    #[error("{signal} export over {protocol} requested but the `{feature}` feature is not enabled")]
    FeatureDisabled {
        signal: Signal,
        protocol: &'static str,
        feature: &'static str,
    },

    #[error("failed to set global tracing subscriber: {0}")]
    Subscriber(String),
}

impl ConstructionError {
    pub(crate) fn exporter(signal: Signal, source: impl Into<BoxError>) -> Self {
        Self::Exporter {
            signal,
            source: source.into(),
        }
    }
}

/// Failure delivering a record to a log sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink {sink}: write failed")]
    Write {
        sink: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("sink {sink}: encoding failed")]
    Encode {
        sink: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{} sink(s) failed: {}", .0.len(), join(.0))]
    Fanout(Vec<SinkError>),
}

/// Why a single teardown step failed.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("the step panicked")]
    Panicked,

    #[error(transparent)]
    Failed(BoxError),
}

/// One failed teardown step.
#[derive(Debug, thiserror::Error)]
#[error("{step}: {cause}")]
pub struct StepFailure {
    pub step: &'static str,
    #[source]
    pub cause: StepError,
}

/// Every teardown failure of one shutdown (or flush) run.
#[derive(Debug, thiserror::Error)]
#[error("telemetry shutdown failed: {}", join(.failures))]
pub struct ShutdownError {
    pub failures: Vec<StepFailure>,
}

impl ShutdownError {
    /// Names of the failed steps, in the order they ran.
    pub fn failed_steps(&self) -> Vec<&'static str> {
        self.failures.iter().map(|f| f.step).collect()
    }
}

fn join<E: fmt::Display>(errors: &[E]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
