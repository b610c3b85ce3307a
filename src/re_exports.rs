//! OpenTelemetry types that appear in this crate's public API.
//!
//! Lets applications create contexts, attributes and spans for
//! [`TelemetryHandle`](crate::TelemetryHandle) without adding `opentelemetry`
//! to their own `Cargo.toml`.

pub use opentelemetry::metrics::Counter;
pub use opentelemetry::trace::{Span, Status, TraceContextExt};
pub use opentelemetry::{Context, KeyValue};

/// Re-export of `tracing_opentelemetry` for span context extensions.
pub use tracing_opentelemetry;
