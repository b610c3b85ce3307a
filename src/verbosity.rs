use std::fmt;
use std::sync::{PoisonError, RwLock};

/// Severity of a log call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

impl Severity {
    /// Parse a severity name. Unrecognized names map to [`Severity::Info`], so they are
    /// gated at the most verbose threshold.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "error" => Severity::Error,
            "warn" | "warning" => Severity::Warn,
            "debug" => Severity::Debug,
            _ => Severity::Info,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }

    /// Lowest verbosity at which records of this severity are emitted.
    fn min_verbosity(self) -> Verbosity {
        match self {
            Severity::Error => Verbosity::Errors,
            Severity::Warn => Verbosity::Warnings,
            Severity::Info | Severity::Debug => Verbosity::Verbose,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log verbosity threshold, `0..=2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum Verbosity {
    /// 0: errors only.
    Errors = 0,
    /// 1: errors and warnings.
    #[default]
    Warnings = 1,
    /// 2: everything.
    Verbose = 2,
}

impl Verbosity {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Returned when a verbosity outside `0..=2` is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("log verbosity must be 0, 1 or 2, got {0}")]
pub struct InvalidVerbosity(pub u8);

impl TryFrom<u8> for Verbosity {
    type Error = InvalidVerbosity;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Verbosity::Errors),
            1 => Ok(Verbosity::Warnings),
            2 => Ok(Verbosity::Verbose),
            other => Err(InvalidVerbosity(other)),
        }
    }
}

/// Process-wide verbosity threshold consulted before every log record is built.
///
/// Constructed once and shared (behind an `Arc`) with every component that logs.
/// Each access takes the lock for a single load or store.
#[derive(Debug, Default)]
pub struct VerbosityGate {
    level: RwLock<Verbosity>,
}

impl VerbosityGate {
    pub fn new(level: Verbosity) -> Self {
        Self {
            level: RwLock::new(level),
        }
    }

    pub fn level(&self) -> Verbosity {
        *self.level.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_level(&self, level: Verbosity) {
        *self.level.write().unwrap_or_else(PoisonError::into_inner) = level;
    }

    pub fn should_emit(&self, severity: Severity) -> bool {
        self.level() >= severity.min_verbosity()
    }
}
