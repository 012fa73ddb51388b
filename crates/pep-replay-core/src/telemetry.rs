// crates/pep-replay-core/src/telemetry.rs
// ============================================================================
// Module: Replay Telemetry
// Description: Decision events and the sink contract workers report into.
// Purpose: Keep event production separate from formatting and persistence.
// Dependencies: time
// ============================================================================

//! ## Overview
//! Replay workers emit exactly one [`TelemetryEvent`] per answered request.
//! Sinks decide how events are formatted and where they go; workers only
//! choose between the decision and unexpected-status channels. This module
//! also defines the logging vocabulary (level, format, destination) shared by
//! configuration and the log sink.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use time::OffsetDateTime;

use crate::Outcome;

// ============================================================================
// SECTION: Worker Identity
// ============================================================================

/// One-based replay worker identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId(u32);

impl WorkerId {
    /// Creates a worker identifier.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// SECTION: Events
// ============================================================================

/// Telemetry for one answered decision request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryEvent {
    /// Scenario identifier.
    pub scenario_id: i64,
    /// Target service of the scenario.
    pub service: String,
    /// Requested action of the scenario.
    pub action: String,
    /// Access time recorded in the scenario.
    pub access_time: OffsetDateTime,
    /// Round-trip latency of the decision request.
    pub latency: Duration,
    /// Worker that issued the request.
    pub worker_id: WorkerId,
    /// Classified outcome.
    pub outcome: Outcome,
}

/// Receiver of replay telemetry.
///
/// Implementations must tolerate concurrent calls from every worker.
pub trait TelemetrySink: Send + Sync {
    /// Records a granted or denied decision.
    fn record_decision(&self, event: &TelemetryEvent);

    /// Records a response whose status was neither granted nor denied.
    fn record_unexpected(&self, event: &TelemetryEvent);
}

/// Sink that discards every event.
pub struct NoopSink;

impl TelemetrySink for NoopSink {
    fn record_decision(&self, _event: &TelemetryEvent) {}

    fn record_unexpected(&self, _event: &TelemetryEvent) {}
}

// ============================================================================
// SECTION: Logging Vocabulary
// ============================================================================

/// Log severity, ordered from most verbose to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum LogLevel {
    /// Finest-grained tracing.
    Trace,
    /// Diagnostic detail.
    Debug,
    /// Normal operation.
    #[default]
    Info,
    /// Recoverable anomalies.
    Warn,
    /// Failed operations.
    Error,
    /// Failures that end the process.
    Fatal,
    /// Highest severity.
    Panic,
}

impl LogLevel {
    /// Returns the lowercase label used in log records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warning",
            Self::Error => "error",
            Self::Fatal => "fatal",
            Self::Panic => "panic",
        }
    }

    /// Returns true when a record at this level passes the `threshold`.
    #[must_use]
    pub fn is_enabled_at(self, threshold: Self) -> bool {
        self >= threshold
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "fatal" => Ok(Self::Fatal),
            "panic" => Ok(Self::Panic),
            _ => Err(format!("unknown logging level '{value}'")),
        }
    }
}

/// Log record encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// `key=value` pairs per line.
    Text,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "json" => Ok(Self::Json),
            "text" => Ok(Self::Text),
            _ => Err(format!("unknown logger formatter '{value}'")),
        }
    }
}

/// Where log records are written.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum LogDestination {
    /// Process standard output.
    #[default]
    Stdout,
    /// File opened in append mode.
    File(PathBuf),
}

impl From<&str> for LogDestination {
    fn from(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("stdout") {
            Self::Stdout
        } else {
            Self::File(PathBuf::from(trimmed))
        }
    }
}

impl fmt::Display for LogDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}
