// crates/pep-replay-engine/src/sink/log.rs
// ============================================================================
// Module: Structured Log Sink
// Description: Leveled JSON or key=value log records on any writer.
// Purpose: Record decision telemetry and run diagnostics.
// Dependencies: pep-replay-core, serde_json, time
// ============================================================================

//! ## Overview
//! `LogSink` writes one record per line. JSON records carry the event fields
//! plus `level`, `msg`, and `time`; text records render
//! `time="…" level=info msg="…"` followed by the fields sorted by key.
//! Records below the configured level are dropped. Writes from concurrent
//! workers are serialized through one mutex, so lines never interleave.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io;
use std::io::LineWriter;
use std::io::Write;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use pep_replay_core::LogDestination;
use pep_replay_core::LogFormat;
use pep_replay_core::LogLevel;
use pep_replay_core::Outcome;
use pep_replay_core::TelemetryEvent;
use pep_replay_core::TelemetrySink;
use pep_replay_core::outcome::STATUS_DENIED;
use pep_replay_core::outcome::STATUS_GRANTED;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::sink::SinkError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Message of a decision record.
pub const DECISION_MESSAGE: &str = "decision request";
/// Keys reserved for record metadata.
const RESERVED_KEYS: [&str; 3] = ["level", "msg", "time"];

// ============================================================================
// SECTION: Log Sink
// ============================================================================

/// Leveled structured logger.
pub struct LogSink<W: Write + Send> {
    /// Output writer for log records.
    writer: Mutex<W>,
    /// Minimum level written.
    level: LogLevel,
    /// Record encoding.
    format: LogFormat,
    /// Telemetry records that could not be written.
    dropped: AtomicUsize,
}

impl LogSink<Box<dyn Write + Send>> {
    /// Opens a sink on stdout or on a file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the log file cannot be opened.
    pub fn open(
        destination: &LogDestination,
        level: LogLevel,
        format: LogFormat,
    ) -> io::Result<Self> {
        let writer: Box<dyn Write + Send> = match destination {
            LogDestination::Stdout => Box::new(io::stdout()),
            LogDestination::File(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Box::new(LineWriter::new(file))
            }
        };
        Ok(Self::new(writer, level, format))
    }
}

impl<W: Write + Send> LogSink<W> {
    /// Creates a sink on `writer`.
    pub fn new(writer: W, level: LogLevel, format: LogFormat) -> Self {
        Self {
            writer: Mutex::new(writer),
            level,
            format,
            dropped: AtomicUsize::new(0),
        }
    }

    /// Returns the minimum level written.
    #[must_use]
    pub const fn level(&self) -> LogLevel {
        self.level
    }

    /// Returns the number of telemetry records that failed to write.
    #[must_use]
    pub fn dropped_records(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Writes one record when `level` passes the configured threshold.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::LogWriteFailed`] when the record cannot be written.
    pub fn log(
        &self,
        level: LogLevel,
        message: &str,
        fields: &[(&str, Value)],
    ) -> Result<(), SinkError> {
        if !level.is_enabled_at(self.level) {
            return Ok(());
        }
        let time = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
        let mut line = match self.format {
            LogFormat::Json => json_record(&time, level, message, fields)?,
            LogFormat::Text => text_record(&time, level, message, fields),
        };
        line.push('\n');
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| SinkError::LogWriteFailed("log writer mutex poisoned".to_string()))?;
        guard
            .write_all(line.as_bytes())
            .map_err(|err| SinkError::LogWriteFailed(err.to_string()))?;
        drop(guard);
        Ok(())
    }

    /// Flushes buffered records.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::LogWriteFailed`] when the writer cannot flush.
    pub fn flush(&self) -> Result<(), SinkError> {
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| SinkError::LogWriteFailed("log writer mutex poisoned".to_string()))?;
        guard.flush().map_err(|err| SinkError::LogWriteFailed(err.to_string()))
    }

    /// Writes a telemetry record, counting failures instead of returning them.
    fn log_event(&self, level: LogLevel, message: &str, fields: &[(&str, Value)]) {
        if self.log(level, message, fields).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl<W: Write + Send> TelemetrySink for LogSink<W> {
    fn record_decision(&self, event: &TelemetryEvent) {
        self.log_event(LogLevel::Info, DECISION_MESSAGE, &event_fields(event));
    }

    fn record_unexpected(&self, event: &TelemetryEvent) {
        let mut fields = event_fields(event);
        let status = match event.outcome {
            Outcome::Granted => STATUS_GRANTED,
            Outcome::Denied => STATUS_DENIED,
            Outcome::Unexpected(code) => code,
        };
        fields.push(("status", json!(status)));
        self.log_event(
            LogLevel::Error,
            &format!("unexpected response status code: {status}"),
            &fields,
        );
    }
}

// ============================================================================
// SECTION: Record Encoding
// ============================================================================

/// Fields shared by every telemetry record.
fn event_fields(event: &TelemetryEvent) -> Vec<(&'static str, Value)> {
    vec![
        ("scenario", json!(event.scenario_id)),
        ("service", Value::String(event.service.clone())),
        ("action", Value::String(event.action.clone())),
        ("access_time", Value::String(event.access_time.format(&Rfc3339).unwrap_or_default())),
        ("decision_latency_ms", json!(event.latency.as_secs_f64() * 1_000.0)),
        ("worker", json!(event.worker_id.get())),
        ("authorization_decision", Value::String(event.outcome.label().into_owned())),
    ]
}

/// Renders a JSON record.
fn json_record(
    time: &str,
    level: LogLevel,
    message: &str,
    fields: &[(&str, Value)],
) -> Result<String, SinkError> {
    let mut record = Map::new();
    for (key, value) in fields {
        record.insert(field_key(key), value.clone());
    }
    record.insert("level".to_string(), Value::String(level.as_str().to_string()));
    record.insert("msg".to_string(), Value::String(message.to_string()));
    record.insert("time".to_string(), Value::String(time.to_string()));
    serde_json::to_string(&record).map_err(|err| SinkError::LogWriteFailed(err.to_string()))
}

/// Renders a `key=value` record with fields sorted by key.
fn text_record(time: &str, level: LogLevel, message: &str, fields: &[(&str, Value)]) -> String {
    let mut line = format!(
        "time={} level={} msg={}",
        quote_text(time),
        level.as_str(),
        quote_text(message)
    );
    let mut sorted: Vec<(String, &Value)> =
        fields.iter().map(|(key, value)| (field_key(key), value)).collect();
    sorted.sort_by(|left, right| left.0.cmp(&right.0));
    for (key, value) in sorted {
        let rendered = match value {
            Value::String(text) => quote_text(text),
            other => other.to_string(),
        };
        let _ = write!(line, " {key}={rendered}");
    }
    line
}

/// Prefixes field keys that collide with record metadata.
fn field_key(key: &str) -> String {
    if RESERVED_KEYS.contains(&key) { format!("fields.{key}") } else { key.to_string() }
}

/// Quotes a text value unless it is a plain token.
fn quote_text(value: &str) -> String {
    let plain = !value.is_empty()
        && value.chars().all(|ch| ch.is_ascii_alphanumeric() || "-._/@^+".contains(ch));
    if plain {
        value.to_string()
    } else {
        Value::String(value.to_string()).to_string()
    }
}
