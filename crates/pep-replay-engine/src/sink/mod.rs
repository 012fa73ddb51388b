// crates/pep-replay-engine/src/sink/mod.rs
// ============================================================================
// Module: Telemetry Sinks
// Description: Telemetry sink implementations for replay runs.
// Purpose: Turn decision events into durable log records.
// Dependencies: serde_json, thiserror, time
// ============================================================================

//! ## Overview
//! Sinks receive [`pep_replay_core::TelemetryEvent`] values from every worker
//! concurrently. [`LogSink`] is the structured logger used by the CLI for
//! both per-decision telemetry and run diagnostics.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod log;

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use self::log::LogSink;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while writing telemetry.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Log record could not be encoded or written.
    #[error("log write failed: {0}")]
    LogWriteFailed(String),
}
