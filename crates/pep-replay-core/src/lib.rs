// crates/pep-replay-core/src/lib.rs
// ============================================================================
// Module: PEP Replay Core Library
// Description: Scenario corpus, outcome classification, and telemetry model.
// Purpose: Provide the immutable data model shared by the replay engine.
// Dependencies: serde, serde_json, thiserror, time
// ============================================================================

//! ## Overview
//! PEP Replay Core defines the access-request scenarios replayed against a
//! decision engine, the closed mapping from HTTP status codes to
//! authorization outcomes, and the telemetry event contract that replay
//! workers produce. Everything in this crate is immutable once loaded and is
//! safe to share read-only across worker threads.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod outcome;
pub mod scenario;
pub mod telemetry;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use outcome::Outcome;
pub use scenario::Channel;
pub use scenario::CorpusLoadError;
pub use scenario::Device;
pub use scenario::DeviceFingerprint;
pub use scenario::DeviceHealth;
pub use scenario::Scenario;
pub use scenario::ScenarioCorpus;
pub use scenario::User;
pub use telemetry::LogDestination;
pub use telemetry::LogFormat;
pub use telemetry::LogLevel;
pub use telemetry::NoopSink;
pub use telemetry::TelemetryEvent;
pub use telemetry::TelemetrySink;
pub use telemetry::WorkerId;
