// crates/pep-replay-engine/src/lib.rs
// ============================================================================
// Module: PEP Replay Engine Library
// Description: mTLS transport, replay workers, dispatcher, and log sink.
// Purpose: Replay a scenario corpus against a decision engine concurrently.
// Dependencies: pep-replay-core, reqwest, rustls, serde_json, time
// ============================================================================

//! ## Overview
//! The engine sends every scenario of a [`pep_replay_core::ScenarioCorpus`]
//! to a policy decision endpoint over one shared mutually authenticated
//! transport. A [`Dispatcher`] runs `W` independent [`ReplayWorker`] passes
//! and joins them into a [`DispatchReport`]; per-request telemetry flows into
//! any [`pep_replay_core::TelemetrySink`], typically a [`LogSink`].
//!
//! Invariants:
//! - The transport is built once and never mutated afterward.
//! - Each worker issues at most one request at a time, in corpus order.
//! - Dispatch returns only after every started worker has finished.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod dispatcher;
pub mod sink;
pub mod transport;
pub mod worker;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use dispatcher::DispatchError;
pub use dispatcher::DispatchReport;
pub use dispatcher::Dispatcher;
pub use sink::LogSink;
pub use sink::SinkError;
pub use transport::DecisionReply;
pub use transport::DecisionTransport;
pub use transport::FailureKind;
pub use transport::MtlsTransport;
pub use transport::PoolLimits;
pub use transport::TransportCredentials;
pub use transport::TransportError;
pub use transport::TransportFailure;
pub use worker::OutcomeTally;
pub use worker::ReplayWorker;
pub use worker::WorkerFailure;
pub use worker::WorkerReport;
