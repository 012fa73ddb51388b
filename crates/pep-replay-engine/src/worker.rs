// crates/pep-replay-engine/src/worker.rs
// ============================================================================
// Module: Replay Worker
// Description: Sequential replay of the scenario corpus over a shared transport.
// Purpose: Turn each scenario into one decision request and one telemetry event.
// Dependencies: pep-replay-core, thiserror, url
// ============================================================================

//! ## Overview
//! A [`ReplayWorker`] walks the corpus in order, one request at a time. Each
//! answered request yields exactly one telemetry event. The first scenario
//! that cannot be encoded or sent ends the worker; later scenarios are not
//! attempted and sibling workers are unaffected.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;
use std::time::Instant;

use pep_replay_core::Outcome;
use pep_replay_core::Scenario;
use pep_replay_core::ScenarioCorpus;
use pep_replay_core::TelemetryEvent;
use pep_replay_core::TelemetrySink;
use pep_replay_core::WorkerId;
use thiserror::Error;
use url::Url;

use crate::transport::DecisionTransport;
use crate::transport::TransportFailure;

// ============================================================================
// SECTION: Outcomes
// ============================================================================

/// Error that ended a worker before the corpus was exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerFailure {
    /// Scenario could not be serialized into a request body.
    #[error("scenario {scenario_id} could not be encoded: {message}")]
    Encode {
        /// Scenario that failed.
        scenario_id: i64,
        /// Encoder error detail.
        message: String,
    },
    /// Decision request produced no response.
    #[error("scenario {scenario_id} request failed: {failure}")]
    Transport {
        /// Scenario that failed.
        scenario_id: i64,
        /// Transport failure detail.
        failure: TransportFailure,
    },
}

impl WorkerFailure {
    /// Returns the scenario that ended the worker.
    #[must_use]
    pub const fn scenario_id(&self) -> i64 {
        match self {
            Self::Encode {
                scenario_id, ..
            }
            | Self::Transport {
                scenario_id, ..
            } => *scenario_id,
        }
    }
}

/// Outcome counts of one worker or a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeTally {
    /// Requests answered with 200.
    pub granted: usize,
    /// Requests answered with 401.
    pub denied: usize,
    /// Requests answered with any other status.
    pub unexpected: usize,
}

impl OutcomeTally {
    /// Counts one outcome.
    pub const fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Granted => self.granted += 1,
            Outcome::Denied => self.denied += 1,
            Outcome::Unexpected(_) => self.unexpected += 1,
        }
    }

    /// Returns the number of answered requests.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.granted + self.denied + self.unexpected
    }

    /// Adds another tally into this one.
    pub const fn merge(&mut self, other: Self) {
        self.granted += other.granted;
        self.denied += other.denied;
        self.unexpected += other.unexpected;
    }
}

/// Result of one worker's pass over the corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    /// Worker identifier.
    pub worker_id: WorkerId,
    /// Latency of every answered request, in corpus order.
    pub durations: Vec<Duration>,
    /// Outcome counts.
    pub tally: OutcomeTally,
    /// Error that ended the worker early, if any.
    pub failure: Option<WorkerFailure>,
}

// ============================================================================
// SECTION: Jobs
// ============================================================================

/// Encoded scenario ready to be sent.
struct ReplayJob {
    /// JSON request body.
    body: Vec<u8>,
}

impl ReplayJob {
    /// Encodes a scenario.
    fn encode(scenario: &Scenario) -> Result<Self, WorkerFailure> {
        let body = scenario.to_request_body().map_err(|err| WorkerFailure::Encode {
            scenario_id: scenario.id,
            message: err.to_string(),
        })?;
        Ok(Self {
            body,
        })
    }
}

// ============================================================================
// SECTION: Worker
// ============================================================================

/// One sequential replay of the corpus.
pub struct ReplayWorker<'a, T: ?Sized, S: ?Sized> {
    /// Worker identifier.
    id: WorkerId,
    /// Shared decision transport.
    transport: &'a T,
    /// Shared scenario corpus.
    corpus: &'a ScenarioCorpus,
    /// Decision endpoint.
    target: &'a Url,
    /// Telemetry receiver.
    sink: &'a S,
}

impl<'a, T, S> ReplayWorker<'a, T, S>
where
    T: DecisionTransport + ?Sized,
    S: TelemetrySink + ?Sized,
{
    /// Creates a worker over shared, read-only inputs.
    #[must_use]
    pub const fn new(
        id: WorkerId,
        transport: &'a T,
        corpus: &'a ScenarioCorpus,
        target: &'a Url,
        sink: &'a S,
    ) -> Self {
        Self {
            id,
            transport,
            corpus,
            target,
            sink,
        }
    }

    /// Replays every scenario in order, stopping at the first failure.
    #[must_use]
    pub fn run(self) -> WorkerReport {
        let mut report = WorkerReport {
            worker_id: self.id,
            durations: Vec::with_capacity(self.corpus.len()),
            tally: OutcomeTally::default(),
            failure: None,
        };
        for scenario in self.corpus {
            match self.replay_one(scenario) {
                Ok(event) => {
                    report.durations.push(event.latency);
                    report.tally.record(event.outcome);
                }
                Err(failure) => {
                    report.failure = Some(failure);
                    break;
                }
            }
        }
        report
    }

    /// Sends one scenario and records its telemetry.
    fn replay_one(&self, scenario: &Scenario) -> Result<TelemetryEvent, WorkerFailure> {
        let job = ReplayJob::encode(scenario)?;
        let started = Instant::now();
        let reply = self.transport.post_decision(self.target, job.body).map_err(|failure| {
            WorkerFailure::Transport {
                scenario_id: scenario.id,
                failure,
            }
        })?;
        let event = TelemetryEvent {
            scenario_id: scenario.id,
            service: scenario.service.clone(),
            action: scenario.action.clone(),
            access_time: scenario.access_time,
            latency: reply.received_at.saturating_duration_since(started),
            worker_id: self.id,
            outcome: Outcome::from_status(reply.status),
        };
        if event.outcome.is_unexpected() {
            self.sink.record_unexpected(&event);
        } else {
            self.sink.record_decision(&event);
        }
        Ok(event)
    }
}
