// crates/pep-replay-engine/src/dispatcher.rs
// ============================================================================
// Module: Replay Dispatcher
// Description: Fan-out of concurrent replay workers and join of their reports.
// Purpose: Run W independent passes over one corpus with one shared transport.
// Dependencies: pep-replay-core, thiserror, url
// ============================================================================

//! ## Overview
//! [`Dispatcher::dispatch`] starts `W` named worker threads, each replaying
//! the whole corpus, and returns only after every worker has finished. Workers
//! share the transport, corpus, target, and sink by reference through a thread
//! scope, so nothing is cloned per worker and nothing outlives the call.
//! Aggregation happens after the join; workers never share mutable state.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::num::NonZeroUsize;
use std::thread;
use std::time::Duration;

use pep_replay_core::ScenarioCorpus;
use pep_replay_core::TelemetrySink;
use pep_replay_core::WorkerId;
use thiserror::Error;
use url::Url;

use crate::transport::DecisionTransport;
use crate::worker::OutcomeTally;
use crate::worker::ReplayWorker;
use crate::worker::WorkerFailure;
use crate::worker::WorkerReport;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors that end a dispatch before every worker produced a report.
///
/// Reports of the workers that did finish travel with the error.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Worker count does not fit a worker identifier.
    #[error("worker count does not fit a worker identifier")]
    TooManyWorkers,
    /// A worker thread could not be started.
    #[error("failed to spawn replay worker: {message}")]
    Spawn {
        /// Spawn failure detail.
        message: String,
        /// Reports of the workers started before the failure.
        partial: DispatchReport,
    },
    /// A worker thread panicked.
    #[error("replay worker {worker} panicked")]
    WorkerPanicked {
        /// Lowest-numbered worker that panicked.
        worker: WorkerId,
        /// Reports of the workers that finished.
        partial: DispatchReport,
    },
}

impl DispatchError {
    /// Returns the reports of workers that finished, if any ran.
    #[must_use]
    pub const fn partial_report(&self) -> Option<&DispatchReport> {
        match self {
            Self::TooManyWorkers => None,
            Self::Spawn {
                partial, ..
            }
            | Self::WorkerPanicked {
                partial, ..
            } => Some(partial),
        }
    }
}

// ============================================================================
// SECTION: Report
// ============================================================================

/// Joined results of every worker, ordered by worker id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Per-worker reports.
    workers: Vec<WorkerReport>,
}

impl DispatchReport {
    /// Returns per-worker reports in worker-id order.
    #[must_use]
    pub fn workers(&self) -> &[WorkerReport] {
        &self.workers
    }

    /// Returns the number of answered requests across all workers.
    #[must_use]
    pub fn total_decisions(&self) -> usize {
        self.workers.iter().map(|report| report.durations.len()).sum()
    }

    /// Returns the outcome counts across all workers.
    #[must_use]
    pub fn tally(&self) -> OutcomeTally {
        let mut tally = OutcomeTally::default();
        for report in &self.workers {
            tally.merge(report.tally);
        }
        tally
    }

    /// Returns every worker failure with its worker id.
    pub fn failures(&self) -> impl Iterator<Item = (WorkerId, &WorkerFailure)> {
        self.workers
            .iter()
            .filter_map(|report| report.failure.as_ref().map(|failure| (report.worker_id, failure)))
    }

    /// Returns the failure of the lowest-numbered failed worker.
    #[must_use]
    pub fn first_failure(&self) -> Option<(WorkerId, &WorkerFailure)> {
        self.failures().next()
    }

    /// Returns true when any worker ended early.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.first_failure().is_some()
    }

    /// Returns the mean latency of answered requests.
    #[must_use]
    pub fn mean_latency(&self) -> Option<Duration> {
        let count = self.total_decisions();
        if count == 0 {
            return None;
        }
        let total: u128 = self
            .workers
            .iter()
            .flat_map(|report| report.durations.iter())
            .map(Duration::as_nanos)
            .sum();
        let mean = total / u128::try_from(count).unwrap_or(u128::MAX);
        Some(Duration::from_nanos(u64::try_from(mean).unwrap_or(u64::MAX)))
    }
}

// ============================================================================
// SECTION: Dispatcher
// ============================================================================

/// Shared inputs of one replay run.
pub struct Dispatcher<'a, T: ?Sized, S: ?Sized> {
    /// Shared decision transport.
    transport: &'a T,
    /// Scenario corpus replayed by every worker.
    corpus: &'a ScenarioCorpus,
    /// Decision endpoint.
    target: &'a Url,
    /// Telemetry receiver.
    sink: &'a S,
}

impl<'a, T, S> Dispatcher<'a, T, S>
where
    T: DecisionTransport + ?Sized,
    S: TelemetrySink + ?Sized,
{
    /// Creates a dispatcher over shared, read-only inputs.
    #[must_use]
    pub const fn new(
        transport: &'a T,
        corpus: &'a ScenarioCorpus,
        target: &'a Url,
        sink: &'a S,
    ) -> Self {
        Self {
            transport,
            corpus,
            target,
            sink,
        }
    }

    /// Runs `workers` concurrent replays and waits for all of them.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] when a worker cannot be started or panics.
    /// Already started workers are still joined before returning, and the
    /// reports of those that finished are kept on the error.
    pub fn dispatch(&self, workers: NonZeroUsize) -> Result<DispatchReport, DispatchError> {
        let count = u32::try_from(workers.get()).map_err(|_| DispatchError::TooManyWorkers)?;
        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers.get());
            let mut spawn_error = None;
            for raw in 1..=count {
                let id = WorkerId::new(raw);
                let worker = ReplayWorker::new(id, self.transport, self.corpus, self.target, self.sink);
                let spawned = thread::Builder::new()
                    .name(format!("replay-worker-{id}"))
                    .spawn_scoped(scope, move || worker.run());
                match spawned {
                    Ok(handle) => handles.push((id, handle)),
                    Err(err) => {
                        spawn_error = Some(err.to_string());
                        break;
                    }
                }
            }
            let mut reports = Vec::with_capacity(handles.len());
            let mut panicked = None;
            for (id, handle) in handles {
                match handle.join() {
                    Ok(report) => reports.push(report),
                    Err(_) => {
                        panicked.get_or_insert(id);
                    }
                }
            }
            let partial = DispatchReport {
                workers: reports,
            };
            match (spawn_error, panicked) {
                (Some(message), _) => Err(DispatchError::Spawn {
                    message,
                    partial,
                }),
                (None, Some(worker)) => Err(DispatchError::WorkerPanicked {
                    worker,
                    partial,
                }),
                (None, None) => Ok(partial),
            }
        })
    }
}
