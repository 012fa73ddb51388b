// crates/pep-replay-cli/src/main.rs
// ============================================================================
// Module: PEP Replay CLI Entry Point
// Description: Load config and scenarios, then replay them over mutual TLS.
// Purpose: Drive load-replay runs against a policy decision engine.
// Dependencies: clap, pep-replay-config, pep-replay-core, pep-replay-engine, tokio
// ============================================================================

//! ## Overview
//! `pep-replay` loads the YAML configuration, opens the structured logger,
//! reads the scenario corpus, builds the shared mTLS transport, and runs
//! `-n` concurrent replay workers. Telemetry for every decision goes to the
//! configured log destination; fatal startup errors go to stderr and end the
//! process with a failure exit code.
//!
//! The replay itself runs on a blocking task raced against Ctrl-C and, on
//! Unix, SIGTERM. An interrupt flushes the log and exits successfully without
//! waiting for in-flight requests.

// ============================================================================
// SECTION: Modules
// ============================================================================


// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::ArgAction;
use clap::Parser;
use pep_replay_config::DEFAULT_CONFIG_PATH;
use pep_replay_config::ReplayConfig;
use pep_replay_config::WorkerFailureExit;
use pep_replay_core::LogDestination;
use pep_replay_core::LogLevel;
use pep_replay_core::ScenarioCorpus;
use pep_replay_engine::DispatchReport;
use pep_replay_engine::Dispatcher;
use pep_replay_engine::LogSink;
use pep_replay_engine::MtlsTransport;
use pep_replay_engine::TransportCredentials;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
#[cfg(unix)]
use tokio::signal::unix::Signal;
#[cfg(unix)]
use tokio::signal::unix::SignalKind;
use url::Url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default scenario corpus path.
const DEFAULT_DATA_PATH: &str = "./scenarios/data.json";

// ============================================================================
// SECTION: CLI Definitions
// ============================================================================

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "pep-replay",
    about = "Replay access-request scenarios against a policy decision engine over mutual TLS",
    version
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short = 'c', long = "config", value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Path to the JSON scenario corpus.
    #[arg(short = 'd', long = "data", value_name = "PATH", default_value = DEFAULT_DATA_PATH)]
    data: PathBuf,
    /// Log destination overriding the configuration (`stdout` or a file path).
    #[arg(long = "log", value_name = "DESTINATION")]
    log: Option<String>,
    /// Number of concurrent replay workers.
    #[arg(short = 'n', long = "workers", value_name = "COUNT", default_value_t = NonZeroUsize::MIN)]
    workers: NonZeroUsize,
    /// Exit with a failure code when any worker stops early.
    #[arg(long = "fail-on-worker-error", action = ArgAction::SetTrue)]
    fail_on_worker_error: bool,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Fatal CLI error reported on stderr.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

/// Logger used for telemetry and run diagnostics.
type RunSink = LogSink<Box<dyn Write + Send>>;

/// How a replay run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunOutcome {
    /// Every worker was joined.
    Completed {
        /// True when the exit policy fails the run.
        failed: bool,
    },
    /// A shutdown signal arrived before the workers finished.
    Interrupted,
}

/// Signals that end a replay early.
struct ShutdownSignals {
    /// SIGTERM stream, absent when it could not be registered.
    #[cfg(unix)]
    terminate: Option<Signal>,
}

impl ShutdownSignals {
    /// Registers the signal handlers; must run inside the runtime.
    fn register() -> Self {
        Self {
            #[cfg(unix)]
            terminate: tokio::signal::unix::signal(SignalKind::terminate()).ok(),
        }
    }

    /// Resolves with the name of the first signal received, or `None` when
    /// Ctrl-C cannot be observed.
    #[cfg(unix)]
    async fn recv(&mut self) -> Option<&'static str> {
        let terminate = async {
            match self.terminate.as_mut() {
                Some(stream) => stream.recv().await,
                None => std::future::pending::<Option<()>>().await,
            }
        };
        tokio::select! {
            signal = tokio::signal::ctrl_c() => signal.ok().map(|()| "SIGINT"),
            received = terminate => received.map(|()| "SIGTERM"),
        }
    }

    /// Resolves with the name of the first signal received, or `None` when
    /// Ctrl-C cannot be observed.
    #[cfg(not(unix))]
    async fn recv(&mut self) -> Option<&'static str> {
        tokio::signal::ctrl_c().await.ok().map(|()| "SIGINT")
    }
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    let cli = Cli::parse();
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => return emit_error(&format!("failed to start runtime: {err}")),
    };
    let outcome = runtime.block_on(run(cli));
    // Interrupted workers are abandoned, not joined.
    runtime.shutdown_background();
    match outcome {
        Ok(RunOutcome::Completed {
            failed: false,
        }
        | RunOutcome::Interrupted) => ExitCode::SUCCESS,
        Ok(RunOutcome::Completed {
            failed: true,
        }) => ExitCode::FAILURE,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Loads inputs in order and runs the replay.
async fn run(cli: Cli) -> CliResult<RunOutcome> {
    let config = ReplayConfig::load(&cli.config).map_err(|err| CliError::new(err.to_string()))?;
    let config = apply_overrides(config, &cli);
    let sink: Arc<RunSink> = Arc::new(
        LogSink::open(&config.logger.destination, config.logger.level, config.logger.format)
            .map_err(|err| {
                CliError::new(format!(
                    "unable to open log destination '{}': {err}",
                    config.logger.destination
                ))
            })?,
    );
    log(&sink, LogLevel::Debug, "configuration loaded", &[(
        "config",
        json!(cli.config.display().to_string()),
    )])?;

    let corpus = ScenarioCorpus::load(&cli.data).map_err(|err| CliError::new(err.to_string()))?;
    log(&sink, LogLevel::Debug, "scenarios loaded", &[("count", json!(corpus.len()))])?;

    let credentials = TransportCredentials::new(
        &config.identity.cert_path,
        &config.identity.key_path,
        config.client_trust_anchors().to_vec(),
    )
    .with_configured_cas(&config.ca_cert_paths);
    let mut signals = ShutdownSignals::register();
    let mut replay = tokio::task::spawn_blocking({
        let sink = Arc::clone(&sink);
        let target = config.target.clone();
        let workers = cli.workers;
        move || replay_blocking(&credentials, &corpus, &target, &sink, workers)
    });

    let interrupted = tokio::select! {
        joined = &mut replay => {
            return finish(joined, &sink, config.worker_failure_exit);
        }
        signal = signals.recv() => signal,
    };
    let Some(signal) = interrupted else {
        return finish(replay.await, &sink, config.worker_failure_exit);
    };
    log(&sink, LogLevel::Debug, "replay interrupted", &[("signal", json!(signal))])?;
    sink.flush().map_err(|err| CliError::new(err.to_string()))?;
    Ok(RunOutcome::Interrupted)
}

/// Builds the transport and dispatches workers on a blocking thread.
fn replay_blocking(
    credentials: &TransportCredentials,
    corpus: &ScenarioCorpus,
    target: &Url,
    sink: &RunSink,
    workers: NonZeroUsize,
) -> CliResult<DispatchReport> {
    let transport =
        MtlsTransport::build(credentials).map_err(|err| CliError::new(err.to_string()))?;
    log(sink, LogLevel::Debug, "CA certificates loaded", &[
        ("trusted_ca_files", json!(credentials.ca_paths.len())),
        ("checked_ca_files", json!(credentials.checked_ca_paths.len())),
    ])?;
    match Dispatcher::new(&transport, corpus, target, sink).dispatch(workers) {
        Ok(report) => Ok(report),
        Err(err) => {
            if let Some(partial) = err.partial_report() {
                log_report(sink, "partial replay results", partial)?;
            }
            Err(CliError::new(err.to_string()))
        }
    }
}

/// Logs worker failures and the run summary, then applies the exit policy.
fn finish(
    joined: Result<CliResult<DispatchReport>, tokio::task::JoinError>,
    sink: &RunSink,
    policy: WorkerFailureExit,
) -> CliResult<RunOutcome> {
    let report =
        joined.map_err(|err| CliError::new(format!("replay task failed: {err}")))??;
    log_report(sink, "replay finished", &report)?;
    Ok(RunOutcome::Completed {
        failed: policy.fails_run(report.has_failures()),
    })
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Logs one record per failed worker and a summary, then flushes.
fn log_report(sink: &RunSink, summary: &str, report: &DispatchReport) -> CliResult<()> {
    for fields in worker_failure_fields(report) {
        log(sink, LogLevel::Error, "replay worker stopped", &fields)?;
    }
    log(sink, LogLevel::Info, summary, &summary_fields(report, sink.dropped_records()))?;
    sink.flush().map_err(|err| CliError::new(err.to_string()))
}

/// Applies command-line overrides to the loaded configuration.
fn apply_overrides(config: ReplayConfig, cli: &Cli) -> ReplayConfig {
    let config = match &cli.log {
        Some(destination) => config.with_log_destination(LogDestination::from(destination.as_str())),
        None => config,
    };
    if cli.fail_on_worker_error {
        config.with_worker_failure_exit(WorkerFailureExit::Fail)
    } else {
        config
    }
}

/// Returns one field set per failed worker, in worker order.
fn worker_failure_fields(report: &DispatchReport) -> Vec<Vec<(&'static str, Value)>> {
    report
        .failures()
        .map(|(worker, failure)| {
            vec![
                ("worker", json!(worker.get())),
                ("scenario", json!(failure.scenario_id())),
                ("error", json!(failure.to_string())),
            ]
        })
        .collect()
}

/// Returns the fields of the run summary record.
fn summary_fields(report: &DispatchReport, dropped_records: usize) -> Vec<(&'static str, Value)> {
    let tally = report.tally();
    let mean_latency_ms = report
        .mean_latency()
        .map_or(Value::Null, |mean| json!(mean.as_secs_f64() * 1_000.0));
    vec![
        ("workers", json!(report.workers().len())),
        ("total_decisions", json!(report.total_decisions())),
        ("granted", json!(tally.granted)),
        ("denied", json!(tally.denied)),
        ("unexpected", json!(tally.unexpected)),
        ("failed_workers", json!(report.failures().count())),
        ("mean_latency_ms", mean_latency_ms),
        ("dropped_records", json!(dropped_records)),
    ]
}

/// Writes a diagnostic record.
fn log(sink: &RunSink, level: LogLevel, message: &str, fields: &[(&str, Value)]) -> CliResult<()> {
    sink.log(level, message, fields).map_err(|err| CliError::new(err.to_string()))
}

/// Writes a line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
