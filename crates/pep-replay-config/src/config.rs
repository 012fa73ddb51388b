// crates/pep-replay-config/src/config.rs
// ============================================================================
// Module: Replay Configuration
// Description: Configuration loading and validation for the replay client.
// Purpose: Provide strict, fail-closed config parsing with explicit policies.
// Dependencies: pep-replay-core, serde, serde_yaml, url
// ============================================================================

//! ## Overview
//! Configuration is loaded from a YAML file with a size limit, defaults are
//! applied to the logger section, and the result is validated into typed
//! paths and a target URL. Missing or invalid configuration fails closed.
//!
//! Two run-wide choices are explicit policies rather than fixed behavior:
//! which configured CA files become client trust anchors
//! ([`TrustAnchorSelection`]) and whether worker transport failures change the
//! process exit status ([`WorkerFailureExit`]).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;

use pep_replay_core::LogDestination;
use pep_replay_core::LogFormat;
use pep_replay_core::LogLevel;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration path used by the CLI.
pub const DEFAULT_CONFIG_PATH: &str = "./config/config.yml";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum number of configured CA files.
pub(crate) const MAX_CA_CERT_FILES: usize = 64;

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Validated replay client configuration.
///
/// # Invariants
/// - `ca_cert_paths` is non-empty.
/// - `target` uses the `https` scheme and names a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayConfig {
    /// System logger settings.
    pub logger: LoggerConfig,
    /// Client identity presented on every connection.
    pub identity: ClientIdentity,
    /// Configured CA certificate files, in configuration order.
    pub ca_cert_paths: Vec<PathBuf>,
    /// Decision-engine endpoint receiving scenario POSTs.
    pub target: Url,
    /// Selection of configured CA files used as client trust anchors.
    pub trust_anchors: TrustAnchorSelection,
    /// Exit-status policy for worker transport failures.
    pub worker_failure_exit: WorkerFailureExit,
}

impl ReplayConfig {
    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when reading, parsing, or validation fails.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("no configuration file is provided".to_string()));
        }
        validate_path(path)?;
        let bytes = fs::read(path).map_err(|err| {
            ConfigError::Io(format!(
                "unable to open the YAML configuration file '{}': {err}",
                path.display()
            ))
        })?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_yaml_str(content)
    }

    /// Parses and validates configuration from YAML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            serde_yaml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        raw.validate()
    }

    /// Returns the CA files the replay transport trusts.
    ///
    /// [`TrustAnchorSelection::FirstConfigured`] yields only the first entry.
    /// Every entry of `ca_cert_paths` must still load before a replay starts.
    #[must_use]
    pub fn client_trust_anchors(&self) -> &[PathBuf] {
        match self.trust_anchors {
            TrustAnchorSelection::FirstConfigured => {
                self.ca_cert_paths.get(..1).unwrap_or_default()
            }
            TrustAnchorSelection::AllConfigured => &self.ca_cert_paths,
        }
    }

    /// Returns a copy with the log destination replaced.
    #[must_use]
    pub fn with_log_destination(mut self, destination: LogDestination) -> Self {
        self.logger.destination = destination;
        self
    }

    /// Returns a copy with the worker failure exit policy replaced.
    #[must_use]
    pub fn with_worker_failure_exit(mut self, policy: WorkerFailureExit) -> Self {
        self.worker_failure_exit = policy;
        self
    }
}

/// System logger settings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoggerConfig {
    /// Minimum level written.
    pub level: LogLevel,
    /// Output destination.
    pub destination: LogDestination,
    /// Record encoding.
    pub format: LogFormat,
}

/// Local certificate and private key presented to the decision engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    /// PEM certificate chain.
    pub cert_path: PathBuf,
    /// PEM private key.
    pub key_path: PathBuf,
}

/// Which configured CA files become client trust anchors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustAnchorSelection {
    /// Only the first configured CA file.
    #[default]
    FirstConfigured,
    /// Every configured CA file.
    AllConfigured,
}

/// Exit-status policy applied after all workers finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerFailureExit {
    /// Worker failures are logged; the exit status stays successful.
    #[default]
    ReportOnly,
    /// Any worker failure produces a failing exit status.
    Fail,
}

impl WorkerFailureExit {
    /// Returns true when the run must exit with a failure status.
    #[must_use]
    pub const fn fails_run(self, any_worker_failed: bool) -> bool {
        matches!(self, Self::Fail) && any_worker_failed
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// YAML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: File Layout
// ============================================================================

/// Configuration file as written on disk.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    /// `system_logger` section.
    #[serde(default)]
    system_logger: RawLoggerSection,
    /// `pep` section.
    #[serde(default)]
    pep: RawPepSection,
    /// `pe` section.
    #[serde(default)]
    pe: RawPeSection,
    /// `replay` section.
    #[serde(default)]
    replay: RawReplaySection,
}

/// `system_logger` section; empty values fall back to defaults.
#[derive(Debug, Default, Deserialize)]
struct RawLoggerSection {
    /// Logging level name.
    #[serde(default)]
    level: Option<String>,
    /// `stdout` or a file path.
    #[serde(default)]
    destination: Option<String>,
    /// `json` or `text`.
    #[serde(default)]
    formatter: Option<String>,
}

/// `pep` section holding the client identity and CA files.
#[derive(Debug, Default, Deserialize)]
struct RawPepSection {
    /// Client certificate path.
    #[serde(default)]
    ssl_cert: Option<String>,
    /// Client private key path.
    #[serde(default)]
    ssl_cert_key: Option<String>,
    /// CA certificate paths.
    #[serde(default)]
    ca_certs_to_verify_client_certs: Option<Vec<String>>,
}

/// `pe` section naming the decision engine.
#[derive(Debug, Default, Deserialize)]
struct RawPeSection {
    /// Decision-engine URL.
    #[serde(default)]
    target_addr: Option<String>,
}

/// `replay` section holding explicit policies.
#[derive(Debug, Default, Deserialize)]
struct RawReplaySection {
    /// Trust anchor selection policy.
    #[serde(default)]
    trust_anchors: TrustAnchorSelection,
    /// Worker failure exit policy.
    #[serde(default)]
    worker_failure_exit: WorkerFailureExit,
}

impl RawConfig {
    /// Validates the raw file into a [`ReplayConfig`].
    fn validate(self) -> Result<ReplayConfig, ConfigError> {
        let logger = self.system_logger.validate()?;
        let (identity, ca_cert_paths) = self.pep.validate()?;
        let target = self.pe.validate()?;
        Ok(ReplayConfig {
            logger,
            identity,
            ca_cert_paths,
            target,
            trust_anchors: self.replay.trust_anchors,
            worker_failure_exit: self.replay.worker_failure_exit,
        })
    }
}

impl RawLoggerSection {
    /// Applies defaults and parses the logger values.
    fn validate(self) -> Result<LoggerConfig, ConfigError> {
        let level = match non_empty(self.level.as_deref()) {
            Some(value) => LogLevel::from_str(value)
                .map_err(|err| ConfigError::Invalid(format!("system_logger.level: {err}")))?,
            None => LogLevel::Info,
        };
        let format = LogFormat::from_str(self.formatter.as_deref().unwrap_or_default())
            .map_err(|err| ConfigError::Invalid(format!("system_logger.formatter: {err}")))?;
        let destination = match non_empty(self.destination.as_deref()) {
            Some(value) => {
                let destination = LogDestination::from(value);
                if let LogDestination::File(path) = &destination {
                    validate_path_string("system_logger.destination", &path.to_string_lossy())?;
                }
                destination
            }
            None => LogDestination::Stdout,
        };
        Ok(LoggerConfig {
            level,
            destination,
            format,
        })
    }
}

impl RawPepSection {
    /// Validates the identity and CA paths, reporting every missing field.
    fn validate(self) -> Result<(ClientIdentity, Vec<PathBuf>), ConfigError> {
        let mut missing = Vec::new();
        let cert = non_empty(self.ssl_cert.as_deref());
        if cert.is_none() {
            missing.push("ssl_cert");
        }
        let key = non_empty(self.ssl_cert_key.as_deref());
        if key.is_none() {
            missing.push("ssl_cert_key");
        }
        let cas = self.ca_certs_to_verify_client_certs.as_deref().filter(|cas| !cas.is_empty());
        if cas.is_none() {
            missing.push("ca_certs_to_verify_client_certs");
        }
        let (Some(cert), Some(key), Some(cas)) = (cert, key, cas) else {
            return Err(ConfigError::Invalid(format!(
                "in the section 'pep' the following required fields are missing: '{}'",
                missing.join(",")
            )));
        };
        validate_path_string("pep.ssl_cert", cert)?;
        validate_path_string("pep.ssl_cert_key", key)?;
        if cas.len() > MAX_CA_CERT_FILES {
            return Err(ConfigError::Invalid(format!(
                "pep.ca_certs_to_verify_client_certs exceeds {MAX_CA_CERT_FILES} entries"
            )));
        }
        let mut ca_cert_paths = Vec::with_capacity(cas.len());
        for ca in cas {
            validate_path_string("pep.ca_certs_to_verify_client_certs", ca)?;
            ca_cert_paths.push(PathBuf::from(ca.trim()));
        }
        Ok((
            ClientIdentity {
                cert_path: PathBuf::from(cert),
                key_path: PathBuf::from(key),
            },
            ca_cert_paths,
        ))
    }
}

impl RawPeSection {
    /// Parses the decision-engine URL.
    fn validate(self) -> Result<Url, ConfigError> {
        let Some(addr) = non_empty(self.target_addr.as_deref()) else {
            return Err(ConfigError::Invalid(
                "in the section 'pe' the following required fields are missing: 'target_addr'"
                    .to_string(),
            ));
        };
        let url = Url::parse(addr)
            .map_err(|err| ConfigError::Invalid(format!("pe.target_addr is not a url: {err}")))?;
        if url.scheme() != "https" {
            return Err(ConfigError::Invalid(
                "pe.target_addr must use https:// (mutual TLS is mandatory)".to_string(),
            ));
        }
        if url.host_str().is_none() {
            return Err(ConfigError::Invalid("pe.target_addr must name a host".to_string()));
        }
        Ok(url)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns the trimmed value when it is present and non-blank.
fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Validates the config path against length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a configured path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in Path::new(trimmed).components() {
        if component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}
