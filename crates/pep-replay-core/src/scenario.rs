// crates/pep-replay-core/src/scenario.rs
// ============================================================================
// Module: Scenario Corpus
// Description: Access-request scenarios replayed against a decision engine.
// Purpose: Load an immutable, ordered corpus and encode request bodies.
// Dependencies: serde, serde_json, thiserror, time
// ============================================================================

//! ## Overview
//! A [`Scenario`] is one simulated access request with user, device, and
//! channel context. The [`ScenarioCorpus`] is loaded once before dispatch and
//! is shared read-only by every replay worker; nothing in this module offers
//! mutable access after load.
//!
//! Wire field names follow the decision engine's JSON schema, so the request
//! body produced by [`Scenario::to_request_body`] is byte-stable for a given
//! scenario.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum size of a scenario corpus file in bytes.
pub const MAX_CORPUS_BYTES: usize = 64 * 1024 * 1024;

// ============================================================================
// SECTION: Scenario Records
// ============================================================================

/// One simulated access request.
///
/// # Invariants
/// - Fully formed at load time; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario identifier.
    pub id: i64,
    /// Human-readable scenario name.
    pub name: String,
    /// Target service name.
    pub service: String,
    /// Protocol used to reach the service.
    pub protocol: String,
    /// Requested action.
    pub action: String,
    /// Requester network address.
    pub remote_addr: String,
    /// Time of the access attempt.
    #[serde(with = "time::serde::rfc3339")]
    pub access_time: OffsetDateTime,
    /// Requesting user context.
    pub user: User,
    /// Requesting device context.
    pub device: Device,
    /// Transport-security descriptor of the access channel.
    pub channel: Channel,
}

impl Scenario {
    /// Encodes the scenario as a decision-request body.
    ///
    /// # Errors
    ///
    /// Returns [`serde_json::Error`] when the scenario cannot be serialized.
    pub fn to_request_body(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// User authentication factors and behavioral scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// User name.
    pub name: String,
    /// Password authentication used.
    pub passw_auth: bool,
    /// Hardware token authentication used.
    pub hwtoken_auth: bool,
    /// Biometric authentication used.
    pub faceid_auth: bool,
    /// Typing-pattern deviation score.
    pub input_behavior: f32,
    /// Access-rate score.
    pub access_rate: f32,
}

/// Device authentication factors and posture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Device name.
    pub name: String,
    /// Certificate authentication used.
    pub cert_auth: bool,
    /// Hardware token authentication used.
    pub hwtoken_auth: bool,
    /// Connection security posture.
    pub connection_security: String,
    /// Software patch level.
    pub software_patch_level: String,
    /// Operating system patch level.
    pub system_patch_level: String,
    /// Device type.
    #[serde(rename = "type")]
    pub device_type: String,
    /// Hardware fingerprint.
    pub fingerprint: DeviceFingerprint,
    /// Provisioning date.
    #[serde(with = "time::serde::rfc3339")]
    pub setup_date: OffsetDateTime,
    /// Network location of the device.
    pub location_ip: String,
    /// Health snapshot.
    pub health: DeviceHealth,
    /// Vulnerability-scan result.
    pub vulnerability_scan: i64,
    /// Managed-device flag.
    pub managed_device: i64,
}

/// Component serial numbers identifying a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFingerprint {
    /// CPU serial numbers.
    pub cpu_serials: Vec<String>,
    /// RAM module serial numbers.
    pub ram_serials: Vec<String>,
    /// Disk serial numbers.
    pub hdd_serials: Vec<String>,
}

/// Device load snapshot, each value a fraction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceHealth {
    /// CPU load.
    #[serde(rename = "cpu_load")]
    pub cpu: f32,
    /// RAM load.
    #[serde(rename = "ram_load")]
    pub ram: f32,
    /// Network load.
    #[serde(rename = "network_load")]
    pub network: f32,
}

/// Named transport-security descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Channel name.
    pub name: String,
    /// Authentication mechanism.
    pub authentication: String,
    /// Confidentiality mechanism.
    pub confidentiality: String,
    /// Integrity mechanism.
    pub integrity: String,
}

// ============================================================================
// SECTION: Corpus
// ============================================================================

/// Errors raised while loading a scenario corpus.
#[derive(Debug, Error)]
pub enum CorpusLoadError {
    /// Corpus file could not be read.
    #[error("unable to read scenario corpus '{}': {message}", path.display())]
    Io {
        /// Path that failed to load.
        path: PathBuf,
        /// Underlying I/O error message.
        message: String,
    },
    /// Corpus file exceeds [`MAX_CORPUS_BYTES`].
    #[error("scenario corpus '{}' exceeds {max_bytes} bytes", path.display())]
    TooLarge {
        /// Path that failed to load.
        path: PathBuf,
        /// Configured size limit.
        max_bytes: usize,
    },
    /// Corpus content is not a JSON array of scenarios.
    #[error("invalid scenario corpus: {0}")]
    Parse(String),
}

/// Ordered, immutable sequence of scenarios.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScenarioCorpus {
    /// Scenarios in file order.
    scenarios: Vec<Scenario>,
}

impl ScenarioCorpus {
    /// Loads a corpus from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`CorpusLoadError`] when the file is missing, too large, or
    /// not a valid scenario array.
    pub fn load(path: &Path) -> Result<Self, CorpusLoadError> {
        let bytes = fs::read(path).map_err(|err| CorpusLoadError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        if bytes.len() > MAX_CORPUS_BYTES {
            return Err(CorpusLoadError::TooLarge {
                path: path.to_path_buf(),
                max_bytes: MAX_CORPUS_BYTES,
            });
        }
        Self::from_json_slice(&bytes)
    }

    /// Parses a corpus from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CorpusLoadError::Parse`] when the bytes are not a scenario array.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, CorpusLoadError> {
        let scenarios: Vec<Scenario> =
            serde_json::from_slice(bytes).map_err(|err| CorpusLoadError::Parse(err.to_string()))?;
        Ok(Self {
            scenarios,
        })
    }

    /// Returns the number of scenarios.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.scenarios.len()
    }

    /// Returns true when the corpus holds no scenarios.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    /// Returns the scenarios in corpus order.
    #[must_use]
    pub fn as_slice(&self) -> &[Scenario] {
        &self.scenarios
    }

    /// Iterates the scenarios in corpus order.
    pub fn iter(&self) -> std::slice::Iter<'_, Scenario> {
        self.scenarios.iter()
    }
}

impl From<Vec<Scenario>> for ScenarioCorpus {
    fn from(scenarios: Vec<Scenario>) -> Self {
        Self {
            scenarios,
        }
    }
}

impl<'a> IntoIterator for &'a ScenarioCorpus {
    type IntoIter = std::slice::Iter<'a, Scenario>;
    type Item = &'a Scenario;

    fn into_iter(self) -> Self::IntoIter {
        self.scenarios.iter()
    }
}
