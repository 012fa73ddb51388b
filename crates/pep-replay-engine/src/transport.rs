// crates/pep-replay-engine/src/transport.rs
// ============================================================================
// Module: Mutual TLS Transport
// Description: Client-authenticated HTTP channel to the decision engine.
// Purpose: Build one shared, read-only transport from PEM identity and CAs.
// Dependencies: reqwest, rustls, rustls-pki-types, thiserror, url
// ============================================================================

//! ## Overview
//! [`MtlsTransport`] presents the local certificate on every connection and
//! trusts exactly the supplied CA certificates; platform roots are never
//! consulted. It is built once, never mutated, and shared by reference across
//! replay workers. Connection reuse follows [`PoolLimits::DEFAULT`]; requests
//! beyond the per-host connection cap wait for a slot instead of opening more
//! connections.
//!
//! Construction failures are fatal to a replay run: a bad identity yields
//! [`TransportError::CredentialLoad`], a missing or unusable CA file yields
//! [`TransportError::TrustStore`]. There is no partial-trust fallback.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::error::Error as _;
use std::fs;
use std::io;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Instant;

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use rustls::ClientConfig;
use rustls::RootCertStore;
use rustls::crypto::aws_lc_rs;
use rustls_pki_types::CertificateDer;
use rustls_pki_types::PrivateKeyDer;
use rustls_pki_types::pem::PemObject;
use thiserror::Error;
use url::Url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Content type of decision-request bodies.
pub const REQUEST_CONTENT_TYPE: &str = "application/json";
/// Maximum response bytes drained to return a connection to the pool.
const MAX_DRAIN_BYTES: u64 = 64 * 1024;

// ============================================================================
// SECTION: Pool Policy
// ============================================================================

/// Connection-pool limits of the replay transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLimits {
    /// Maximum idle connections across all hosts.
    pub max_idle: usize,
    /// Maximum concurrent connections to one host.
    pub max_connections_per_host: usize,
    /// Maximum idle connections kept per host.
    pub max_idle_per_host: usize,
}

impl PoolLimits {
    /// Fixed policy used by every replay transport.
    pub const DEFAULT: Self = Self {
        max_idle: 100,
        max_connections_per_host: 100,
        max_idle_per_host: 100,
    };
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while constructing the transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Local certificate or private key could not be loaded.
    #[error(
        "unable to load client key pair from '{}' and '{}': {message}",
        cert.display(),
        key.display()
    )]
    CredentialLoad {
        /// Certificate path.
        cert: PathBuf,
        /// Private key path.
        key: PathBuf,
        /// Failure detail.
        message: String,
    },
    /// A CA certificate file is missing, unreadable, or unusable.
    #[error("unable to load CA certificate from '{}': {message}", path.display())]
    TrustStore {
        /// CA file path.
        path: PathBuf,
        /// Failure detail.
        message: String,
    },
    /// The HTTP client could not be assembled.
    #[error("http client build failed: {0}")]
    Client(String),
}

/// Classification of a request that produced no response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connection could not be established (refused, TLS handshake).
    Connect,
    /// Request exceeded the transport's timeout.
    Timeout,
    /// Request failed after the connection was established.
    Request,
}

impl FailureKind {
    /// Returns a stable label for the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Timeout => "timeout",
            Self::Request => "request",
        }
    }
}

/// A decision request that produced no response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} failure: {message}", kind.as_str())]
pub struct TransportFailure {
    /// Failure classification.
    pub kind: FailureKind,
    /// Failure detail including the error source chain.
    pub message: String,
}

impl TransportFailure {
    /// Creates a transport failure.
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Converts a client error, keeping its source chain.
    fn from_reqwest(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            FailureKind::Timeout
        } else if err.is_connect() {
            FailureKind::Connect
        } else {
            FailureKind::Request
        };
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        Self::new(kind, message)
    }
}

// ============================================================================
// SECTION: Transport Contract
// ============================================================================

/// Response metadata of one decision request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionReply {
    /// HTTP status code.
    pub status: u16,
    /// Instant at which the status became known.
    pub received_at: Instant,
}

/// Channel that delivers scenario bodies to the decision engine.
///
/// Implementations are shared by every worker without extra locking.
pub trait DecisionTransport: Send + Sync {
    /// POSTs a JSON body to `target` and returns the response status.
    ///
    /// # Errors
    ///
    /// Returns [`TransportFailure`] when no response is received.
    fn post_decision(&self, target: &Url, body: Vec<u8>) -> Result<DecisionReply, TransportFailure>;
}

// ============================================================================
// SECTION: Builder Inputs
// ============================================================================

/// Identity and trust material for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportCredentials {
    /// PEM certificate chain presented to the server.
    pub cert_path: PathBuf,
    /// PEM private key for `cert_path`.
    pub key_path: PathBuf,
    /// PEM CA files whose union forms the trust anchors.
    pub ca_paths: Vec<PathBuf>,
    /// Further PEM CA files that must load but are not trusted.
    pub checked_ca_paths: Vec<PathBuf>,
}

impl TransportCredentials {
    /// Creates transport credentials.
    #[must_use]
    pub fn new(
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
        ca_paths: Vec<PathBuf>,
    ) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            ca_paths,
            checked_ca_paths: Vec::new(),
        }
    }

    /// Returns credentials that also require every file in `configured` to
    /// load as a CA certificate, whether or not it is a trust anchor.
    #[must_use]
    pub fn with_configured_cas(mut self, configured: &[PathBuf]) -> Self {
        self.checked_ca_paths =
            configured.iter().filter(|path| !self.ca_paths.contains(path)).cloned().collect();
        self
    }
}

// ============================================================================
// SECTION: Transport
// ============================================================================

/// Mutually authenticated HTTP transport.
#[derive(Debug)]
pub struct MtlsTransport {
    /// Pooled HTTP client carrying the TLS configuration.
    client: Client,
    /// Per-host connection cap.
    gate: ConnectionGate,
    /// Pool policy applied at construction.
    limits: PoolLimits,
}

impl MtlsTransport {
    /// Builds a transport from PEM identity and CA files.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::CredentialLoad`] for an unusable key pair,
    /// [`TransportError::TrustStore`] for a missing or unusable CA file
    /// (trusted or only checked), and [`TransportError::Client`] when the HTTP
    /// client cannot be assembled.
    pub fn build(credentials: &TransportCredentials) -> Result<Self, TransportError> {
        let limits = PoolLimits::DEFAULT;
        for path in &credentials.checked_ca_paths {
            add_ca_file(&mut RootCertStore::empty(), path)?;
        }
        let roots = load_trust_anchors(&credentials.ca_paths)?;
        let (chain, key) = load_identity(&credentials.cert_path, &credentials.key_path)?;
        let mut tls = ClientConfig::builder_with_provider(Arc::new(aws_lc_rs::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|err| TransportError::Client(err.to_string()))?
            .with_root_certificates(roots)
            .with_client_auth_cert(chain, key)
            .map_err(|err| credential_error(credentials, &err.to_string()))?;
        tls.alpn_protocols = vec![b"http/1.1".to_vec()];
        let client = Client::builder()
            .use_preconfigured_tls(tls)
            .pool_max_idle_per_host(limits.max_idle_per_host)
            .redirect(Policy::none())
            .build()
            .map_err(|err| TransportError::Client(err.to_string()))?;
        Ok(Self {
            client,
            gate: ConnectionGate::new(limits.max_connections_per_host),
            limits,
        })
    }

    /// Returns the pool policy of this transport.
    #[must_use]
    pub const fn pool_limits(&self) -> PoolLimits {
        self.limits
    }
}

impl DecisionTransport for MtlsTransport {
    fn post_decision(&self, target: &Url, body: Vec<u8>) -> Result<DecisionReply, TransportFailure> {
        let _slot = self.gate.acquire();
        let mut response = self
            .client
            .post(target.clone())
            .header(CONTENT_TYPE, REQUEST_CONTENT_TYPE)
            .body(body)
            .send()
            .map_err(|err| TransportFailure::from_reqwest(&err))?;
        let received_at = Instant::now();
        let status = response.status().as_u16();
        // The verdict is the status alone; the body is drained only for reuse.
        let _ = io::copy(&mut response.by_ref().take(MAX_DRAIN_BYTES), &mut io::sink());
        Ok(DecisionReply {
            status,
            received_at,
        })
    }
}

// ============================================================================
// SECTION: Connection Gate
// ============================================================================

/// Counting gate bounding concurrent connections to the target host.
#[derive(Debug)]
pub(crate) struct ConnectionGate {
    /// Requests currently holding a slot.
    in_flight: Mutex<usize>,
    /// Signalled whenever a slot is released.
    released: Condvar,
    /// Maximum concurrent slots.
    capacity: usize,
}

impl ConnectionGate {
    /// Creates a gate with `capacity` slots (at least one).
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            in_flight: Mutex::new(0),
            released: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Blocks until a slot is free and claims it.
    pub(crate) fn acquire(&self) -> GateSlot<'_> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        while *in_flight >= self.capacity {
            in_flight = self.released.wait(in_flight).unwrap_or_else(PoisonError::into_inner);
        }
        *in_flight += 1;
        GateSlot {
            gate: self,
        }
    }

    /// Returns the number of claimed slots.
    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> usize {
        *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Claimed gate slot, released on drop.
pub(crate) struct GateSlot<'a> {
    /// Gate the slot belongs to.
    gate: &'a ConnectionGate,
}

impl Drop for GateSlot<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.gate.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        *in_flight = in_flight.saturating_sub(1);
        drop(in_flight);
        self.gate.released.notify_one();
    }
}

// ============================================================================
// SECTION: PEM Loading
// ============================================================================

/// Builds the trust store from the union of all CA files.
fn load_trust_anchors(paths: &[PathBuf]) -> Result<RootCertStore, TransportError> {
    let Some(first) = paths.first() else {
        return Err(TransportError::TrustStore {
            path: PathBuf::new(),
            message: "no CA certificate file configured".to_string(),
        });
    };
    let mut roots = RootCertStore::empty();
    for path in paths {
        add_ca_file(&mut roots, path)?;
    }
    if roots.is_empty() {
        return Err(TransportError::TrustStore {
            path: first.clone(),
            message: "trust store is empty".to_string(),
        });
    }
    Ok(roots)
}

/// Adds every certificate of one PEM file to the trust store.
fn add_ca_file(roots: &mut RootCertStore, path: &Path) -> Result<(), TransportError> {
    let trust_error = |message: String| TransportError::TrustStore {
        path: path.to_path_buf(),
        message,
    };
    let pem = fs::read(path).map_err(|err| trust_error(err.to_string()))?;
    let certs = CertificateDer::pem_slice_iter(&pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| trust_error(err.to_string()))?;
    if certs.is_empty() {
        return Err(trust_error("no PEM certificate found".to_string()));
    }
    for cert in certs {
        roots.add(cert).map_err(|err| trust_error(err.to_string()))?;
    }
    Ok(())
}

/// Loads the certificate chain and private key.
fn load_identity(
    cert_path: &Path,
    key_path: &Path,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), TransportError> {
    let load_error = |message: String| TransportError::CredentialLoad {
        cert: cert_path.to_path_buf(),
        key: key_path.to_path_buf(),
        message,
    };
    let chain = CertificateDer::pem_file_iter(cert_path)
        .map_err(|err| load_error(err.to_string()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| load_error(err.to_string()))?;
    if chain.is_empty() {
        return Err(load_error("no PEM certificate found".to_string()));
    }
    let key =
        PrivateKeyDer::from_pem_file(key_path).map_err(|err| load_error(err.to_string()))?;
    Ok((chain, key))
}

/// Builds a credential error for the configured identity paths.
fn credential_error(credentials: &TransportCredentials, message: &str) -> TransportError {
    TransportError::CredentialLoad {
        cert: credentials.cert_path.clone(),
        key: credentials.key_path.clone(),
        message: message.to_string(),
    }
}
