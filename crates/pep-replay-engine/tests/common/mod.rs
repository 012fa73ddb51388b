// crates/pep-replay-engine/tests/common/mod.rs
// ============================================================================
// Module: Engine Test Fixtures
// Description: TLS assets, a mock decision engine, and recording test doubles.
// Purpose: Exercise replay runs end to end without external services.
// Dependencies: rcgen, rustls, tempfile, serde_json
// ============================================================================

//! ## Overview
//! Fixtures shared by the engine integration tests: ephemeral CA, server, and
//! client certificates; an mTLS HTTP/1.1 decision engine that answers by
//! scenario id; a sink that records every event; and a scripted transport
//! for failure injection without sockets.

#![allow(dead_code, reason = "Each test binary uses a subset of the fixtures.")]

use std::collections::HashMap;
use std::fs;
use std::io;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Read;
use std::io::Write;
use std::net::SocketAddr;
use std::net::TcpListener;
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Instant;

use pep_replay_core::ScenarioCorpus;
use pep_replay_core::TelemetryEvent;
use pep_replay_core::TelemetrySink;
use pep_replay_core::WorkerId;
use pep_replay_engine::DecisionReply;
use pep_replay_engine::DecisionTransport;
use pep_replay_engine::FailureKind;
use pep_replay_engine::TransportCredentials;
use pep_replay_engine::TransportFailure;
use rcgen::BasicConstraints;
use rcgen::Certificate;
use rcgen::CertificateParams;
use rcgen::DistinguishedName;
use rcgen::DnType;
use rcgen::IsCa;
use rcgen::Issuer;
use rcgen::KeyPair;
use rustls::RootCertStore;
use rustls::ServerConfig;
use rustls::ServerConnection;
use rustls::StreamOwned;
use rustls::crypto::aws_lc_rs;
use rustls::pki_types::CertificateDer;
use rustls::pki_types::PrivateKeyDer;
use rustls::pki_types::pem::PemObject;
use rustls::server::WebPkiClientVerifier;
use serde_json::Value;
use serde_json::json;
use tempfile::TempDir;
use url::Url;

// ============================================================================
// SECTION: Scenarios
// ============================================================================

/// Returns one scenario in the on-disk encoding.
pub fn scenario_json(id: i64) -> Value {
    json!({
        "id": id,
        "name": format!("scenario-{id}"),
        "service": format!("service-{id}"),
        "protocol": "https",
        "action": if id % 2 == 0 { "write" } else { "read" },
        "remote_addr": "10.1.2.3:40000",
        "access_time": "2022-03-14T09:26:53Z",
        "user": {
            "name": "alice", "passw_auth": true, "hwtoken_auth": false,
            "faceid_auth": false, "input_behavior": 0.5, "access_rate": 2.0
        },
        "device": {
            "name": "laptop", "cert_auth": true, "hwtoken_auth": false,
            "connection_security": "wpa3", "software_patch_level": "current",
            "system_patch_level": "current", "type": "laptop",
            "fingerprint": {"cpu_serials": ["c"], "ram_serials": [], "hdd_serials": []},
            "setup_date": "2021-01-01T00:00:00Z", "location_ip": "10.1.2.3",
            "health": {"cpu_load": 0.1, "ram_load": 0.2, "network_load": 0.3},
            "vulnerability_scan": 0, "managed_device": 1
        },
        "channel": {
            "name": "tls", "authentication": "x509",
            "confidentiality": "aes", "integrity": "sha256"
        }
    })
}

/// Builds a corpus with the given scenario ids, in order.
pub fn corpus(ids: &[i64]) -> ScenarioCorpus {
    let array = Value::Array(ids.iter().copied().map(scenario_json).collect());
    ScenarioCorpus::from_json_slice(array.to_string().as_bytes()).expect("corpus")
}

/// Extracts the scenario id from a request body.
pub fn scenario_id_of(body: &[u8]) -> Option<i64> {
    serde_json::from_slice::<Value>(body).ok()?.get("id")?.as_i64()
}

// ============================================================================
// SECTION: TLS Fixtures
// ============================================================================

/// Ephemeral PKI written to a temporary directory.
pub struct GeneratedTls {
    /// Keeps the files alive.
    _tempdir: TempDir,
    /// CA that signed the server and client certificates.
    pub ca_pem: PathBuf,
    /// Unrelated CA.
    pub other_ca_pem: PathBuf,
    /// Server certificate for `localhost`.
    pub server_cert: PathBuf,
    /// Server private key.
    pub server_key: PathBuf,
    /// Client certificate.
    pub client_cert: PathBuf,
    /// Client private key.
    pub client_key: PathBuf,
    /// File that contains no PEM blocks.
    pub garbage: PathBuf,
    /// Path that does not exist.
    pub missing: PathBuf,
}

impl GeneratedTls {
    /// Returns credentials trusting the signing CA.
    pub fn credentials(&self) -> TransportCredentials {
        TransportCredentials::new(&self.client_cert, &self.client_key, vec![self.ca_pem.clone()])
    }

    /// Returns credentials trusting only the given CA files.
    pub fn credentials_with_cas(&self, ca_paths: Vec<PathBuf>) -> TransportCredentials {
        TransportCredentials::new(&self.client_cert, &self.client_key, ca_paths)
    }
}

/// Generates a CA, a server and a client certificate, and an unrelated CA.
pub fn generate_tls_fixtures() -> Result<GeneratedTls, Box<dyn std::error::Error>> {
    let tempdir = tempfile::Builder::new().prefix("pep-replay-tls").tempdir()?;
    let (ca, issuer) = generate_ca("PEP Replay Test CA")?;
    let (other_ca, _) = generate_ca("Unrelated Test CA")?;
    let (server, server_key) = generate_leaf(
        &issuer,
        "PEP Replay Test Server",
        vec!["localhost".to_string(), "127.0.0.1".to_string()],
    )?;
    let (client, client_key) = generate_leaf(&issuer, "PEP Replay Test Client", Vec::new())?;

    let dir = tempdir.path();
    let fixtures = GeneratedTls {
        ca_pem: dir.join("ca.pem"),
        other_ca_pem: dir.join("other-ca.pem"),
        server_cert: dir.join("server.pem"),
        server_key: dir.join("server.key"),
        client_cert: dir.join("client.pem"),
        client_key: dir.join("client.key"),
        garbage: dir.join("garbage.pem"),
        missing: dir.join("missing.pem"),
        _tempdir: tempdir,
    };
    fs::write(&fixtures.ca_pem, ca.pem())?;
    fs::write(&fixtures.other_ca_pem, other_ca.pem())?;
    fs::write(&fixtures.server_cert, server.pem())?;
    fs::write(&fixtures.server_key, server_key.serialize_pem())?;
    fs::write(&fixtures.client_cert, client.pem())?;
    fs::write(&fixtures.client_key, client_key.serialize_pem())?;
    fs::write(&fixtures.garbage, "this is not a certificate\n")?;
    Ok(fixtures)
}

fn generate_ca(
    common_name: &str,
) -> Result<(Certificate, Issuer<'static, KeyPair>), Box<dyn std::error::Error>> {
    let key = KeyPair::generate()?;
    let mut params = CertificateParams::default();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.distinguished_name = distinguished_name(common_name);
    let cert = params.self_signed(&key)?;
    Ok((cert, Issuer::new(params, key)))
}

fn generate_leaf(
    issuer: &Issuer<'_, KeyPair>,
    common_name: &str,
    subject_alt_names: Vec<String>,
) -> Result<(Certificate, KeyPair), Box<dyn std::error::Error>> {
    let key = KeyPair::generate()?;
    let mut params = CertificateParams::new(subject_alt_names)?;
    params.distinguished_name = distinguished_name(common_name);
    params.is_ca = IsCa::NoCa;
    let cert = params.signed_by(&key, issuer)?;
    Ok((cert, key))
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, common_name);
    name
}

// ============================================================================
// SECTION: Mock Decision Engine
// ============================================================================

/// Mock engine behavior for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockReply {
    /// Respond with the status code.
    Status(u16),
    /// Close the connection without responding.
    Drop,
}

/// Request observed by the mock engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    /// Request method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Content-Type header, if any.
    pub content_type: Option<String>,
    /// Scenario id parsed from the body.
    pub scenario_id: Option<i64>,
}

/// mTLS HTTP/1.1 decision engine answering by scenario id.
pub struct MockDecisionEngine {
    /// Bound address.
    addr: SocketAddr,
    /// Requests observed so far.
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    /// Set to stop the accept loop.
    stop: Arc<AtomicBool>,
}

impl MockDecisionEngine {
    /// Starts an engine that requires client certificates issued by the test CA.
    pub fn start(tls: &GeneratedTls, responder: fn(i64) -> MockReply) -> Self {
        let config = Arc::new(server_config(tls));
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));
        {
            let requests = Arc::clone(&requests);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                for tcp in listener.incoming() {
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                    let Ok(tcp) = tcp else { continue };
                    let config = Arc::clone(&config);
                    let requests = Arc::clone(&requests);
                    thread::spawn(move || {
                        let _ = serve_connection(config, tcp, responder, &requests);
                    });
                }
            });
        }
        Self {
            addr,
            requests,
            stop,
        }
    }

    /// Returns the decision endpoint URL.
    pub fn url(&self) -> Url {
        Url::parse(&format!("https://localhost:{}/decision", self.addr.port())).expect("url")
    }

    /// Returns the requests observed so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    /// Returns the number of requests observed so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }
}

impl Drop for MockDecisionEngine {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = TcpStream::connect(self.addr);
    }
}

/// Responder granting every scenario.
pub fn grant_all(_id: i64) -> MockReply {
    MockReply::Status(200)
}

fn server_config(tls: &GeneratedTls) -> ServerConfig {
    let provider = Arc::new(aws_lc_rs::default_provider());
    let mut roots = RootCertStore::empty();
    for cert in CertificateDer::pem_file_iter(&tls.ca_pem).expect("ca pem") {
        roots.add(cert.expect("ca cert")).expect("add ca");
    }
    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
        .build()
        .expect("client verifier");
    let chain = CertificateDer::pem_file_iter(&tls.server_cert)
        .expect("server pem")
        .collect::<Result<Vec<_>, _>>()
        .expect("server chain");
    let key = PrivateKeyDer::from_pem_file(&tls.server_key).expect("server key");
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .expect("protocol versions")
        .with_client_cert_verifier(verifier)
        .with_single_cert(chain, key)
        .expect("server config");
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    config
}

/// Serves keep-alive HTTP/1.1 requests until the client disconnects.
fn serve_connection(
    config: Arc<ServerConfig>,
    tcp: TcpStream,
    responder: fn(i64) -> MockReply,
    requests: &Mutex<Vec<RecordedRequest>>,
) -> io::Result<()> {
    let conn = ServerConnection::new(config).map_err(io::Error::other)?;
    let mut reader = BufReader::new(StreamOwned::new(conn, tcp));
    loop {
        let mut request_line = String::new();
        if reader.read_line(&mut request_line)? == 0 {
            return Ok(());
        }
        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or_default().to_string();
        let path = parts.next().unwrap_or_default().to_string();
        let mut headers = HashMap::new();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 {
                return Ok(());
            }
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }
        let length = headers
            .get("content-length")
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or_default();
        let mut body = vec![0_u8; length];
        reader.read_exact(&mut body)?;
        let scenario_id = scenario_id_of(&body);
        requests.lock().expect("requests lock").push(RecordedRequest {
            method,
            path,
            content_type: headers.get("content-type").cloned(),
            scenario_id,
        });
        match responder(scenario_id.unwrap_or_default()) {
            MockReply::Status(status) => {
                let response =
                    format!("HTTP/1.1 {status} Mock\r\nContent-Length: 2\r\n\r\nok");
                let stream = reader.get_mut();
                stream.write_all(response.as_bytes())?;
                stream.flush()?;
            }
            MockReply::Drop => {
                let stream = reader.get_mut();
                let _ = stream.sock.shutdown(std::net::Shutdown::Both);
                return Ok(());
            }
        }
    }
}

// ============================================================================
// SECTION: Recording Sink
// ============================================================================

/// Sink channel an event was recorded on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkChannel {
    /// Granted or denied decision.
    Decision,
    /// Unexpected status.
    Unexpected,
}

/// Sink that keeps every event in arrival order.
#[derive(Default)]
pub struct RecordingSink {
    /// Recorded events.
    events: Mutex<Vec<(SinkChannel, TelemetryEvent)>>,
}

impl RecordingSink {
    /// Returns every recorded event.
    pub fn events(&self) -> Vec<(SinkChannel, TelemetryEvent)> {
        self.events.lock().expect("events lock").clone()
    }

    /// Returns the scenario ids recorded for one worker, in order.
    pub fn scenario_ids_for(&self, worker: WorkerId) -> Vec<i64> {
        self.events()
            .into_iter()
            .filter(|(_, event)| event.worker_id == worker)
            .map(|(_, event)| event.scenario_id)
            .collect()
    }

    /// Returns the number of events recorded on `channel`.
    pub fn count_on(&self, channel: SinkChannel) -> usize {
        self.events().iter().filter(|(recorded, _)| *recorded == channel).count()
    }
}

impl TelemetrySink for RecordingSink {
    fn record_decision(&self, event: &TelemetryEvent) {
        self.events.lock().expect("events lock").push((SinkChannel::Decision, event.clone()));
    }

    fn record_unexpected(&self, event: &TelemetryEvent) {
        self.events.lock().expect("events lock").push((SinkChannel::Unexpected, event.clone()));
    }
}

// ============================================================================
// SECTION: Scripted Transport
// ============================================================================

/// In-memory transport with scripted statuses and failures.
pub struct ScriptedTransport {
    /// Status returned for a scenario id.
    status_for: fn(i64) -> u16,
    /// Scenario id whose requests fail.
    fail_on: Option<i64>,
    /// Remaining failures to hand out; `None` fails every time.
    failure_budget: Option<AtomicUsize>,
    /// Scenario ids of every call, in arrival order.
    calls: Mutex<Vec<i64>>,
}

impl ScriptedTransport {
    /// Transport answering every request with `status_for(id)`.
    pub fn answering(status_for: fn(i64) -> u16) -> Self {
        Self {
            status_for,
            fail_on: None,
            failure_budget: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fails every request for `scenario_id`.
    pub fn failing_on(mut self, scenario_id: i64) -> Self {
        self.fail_on = Some(scenario_id);
        self
    }

    /// Limits the number of failures handed out across all workers.
    pub fn with_failure_budget(mut self, failures: usize) -> Self {
        self.failure_budget = Some(AtomicUsize::new(failures));
        self
    }

    /// Returns the scenario ids of every call.
    pub fn calls(&self) -> Vec<i64> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn should_fail(&self, id: i64) -> bool {
        if self.fail_on != Some(id) {
            return false;
        }
        match &self.failure_budget {
            None => true,
            Some(budget) => budget
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok(),
        }
    }
}

impl DecisionTransport for ScriptedTransport {
    fn post_decision(&self, _target: &Url, body: Vec<u8>) -> Result<DecisionReply, TransportFailure> {
        let id = scenario_id_of(&body).expect("scenario id in body");
        self.calls.lock().expect("calls lock").push(id);
        if self.should_fail(id) {
            return Err(TransportFailure::new(FailureKind::Connect, "scripted failure"));
        }
        Ok(DecisionReply {
            status: (self.status_for)(id),
            received_at: Instant::now(),
        })
    }
}

/// Placeholder endpoint for transports that ignore the target.
pub fn dummy_target() -> Url {
    Url::parse("https://pe.invalid/decision").expect("url")
}

// ============================================================================
// SECTION: Writers
// ============================================================================

/// Cloneable in-memory writer.
#[derive(Clone, Default)]
pub struct SharedBuffer {
    /// Shared bytes.
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the contents as a string.
    pub fn to_string_lossy(&self) -> String {
        let guard = self.inner.lock().expect("buffer lock");
        String::from_utf8_lossy(&guard).to_string()
    }

    /// Returns the non-empty lines written so far.
    pub fn lines(&self) -> Vec<String> {
        self.to_string_lossy().lines().map(str::to_string).collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().expect("buffer lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writer that always fails.
pub struct FailingWriter;

impl Write for FailingWriter {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::other("disk full"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(io::Error::other("disk full"))
    }
}
