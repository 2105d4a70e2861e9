//! Top-level session: the dedicated worker thread running the FSM, and the
//! public API a caller drives it through.

pub mod fsm;

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audit::{AuditEntry, AuditEvent, AuditSink, NoOpAuditSink};
use crate::config::{CertificateParams, SessionCallbacks, SessionConfig};
use crate::constants::{COOKIE_TIMEOUT, DTLS_MTU, RECORD_OVERHEAD, UDP_HEADER_SIZE};
use crate::credentials::{CaTrust, CredentialKind, Credentials, LocalCertChain};
use crate::dh::DhParamsFuture;
use crate::error::{SessionError, SessionResult};
use crate::handshake::{self, HandshakeDriver, HandshakeOutcome, Role, SessionKeys};
use crate::pmtu::PmtuProbe;
use crate::record::RecordIo;
use crate::reorder::ReorderBuffer;
use crate::rx_queue::RxQueue;
use crate::socket::PacketSocket;

pub use fsm::SessionState;
use fsm::AtomicSessionState;

/// How long `ESTABLISHED` blocks waiting for the next datagram before giving
/// the reorder buffer a chance to flush a stalled gap on its own.
const ESTABLISHED_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A single-byte datagram tag requesting the peer return to `HANDSHAKE`.
/// Distinguishable from a record (which is always at least 28 bytes: 8-byte
/// sequence, 12-byte nonce, 16-byte tag) and from a heartbeat ping/pong
/// (which start with tag `1`/`2`).
const MSG_REHANDSHAKE: u8 = 0xfe;

/// Atomic session statistics, readable at any time via [`Session::stats`].
#[derive(Debug, Default)]
pub struct SessionStats {
    tx_packets: AtomicU64,
    tx_bytes: AtomicU64,
    rx_packets: AtomicU64,
    rx_bytes: AtomicU64,
    cookie_rejections: AtomicU64,
    pings_received: AtomicU32,
}

impl SessionStats {
    fn snapshot(&self, rx_dropped: u64) -> SessionStatsSnapshot {
        SessionStatsSnapshot {
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            rx_dropped,
            cookie_rejections: self.cookie_rejections.load(Ordering::Relaxed),
            pings_received: self.pings_received.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SessionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStatsSnapshot {
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub rx_dropped: u64,
    pub cookie_rejections: u64,
    pub pings_received: u32,
}

/// Adapts a real [`PacketSocket`] plus an [`RxQueue`] into one `PacketSocket`:
/// sends go straight to the real socket, receives are served from the queue
/// the external push-based ingress point ([`Session::push_rx`]) fills. Lets
/// the handshake, cookie, and PMTU code paths all run unmodified regardless
/// of whether a datagram was read directly or pushed in from outside.
struct RxFedSocket<'a> {
    socket: &'a dyn PacketSocket,
    rx_queue: &'a RxQueue,
}

impl PacketSocket for RxFedSocket<'_> {
    fn send_to(&self, data: &[u8]) -> Result<usize, String> {
        self.socket.send_to(data)
    }

    fn recv_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        self.rx_queue.pop_timeout(timeout)
    }

    fn transport_overhead(&self) -> usize {
        self.socket.transport_overhead()
    }
}

struct Shared {
    role: Role,
    state: AtomicSessionState,
    rx_queue: RxQueue,
    reorder: ReorderBuffer,
    stats: SessionStats,
    audit: Arc<dyn AuditSink>,
    socket: Arc<dyn PacketSocket>,
    record_io: Mutex<Option<Arc<RecordIo>>>,
    pending_outcome: Mutex<Option<HandshakeOutcome>>,
    first_plaintext_done: AtomicBool,
    shutdown_notified: AtomicBool,
    rehandshake_requested: AtomicBool,
    callbacks: SessionCallbacks,
}

/// One DTLS session core instance: construction spawns the worker thread
/// immediately, in `SETUP`.
pub struct Session {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Spawn a session with no audit sink (the default).
    pub fn spawn(
        role: Role,
        socket: Arc<dyn PacketSocket>,
        config: SessionConfig,
        callbacks: SessionCallbacks,
        dh_params_future: Option<DhParamsFuture>,
    ) -> Self {
        Self::spawn_with_audit(
            role,
            socket,
            config,
            callbacks,
            dh_params_future,
            Arc::new(NoOpAuditSink),
        )
    }

    /// Spawn a session with an explicit audit sink.
    pub fn spawn_with_audit(
        role: Role,
        socket: Arc<dyn PacketSocket>,
        config: SessionConfig,
        callbacks: SessionCallbacks,
        dh_params_future: Option<DhParamsFuture>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let shared = Arc::new(Shared {
            role,
            state: AtomicSessionState::new(SessionState::Setup),
            rx_queue: RxQueue::new(),
            reorder: ReorderBuffer::new(),
            stats: SessionStats::default(),
            audit,
            socket,
            record_io: Mutex::new(None),
            pending_outcome: Mutex::new(None),
            first_plaintext_done: AtomicBool::new(false),
            shutdown_notified: AtomicBool::new(false),
            rehandshake_requested: AtomicBool::new(false),
            callbacks,
        });

        let worker_shared = shared.clone();
        let handle = thread::spawn(move || run_worker(worker_shared, role, config, dh_params_future));

        Session {
            shared,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Current FSM state.
    pub fn state(&self) -> SessionState {
        self.shared.state.load()
    }

    /// Snapshot the session's atomic counters.
    pub fn stats(&self) -> SessionStatsSnapshot {
        self.shared
            .stats
            .snapshot(self.shared.rx_queue.dropped_count())
    }

    /// External ingress point: feed a raw datagram the transport received
    /// into the session. Non-blocking; overflow drops the oldest queued
    /// datagram per [`RxQueue`]'s policy.
    pub fn push_rx(&self, datagram: Vec<u8>) {
        self.shared.stats.rx_packets.fetch_add(1, Ordering::Relaxed);
        self.shared
            .stats
            .rx_bytes
            .fetch_add(datagram.len() as u64, Ordering::Relaxed);
        self.shared.rx_queue.push(datagram);
    }

    /// Seal and send `plaintext`, fragmenting across records as needed. Only
    /// valid in `ESTABLISHED`.
    pub fn send(&self, plaintext: &[u8]) -> SessionResult<()> {
        let state = self.shared.state.load();
        if state != SessionState::Established {
            return Err(SessionError::InvalidState(state));
        }
        let record_io = self
            .shared
            .record_io
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(SessionError::InvalidState(SessionState::Established))?;
        record_io.send(self.shared.socket.as_ref(), plaintext)?;
        self.shared.stats.tx_packets.fetch_add(1, Ordering::Relaxed);
        self.shared
            .stats
            .tx_bytes
            .fetch_add(plaintext.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Ask the peer to return to `HANDSHAKE`, and arrange for this session's
    /// own worker to follow it there. Only valid in `ESTABLISHED`.
    pub fn request_rehandshake(&self) -> SessionResult<()> {
        let state = self.shared.state.load();
        if state != SessionState::Established {
            return Err(SessionError::InvalidState(state));
        }
        self.shared
            .socket
            .send_to(&[MSG_REHANDSHAKE])
            .map_err(|_| SessionError::Transient("rehandshake request send failed"))?;
        self.shared
            .rehandshake_requested
            .store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Force the session to `SHUTDOWN`. Idempotent: the state-change callback
    /// fires at most once regardless of how many times this is called.
    pub fn stop(&self) {
        let prior = self.shared.state.load();
        self.shared.state.force_shutdown();
        // Wakes a worker blocked in RxQueue::pop_timeout immediately rather
        // than waiting out whatever timeout it's currently inside.
        self.shared.rx_queue.push(Vec::new());
        notify_state_change(&self.shared, prior, SessionState::Shutdown);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = handle.join();
        }
    }
}

fn notify_state_change(shared: &Arc<Shared>, from: SessionState, to: SessionState) {
    if from == to {
        return;
    }
    if to == SessionState::Shutdown {
        // Compare-and-swap style guard: only the caller that flips this from
        // false to true gets to fire the callback, so a racing stop() and a
        // worker-driven fatal transition never double-notify.
        if shared.shutdown_notified.swap(true, Ordering::SeqCst) {
            return;
        }
    }
    tracing::info!(?from, ?to, "session state transition");
    if let Some(cb) = &shared.callbacks.on_state_change {
        cb(to);
    }
    if to == SessionState::Shutdown {
        shared.audit.log(AuditEntry::new(AuditEvent::ShutdownForced {
            cause: format!("{:?}", from),
        }));
    }
}

fn load_certificate_credentials(params: &CertificateParams) -> SessionResult<Credentials> {
    let ca_trust_path = params
        .ca_trust_path
        .as_ref()
        .ok_or(SessionError::Resource(
            "certificate credentials requested without a ca trust path",
        ))?;
    let ca_trust = CaTrust::load(ca_trust_path)?;
    let local_chain = match (&params.local_certificate_chain, &params.local_private_key) {
        (Some(chain), Some(key)) => Some(LocalCertChain::new(chain.clone(), key.clone())),
        _ => None,
    };
    Ok(Credentials::certificate(
        ca_trust,
        params.peer_ca_store.clone(),
        local_chain,
    ))
}

fn install_record_io(shared: &Arc<Shared>, keys: &SessionKeys, role: Role) {
    let (own_key, own_prefix, peer_key, peer_prefix) = match role {
        Role::Client => (
            &keys.client_write_key,
            keys.client_nonce_prefix,
            &keys.server_write_key,
            keys.server_nonce_prefix,
        ),
        Role::Server => (
            &keys.server_write_key,
            keys.server_nonce_prefix,
            &keys.client_write_key,
            keys.client_nonce_prefix,
        ),
    };
    let initial_payload = DTLS_MTU
        .saturating_sub(UDP_HEADER_SIZE)
        .saturating_sub(RECORD_OVERHEAD);
    match RecordIo::new(own_key, own_prefix, peer_key, peer_prefix, initial_payload) {
        Ok(record_io) => {
            *shared
                .record_io
                .lock()
                .unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(record_io));
        }
        Err(err) => tracing::error!(%err, "failed to install record io after handshake"),
    }
}

fn deliver(callbacks: &SessionCallbacks, delivered: Vec<(u64, Vec<u8>)>) {
    for (_, payload) in delivered {
        if let Some(cb) = &callbacks.on_rx_data {
            cb(&payload);
        }
    }
}

fn run_worker(
    shared: Arc<Shared>,
    role: Role,
    config: SessionConfig,
    mut dh_params_future: Option<DhParamsFuture>,
) {
    let fed_socket = RxFedSocket {
        socket: shared.socket.as_ref(),
        rx_queue: &shared.rx_queue,
    };
    let handshake_timeout = config.wire_profile.effective_handshake_timeout();
    let mut credentials: Option<Credentials> = None;
    let mut prior_finished: Option<[u8; 32]> = None;

    loop {
        let current = shared.state.load();
        if current == SessionState::Shutdown {
            break;
        }

        let next = match current {
            SessionState::Setup => {
                let (next, creds) =
                    handle_setup(&mut dh_params_future, handshake_timeout, &config, role);
                credentials = creds;
                next
            }
            SessionState::Cookie => {
                let creds = credentials
                    .as_ref()
                    .expect("credentials installed before entering COOKIE");
                handle_cookie(&shared, creds, &fed_socket, &config.component_id)
            }
            SessionState::Handshake => {
                let creds = credentials
                    .as_mut()
                    .expect("credentials installed before entering HANDSHAKE");
                handle_handshake(
                    &shared,
                    role,
                    creds,
                    &config,
                    &fed_socket,
                    handshake_timeout,
                    &mut prior_finished,
                )
            }
            SessionState::MtuDiscovery => handle_mtu_discovery(&shared, &fed_socket, role),
            SessionState::Established => handle_established(&shared, &fed_socket, role),
            SessionState::Shutdown => SessionState::Shutdown,
        };

        let actual = shared.state.transition(current, next);
        notify_state_change(&shared, current, actual);
        if actual == SessionState::Shutdown {
            break;
        }
    }
}

fn handle_setup(
    dh_params_future: &mut Option<DhParamsFuture>,
    setup_timeout: Duration,
    config: &SessionConfig,
    role: Role,
) -> (SessionState, Option<Credentials>) {
    if let Some(future) = dh_params_future.take() {
        if let Err(err) = future.resolve(setup_timeout) {
            tracing::error!(%err, "dh parameter generation failed during setup");
            return (SessionState::Shutdown, None);
        }
    }

    let credentials = if config.wire_profile.anonymous_first {
        Credentials::anonymous()
    } else {
        match load_certificate_credentials(&config.certificate) {
            Ok(creds) => creds,
            Err(err) => {
                tracing::error!(%err, "failed to load certificate credentials during setup");
                return (SessionState::Shutdown, None);
            }
        }
    };

    let next = match role {
        Role::Server => SessionState::Cookie,
        Role::Client => SessionState::Handshake,
    };
    (next, Some(credentials))
}

fn handle_cookie(
    shared: &Arc<Shared>,
    credentials: &Credentials,
    fed_socket: &dyn PacketSocket,
    component_id: &[u8],
) -> SessionState {
    let gate = crate::cookie::CookieGate::new();

    loop {
        if shared.state.load() == SessionState::Shutdown {
            return SessionState::Shutdown;
        }

        let datagram = match fed_socket.recv_timeout(COOKIE_TIMEOUT) {
            Some(d) => d,
            None => return SessionState::Shutdown,
        };
        gate.record_and_pace(datagram.len());

        let parsed = match handshake::decode_client_hello(&datagram) {
            Ok(parsed) => parsed,
            Err(_) => {
                tracing::warn!("dropped malformed client hello in cookie state");
                continue;
            }
        };

        let cookie_bytes = parsed.cookie.clone().unwrap_or_default();
        if gate.verify(component_id, &parsed.client_random, &cookie_bytes) {
            let driver = HandshakeDriver::new(fed_socket, Role::Server);
            // COOKIE only ever runs once, before this session's first
            // handshake round, so there is no prior round to bind to yet.
            return match driver.complete_server(credentials, &parsed, shared.callbacks.verify_certificate.as_deref(), None) {
                Ok(outcome) => {
                    *shared
                        .pending_outcome
                        .lock()
                        .unwrap_or_else(|e| e.into_inner()) = Some(outcome);
                    SessionState::Handshake
                }
                Err(err) => {
                    tracing::error!(%err, "failed to complete handshake after cookie verification");
                    SessionState::Shutdown
                }
            };
        }

        shared.stats.cookie_rejections.fetch_add(1, Ordering::Relaxed);
        shared.audit.log(AuditEntry::new(AuditEvent::CookieRejected));
        let challenge = gate.generate(component_id, &parsed.client_random);
        if fed_socket
            .send_to(&handshake::encode_cookie_challenge(&challenge))
            .is_err()
        {
            tracing::warn!("failed to send cookie challenge");
        }
    }
}

fn handle_handshake(
    shared: &Arc<Shared>,
    role: Role,
    credentials: &mut Credentials,
    config: &SessionConfig,
    fed_socket: &dyn PacketSocket,
    handshake_timeout: Duration,
    prior_finished: &mut Option<[u8; 32]>,
) -> SessionState {
    shared.audit.log(AuditEntry::new(AuditEvent::HandshakeStarted));

    let pending = shared
        .pending_outcome
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .take();

    let result = match pending {
        Some(outcome) => Ok(outcome),
        None => {
            let driver = HandshakeDriver::new(fed_socket, role);
            let verify = shared.callbacks.verify_certificate.as_deref();
            match role {
                Role::Client => {
                    let local_cert = config.certificate.local_certificate_chain.as_deref();
                    driver.run_client(handshake_timeout, verify, true, local_cert, *prior_finished)
                }
                Role::Server => {
                    driver.run_server(credentials, handshake_timeout, verify, *prior_finished)
                }
            }
        }
    };

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => {
            if shared.state.load() == SessionState::Shutdown {
                return SessionState::Shutdown;
            }
            if err.is_transient() || matches!(err, SessionError::Timeout(_)) {
                return SessionState::Handshake;
            }
            tracing::error!(%err, "handshake failed, shutting down");
            return SessionState::Shutdown;
        }
    };

    if !outcome.safe_renegotiation {
        tracing::error!("peer did not confirm safe renegotiation, possible downgrade attack");
        return SessionState::Shutdown;
    }

    *prior_finished = Some(outcome.finished_verify_data);

    if outcome.negotiated_kind == CredentialKind::Anonymous && config.wire_profile.anonymous_first {
        match load_certificate_credentials(&config.certificate) {
            Ok(cert_credentials) => {
                *credentials = cert_credentials;
                tracing::info!("anonymous handshake complete, renegotiating to certificate credentials");
                shared.audit.log(AuditEntry::new(AuditEvent::Renegotiated));
                return SessionState::Handshake;
            }
            Err(err) => {
                tracing::error!(%err, "failed to load certificate credentials for renegotiation");
                return SessionState::Shutdown;
            }
        }
    }

    if outcome.negotiated_kind == CredentialKind::Certificate {
        if let Some(cb) = &shared.callbacks.on_certificates_update {
            let local = match &*credentials {
                Credentials::Certificate(bundle) => bundle
                    .local_chain
                    .as_ref()
                    .map(|c| c.certificate_chain.as_slice()),
                Credentials::Anonymous => None,
            };
            let remote = outcome.peer_certificate_chain.as_deref();
            cb(local, remote, remote.is_some() as usize);
        }
    }

    install_record_io(shared, &outcome.keys, role);

    shared.audit.log(AuditEntry::new(AuditEvent::HandshakeCompleted {
        via: match outcome.negotiated_kind {
            CredentialKind::Anonymous => "anonymous".to_string(),
            CredentialKind::Certificate => "certificate".to_string(),
        },
    }));

    SessionState::MtuDiscovery
}

fn handle_mtu_discovery(shared: &Arc<Shared>, fed_socket: &dyn PacketSocket, role: Role) -> SessionState {
    let outcome = match role {
        Role::Client => match PmtuProbe::probe_client(fed_socket, true) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(%err, "pmtu discovery failed");
                return SessionState::Shutdown;
            }
        },
        // The server never probes; it starts at the floor and refines its
        // estimate from pings tallied once in ESTABLISHED.
        Role::Server => PmtuProbe::infer_server(0, fed_socket.transport_overhead()),
    };

    {
        let guard = shared.record_io.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(record_io) => record_io.set_max_payload(outcome.max_payload),
            None => {
                tracing::error!("entered MTU_DISCOVERY without an installed record io");
                return SessionState::Shutdown;
            }
        }
    }

    shared.audit.log(AuditEntry::new(AuditEvent::PmtudComplete {
        mtu: outcome.dtls_mtu,
    }));

    SessionState::Established
}

fn handle_established(shared: &Arc<Shared>, fed_socket: &dyn PacketSocket, role: Role) -> SessionState {
    let record_io = match shared
        .record_io
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
    {
        Some(record_io) => record_io,
        None => {
            tracing::error!("entered ESTABLISHED without an installed record io");
            return SessionState::Shutdown;
        }
    };

    loop {
        if shared.state.load() == SessionState::Shutdown {
            return SessionState::Shutdown;
        }

        if shared.rehandshake_requested.swap(false, Ordering::SeqCst) {
            tracing::info!("local rehandshake request, returning to handshake");
            return SessionState::Handshake;
        }

        let raw = match fed_socket.recv_timeout(ESTABLISHED_POLL_INTERVAL) {
            Some(raw) => raw,
            None => {
                deliver(&shared.callbacks, shared.reorder.flush());
                continue;
            }
        };

        if raw.len() == 1 && raw[0] == MSG_REHANDSHAKE {
            tracing::info!("peer requested rehandshake");
            return SessionState::Handshake;
        }

        if PmtuProbe::reply_if_ping(fed_socket, &raw) {
            shared.stats.pings_received.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        match record_io.open(&raw) {
            Ok((seq, plaintext)) => {
                if role == Role::Server && !shared.first_plaintext_done.swap(true, Ordering::SeqCst)
                {
                    let overhead = fed_socket.transport_overhead();
                    let outcome = PmtuProbe::infer_server(
                        shared.stats.pings_received.load(Ordering::Relaxed),
                        overhead,
                    );
                    record_io.set_max_payload(outcome.max_payload);
                    shared.audit.log(AuditEntry::new(AuditEvent::PmtudComplete {
                        mtu: outcome.dtls_mtu,
                    }));
                }
                deliver(&shared.callbacks, shared.reorder.insert_and_flush(seq, plaintext));
            }
            Err(err) if err.is_transient() => continue,
            Err(err) => {
                tracing::error!(%err, "record layer error in established state");
                return SessionState::Shutdown;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WireProfile;
    use crate::socket::LoopbackSocket;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn cert_only_config(ca_trust_path: std::path::PathBuf) -> SessionConfig {
        SessionConfig {
            wire_profile: WireProfile {
                anonymous_first: false,
                handshake_timeout_ms: 2_000,
            },
            certificate: CertificateParams {
                ca_trust_path: Some(ca_trust_path),
                peer_ca_store: None,
                local_certificate_chain: None,
                local_private_key: None,
            },
            component_id: b"component-test".to_vec(),
        }
    }

    fn write_temp_ca_trust() -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "dtls-session-core-test-ca-{:?}-{}",
            std::thread::current().id(),
            crate::crypto::random::random_bytes(8)
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect::<String>()
        ));
        std::fs::write(&path, [0x30u8, 0x82, 0x01, 0x0a]).unwrap();
        path
    }

    #[test]
    fn client_and_server_reach_established_and_exchange_data() {
        let (client_socket, server_socket) = LoopbackSocket::pair();
        let ca_path = write_temp_ca_trust();

        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        let server_callbacks = SessionCallbacks::builder()
            .on_rx_data(move |payload| received_clone.lock().unwrap().push(payload.to_vec()))
            .build();

        let server = Session::spawn(
            Role::Server,
            Arc::new(server_socket),
            cert_only_config(ca_path.clone()),
            server_callbacks,
            None,
        );
        let client_ca_path = write_temp_ca_trust();
        let client = Session::spawn(
            Role::Client,
            Arc::new(client_socket),
            cert_only_config(client_ca_path.clone()),
            SessionCallbacks::builder().build(),
            None,
        );

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while client.state() != SessionState::Established
            || server.state() != SessionState::Established
        {
            assert!(std::time::Instant::now() < deadline, "handshake never completed");
            std::thread::sleep(Duration::from_millis(10));
        }

        client.send(b"hello from the other side").unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            if !received.lock().unwrap().is_empty() {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "payload never arrived");
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(
            received.lock().unwrap()[0],
            b"hello from the other side".to_vec()
        );

        let _ = std::fs::remove_file(&ca_path);
        let _ = std::fs::remove_file(&client_ca_path);
    }

    #[test]
    fn stop_notifies_state_change_exactly_once() {
        let (client_socket, _server_socket) = LoopbackSocket::pair();
        let ca_path = write_temp_ca_trust();
        let notifications = Arc::new(AtomicUsize::new(0));
        let notifications_clone = notifications.clone();
        let callbacks = SessionCallbacks::builder()
            .on_state_change(move |state| {
                if state == SessionState::Shutdown {
                    notifications_clone.fetch_add(1, Ordering::SeqCst);
                }
            })
            .build();

        let session = Session::spawn(
            Role::Client,
            Arc::new(client_socket),
            cert_only_config(ca_path.clone()),
            callbacks,
            None,
        );

        session.stop();
        session.stop();
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(notifications.load(Ordering::SeqCst), 1);
        let _ = std::fs::remove_file(&ca_path);
    }

    #[test]
    fn send_before_established_is_rejected() {
        let (client_socket, _server_socket) = LoopbackSocket::pair();
        let ca_path = write_temp_ca_trust();
        let session = Session::spawn(
            Role::Client,
            Arc::new(client_socket),
            cert_only_config(ca_path.clone()),
            SessionCallbacks::builder().build(),
            None,
        );
        let result = session.send(b"too early");
        assert!(matches!(result, Err(SessionError::InvalidState(_))));
        session.stop();
        let _ = std::fs::remove_file(&ca_path);
    }
}
