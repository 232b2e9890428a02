//! Server runtime (SPEC_FULL.md §4.4-§4.7): accepts connections, drives each
//! client through the handshake and join, and spawns the render task that runs
//! for the session's lifetime. Grounded in the teacher's accept-loop-plus-one-
//! task-per-connection shape; no teacher module owns a registry quite like this
//! one (see `session::registry`'s own grounding note).

pub mod audio_mixer;
pub mod compositor;
pub mod scheduler;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::{SigningKey, VerifyingKey};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use crate::codec::new_codec;
use crate::config::ServerConfig;
use crate::crypto::handshake::{self, ClientAuthPolicy, Role, RekeyRole, ServerHandshakeConfig};
use crate::media::{AudioChunk, Frame};
use crate::protocol::{
    AudioOpusBatchPayload, ClientCapabilitiesPayload, ClientJoinPayload, ImageFramePayload, PacketType,
    RekeyRequestPayload, ServerStatePayload,
};
use crate::session::{AdmitError, Capabilities, ClientId, DisplayName, Session, SessionRegistry, SessionState};
use crate::telemetry::metrics;
use crate::transport::{tcp, Transport, TransportError};

const HANDSHAKE_STEP_TIMEOUT: Duration = Duration::from_secs(10);
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const IDLE_TIMEOUT: Duration = Duration::from_secs(15);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);
const REKEY_BYTE_THRESHOLD: u64 = 1 << 30; // ~1 GiB
const REKEY_PACKET_THRESHOLD: u64 = 1 << 24;

fn now_micros() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// What the server requires of a connecting client (SPEC_FULL.md §4.3.5), held as
/// owned data so a fresh `ClientAuthPolicy` can be built for every connection
/// without requiring `ClientAuthPolicy` itself to implement `Clone`.
enum AuthMode {
    None,
    Ed25519(Vec<VerifyingKey>),
    Password(String),
}

impl AuthMode {
    fn policy(&self) -> ClientAuthPolicy {
        match self {
            AuthMode::None => ClientAuthPolicy::None,
            AuthMode::Ed25519(allowed) => ClientAuthPolicy::Ed25519 { allowed: allowed.clone() },
            AuthMode::Password(password) => ClientAuthPolicy::Password { password: password.clone() },
        }
    }
}

/// The running server: owns the session registry and the long-term identity/auth
/// material every accepted connection is handshaked against.
pub struct Server {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    identity: Option<SigningKey>,
    auth: AuthMode,
}

impl Server {
    pub fn new(config: ServerConfig, identity: Option<SigningKey>, allowed_keys: Vec<VerifyingKey>) -> Self {
        let auth = match (&config.password, allowed_keys.is_empty()) {
            (Some(password), _) => AuthMode::Password(password.clone()),
            (None, false) => AuthMode::Ed25519(allowed_keys),
            (None, true) => AuthMode::None,
        };
        let max_clients = config.max_clients;
        Self {
            config,
            registry: Arc::new(SessionRegistry::new(max_clients)),
            identity,
            auth,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Runs the accept loop until `shutdown` fires. One task per accepted
    /// connection; the loop itself never blocks on a single client.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> std::io::Result<()> {
        let addr = SocketAddr::new(self.config.address, self.config.port);
        let listener = tcp::bind(addr).await?;
        tracing::info!(%addr, "listening");
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, _) = accepted?;
                    let server = self.clone();
                    let client_shutdown = shutdown.resubscribe();
                    tokio::spawn(async move {
                        server.accept_connection(stream, client_shutdown).await;
                    });
                }
                _ = shutdown.recv() => {
                    tracing::info!("shutdown signal received, no longer accepting connections");
                    return Ok(());
                }
            }
        }
    }

    async fn accept_connection(self: Arc<Self>, stream: TcpStream, shutdown: broadcast::Receiver<()>) {
        let (transport, peer) = match tcp::from_accepted(stream) {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(error = %err, "failed to prepare accepted socket");
                return;
            }
        };
        let transport = Arc::new(transport);
        // The real client id is assigned only once `ClientJoin` arrives; every
        // handshake-phase packet uses the placeholder id 0, which the client side
        // follows too before it has been told otherwise.
        let handshake_config = ServerHandshakeConfig {
            identity: self.identity.as_ref(),
            auth: self.auth.policy(),
            step_timeout: HANDSHAKE_STEP_TIMEOUT,
            no_encrypt: self.config.no_encrypt,
        };
        if let Err(err) = handshake::server_handshake(&transport, 0, &handshake_config).await {
            tracing::warn!(%peer, error = %err, "handshake failed");
            metrics::global().handshake_failures.with_label_values(&[auth_failure_label(&err)]).inc();
            transport.close().await;
            return;
        }

        self.run_session(transport, peer, shutdown).await;
    }

    async fn run_session(self: Arc<Self>, transport: Arc<Transport>, peer: SocketAddr, mut shutdown: broadcast::Receiver<()>) {
        let client_id = match tokio::time::timeout(JOIN_TIMEOUT, recv_join(&transport)).await {
            Ok(Ok((client_id, display_name, caps))) => {
                let session = Arc::new(Session::new(client_id, transport.clone()));
                session.set_join_info(display_name, caps);
                match self.registry.admit(session.clone()) {
                    Ok(id) => id,
                    Err(AdmitError::Full) => {
                        let state = ServerStatePayload {
                            active_clients: self.registry.active_count(),
                            max_clients: self.registry.max_clients(),
                        };
                        let _ = transport.send(PacketType::ServerState, client_id.0, 0, state.encode()).await;
                        transport.close().await;
                        return;
                    }
                    Err(AdmitError::Duplicate(id)) => {
                        tracing::warn!(client_id = id, "duplicate client id rejected");
                        transport.close().await;
                        return;
                    }
                }
            }
            Ok(Err(err)) => {
                tracing::warn!(%peer, error = %err, "join failed");
                transport.close().await;
                return;
            }
            Err(_) => {
                tracing::warn!(%peer, "timed out waiting for ClientJoin");
                transport.close().await;
                return;
            }
        };

        let session = match self.registry.get(client_id) {
            Some(session) => session,
            None => return,
        };
        tracing::info!(
            client_id = client_id.0,
            display_name = session.display_name().map(|n| n.as_str().to_string()).unwrap_or_default(),
            "client admitted"
        );
        self.broadcast_server_state().await;

        let scheduler_handle = tokio::spawn(scheduler::run(session.clone(), self.registry.clone()));

        tokio::select! {
            _ = self.receive_loop(session.clone(), transport.clone()) => {}
            _ = shutdown.recv() => {}
        }

        scheduler_handle.abort();
        session.set_state(SessionState::Closed);
        transport.close().await;
        self.registry.evict(client_id);
        self.broadcast_server_state().await;
        tracing::info!(client_id = client_id.0, "client evicted");
    }

    async fn broadcast_server_state(&self) {
        let state = ServerStatePayload {
            active_clients: self.registry.active_count(),
            max_clients: self.registry.max_clients(),
        };
        for session in self.registry.snapshot_active() {
            let _ = session.transport.send(PacketType::ServerState, session.client_id.0, 0, state.encode()).await;
        }
    }

    /// Owns `transport.recv()` for the lifetime of the session (SPEC_FULL.md §4.2
    /// single-reader contract). A periodic tick on the same `select!` drives the
    /// keepalive ping and any locally-initiated rekey, so no second task ever calls
    /// `recv` and the two concerns never race for the next byte on the wire.
    async fn receive_loop(&self, session: Arc<Session>, transport: Arc<Transport>) {
        let mut decoder = new_codec();
        let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
        keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if session.is_closed() {
                return;
            }
            tokio::select! {
                recv_result = transport.recv() => {
                    match recv_result {
                        Ok((packet_type, payload, _client_id)) => {
                            if !self.dispatch(&session, &transport, &mut *decoder, packet_type, payload).await {
                                return;
                            }
                        }
                        Err(_) => return,
                    }
                }
                _ = keepalive.tick() => {
                    if transport.send(PacketType::Ping, session.client_id.0, 0, vec![]).await.is_err() {
                        return;
                    }
                    let idle = now_micros().saturating_sub(session.mailbox.last_any_packet_ts_micros());
                    if idle > IDLE_TIMEOUT.as_micros() as u64 {
                        tracing::info!(client_id = session.client_id.0, "idle timeout");
                        return;
                    }
                    let should_rekey = transport.sent_byte_count() >= REKEY_BYTE_THRESHOLD
                        || transport.sent_packet_count().await >= REKEY_PACKET_THRESHOLD;
                    if should_rekey {
                        match handshake::rekey(&transport, Role::Server, RekeyRole::Initiator, session.client_id.0, HANDSHAKE_STEP_TIMEOUT).await {
                            Ok(()) => metrics::global().rekeys_completed.inc(),
                            Err(err) => {
                                tracing::warn!(client_id = session.client_id.0, error = %err, "rekey failed");
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn dispatch(
        &self,
        session: &Arc<Session>,
        transport: &Arc<Transport>,
        decoder: &mut dyn crate::codec::OpusCodec,
        packet_type: PacketType,
        payload: Vec<u8>,
    ) -> bool {
        let now = now_micros();
        match packet_type {
            PacketType::ImageFrame => {
                let image = match ImageFramePayload::decode(&payload) {
                    Ok(image) => image,
                    Err(err) => {
                        tracing::warn!(error = %err, "malformed ImageFrame");
                        return true;
                    }
                };
                match image.decoded_rgb() {
                    Ok(rgb) => session.mailbox.write_frame(Frame::new(image.width, image.height, rgb, now), now),
                    Err(err) => tracing::warn!(error = %err, "undecodable ImageFrame"),
                }
            }
            PacketType::AudioOpusBatch => {
                let batch = match AudioOpusBatchPayload::decode(&payload) {
                    Ok(batch) => batch,
                    Err(err) => {
                        tracing::warn!(error = %err, "malformed AudioOpusBatch");
                        return true;
                    }
                };
                for frame in batch.frames() {
                    if let Ok(samples) = decoder.decode(frame) {
                        session.mailbox.push_audio(AudioChunk { samples }, now);
                    }
                }
            }
            PacketType::Ping => {
                let _ = transport.send(PacketType::Pong, session.client_id.0, 0, vec![]).await;
                session.mailbox.touch(now);
            }
            PacketType::Pong => {
                session.mailbox.touch(now);
            }
            PacketType::RekeyRequest => {
                let request = match RekeyRequestPayload::decode(&payload) {
                    Ok(request) => request,
                    Err(err) => {
                        tracing::warn!(error = %err, "malformed RekeyRequest");
                        return true;
                    }
                };
                match handshake::rekey_respond(transport, Role::Server, session.client_id.0, HANDSHAKE_STEP_TIMEOUT, request).await {
                    Ok(()) => metrics::global().rekeys_completed.inc(),
                    Err(err) => {
                        tracing::warn!(client_id = session.client_id.0, error = %err, "rekey response failed");
                        return false;
                    }
                }
            }
            PacketType::ClientJoin | PacketType::ClientCapabilities => {
                tracing::debug!(client_id = session.client_id.0, "ignoring late join packet after admission");
            }
            other => {
                tracing::debug!(client_id = session.client_id.0, packet_type = ?other, "unexpected packet type from client");
            }
        }
        true
    }
}

fn auth_failure_label(err: &crate::crypto::CryptoError) -> &'static str {
    use crate::crypto::CryptoError::*;
    match err {
        VersionMismatch { .. } => "version_mismatch",
        NoCommonSuite => "no_common_suite",
        HandshakeTimeout(_) => "timeout",
        AuthFailed(_) => "auth_failed",
        HostKeyMismatch { .. } => "host_key_mismatch",
        BadSignature => "bad_signature",
        _ => "other",
    }
}

/// Reads packets until both `ClientJoin` and `ClientCapabilities` have arrived, in
/// either order (SPEC_FULL.md §4.4). The `ClientId` is whatever the client echoed
/// in the header of those packets (SPEC_FULL.md §3: client-assigned, derived from
/// its local source port), never generated here.
async fn recv_join(transport: &Transport) -> Result<(ClientId, DisplayName, Capabilities), TransportError> {
    let mut display_name: Option<DisplayName> = None;
    let mut capabilities: Option<Capabilities> = None;
    let mut client_id: Option<ClientId> = None;

    loop {
        let (packet_type, payload, header_client_id) = transport.recv().await?;
        match packet_type {
            PacketType::ClientJoin => {
                let join = ClientJoinPayload::decode(&payload).map_err(TransportError::Wire)?;
                display_name = Some(DisplayName::new(join.display_name).map_err(|_| TransportError::Closed)?);
                client_id = Some(ClientId(header_client_id));
            }
            PacketType::ClientCapabilities => {
                let caps = ClientCapabilitiesPayload::decode(&payload).map_err(TransportError::Wire)?;
                capabilities = Some(Capabilities::from_payload(&caps));
                client_id = Some(ClientId(header_client_id));
            }
            _ => continue,
        }
        if let (Some(id), Some(name), Some(caps)) = (client_id, &display_name, &capabilities) {
            return Ok((id, name.clone(), caps.clone()));
        }
    }
}
