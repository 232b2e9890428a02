//! Client join/session loop (SPEC_FULL.md §4.8, §4.11): drives the handshake, sends
//! the join messages, then runs two concurrent halves for the connection's
//! lifetime — a single task that owns `transport.recv()` (mirroring
//! `server::Server::receive_loop`'s single-reader contract, so keepalive emission
//! and rekey-threshold checking share a `tokio::select!` with the only `recv()`
//! call rather than racing a second task for it) and a separate upload task that
//! sends captured video/audio, which never competes for `recv()` since
//! `Transport::send` serializes through its own internal lock.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use tokio::sync::Mutex as AsyncMutex;

use crate::client::capture::{self, AudioSource, VideoSourceKind};
use crate::client::playback::AudioSink;
use crate::client::terminal::TerminalView;
use crate::codec::new_codec;
use crate::crypto::handshake::{self, ClientHandshakeConfig, RekeyRole, Role};
use crate::crypto::known_hosts::{HostId, KnownHosts};
use crate::media::SAMPLES_PER_CHUNK;
use crate::protocol::{AudioOpusBatchPayload, ClientJoinPayload, ImageFramePayload, PacketType, RekeyRequestPayload};
use crate::session::{Capabilities, DisplayName};
use crate::transport::{tcp, Transport};

const HANDSHAKE_STEP_TIMEOUT: Duration = Duration::from_secs(10);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);
const REKEY_BYTE_THRESHOLD: u64 = 1 << 30; // ~1 GiB
const REKEY_PACKET_THRESHOLD: u64 = 1 << 24;
const UPLOAD_AUDIO_PERIOD: Duration = Duration::from_millis(20);

/// Everything `run` needs to join a server and drive one session to completion.
pub struct JoinConfig {
    pub target: String,
    pub display_name: DisplayName,
    pub capabilities: Capabilities,
    pub identity: Option<SigningKey>,
    pub password: Option<String>,
    pub insecure_no_verify: bool,
    pub no_encrypt: bool,
    pub known_hosts_path: PathBuf,
    pub video_source: Option<VideoSourceKind>,
}

async fn resolve(target: &str) -> std::io::Result<std::net::SocketAddr> {
    tokio::net::lookup_host(target)
        .await?
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, format!("could not resolve {target}")))
}

/// Connects, handshakes, joins, and runs the session until the transport closes or
/// the peer evicts it.
pub async fn run(config: JoinConfig, mut sink: Box<dyn AudioSink>) -> Result<(), crate::AppError> {
    let addr = resolve(&config.target).await?;
    let (transport, local_addr) = tcp::connect(addr).await?;
    let transport = Arc::new(transport);

    // SPEC_FULL.md §3: the client assigns its own id, derived from its local
    // source port, and echoes it in the header of every packet it sends.
    let client_id = local_addr.port() as u32;
    let hostname = config.target.rsplit_once(':').map(|(host, _)| host).unwrap_or(&config.target);
    let host_id = HostId::new(hostname, addr.ip().to_string(), addr.port());

    let mut known_hosts = KnownHosts::load(&config.known_hosts_path).unwrap_or_default();
    if config.insecure_no_verify {
        tracing::warn!("skipping host key verification: --insecure-no-verify is set");
    }
    {
        let mut handshake_config = ClientHandshakeConfig {
            host: host_id,
            known_hosts: &mut known_hosts,
            insecure_no_verify: config.insecure_no_verify,
            identity: config.identity.as_ref(),
            password: config.password.clone(),
            step_timeout: HANDSHAKE_STEP_TIMEOUT,
            no_encrypt: config.no_encrypt,
            client_id,
        };
        handshake::client_handshake(&transport, &mut handshake_config).await?;
    }
    let _ = known_hosts.save(&config.known_hosts_path);

    transport
        .send(
            PacketType::ClientJoin,
            client_id,
            0,
            ClientJoinPayload {
                display_name: config.display_name.as_str().to_string(),
            }
            .encode(),
        )
        .await?;
    transport
        .send(PacketType::ClientCapabilities, client_id, 0, config.capabilities.to_payload().encode())
        .await?;

    let view = Arc::new(AsyncMutex::new(TerminalView::enter()?));

    let upload_handle = if config.capabilities.wants_video || config.capabilities.wants_audio {
        Some(tokio::spawn(upload_loop(
            transport.clone(),
            config.capabilities.clone(),
            config.video_source,
            client_id,
        )))
    } else {
        None
    };

    receive_loop(&transport, view, sink.as_mut(), client_id).await;

    if let Some(handle) = upload_handle {
        handle.abort();
    }
    transport.close().await;
    Ok(())
}

/// Owns `transport.recv()` for the connection's lifetime. A periodic tick on the
/// same `select!` drives the keepalive ping and any locally-initiated rekey, so no
/// second task ever calls `recv` (SPEC_FULL.md §4.2 single-reader contract).
async fn receive_loop(transport: &Arc<Transport>, view: Arc<AsyncMutex<TerminalView>>, sink: &mut dyn AudioSink, client_id: u32) {
    let mut decoder = new_codec();
    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            recv_result = transport.recv() => {
                match recv_result {
                    Ok((packet_type, payload, _client_id)) => {
                        if !dispatch(transport, &view, &mut *decoder, sink, packet_type, payload, client_id).await {
                            return;
                        }
                    }
                    Err(_) => return,
                }
            }
            _ = keepalive.tick() => {
                if transport.send(PacketType::Ping, client_id, 0, vec![]).await.is_err() {
                    return;
                }
                let should_rekey = transport.sent_byte_count() >= REKEY_BYTE_THRESHOLD
                    || transport.sent_packet_count().await >= REKEY_PACKET_THRESHOLD;
                if should_rekey {
                    if handshake::rekey(transport, Role::Client, RekeyRole::Initiator, client_id, HANDSHAKE_STEP_TIMEOUT).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

async fn dispatch(
    transport: &Arc<Transport>,
    view: &Arc<AsyncMutex<TerminalView>>,
    decoder: &mut dyn crate::codec::OpusCodec,
    sink: &mut dyn AudioSink,
    packet_type: PacketType,
    payload: Vec<u8>,
    client_id: u32,
) -> bool {
    match packet_type {
        PacketType::AsciiFrame => {
            let frame = match crate::protocol::AsciiFramePayload::decode(&payload) {
                Ok(frame) => frame,
                Err(err) => {
                    tracing::warn!(error = %err, "malformed AsciiFrame");
                    return true;
                }
            };
            match frame.decoded_text() {
                Ok(glyphs) => {
                    let _ = view.lock().await.write_frame(&glyphs);
                }
                Err(err) => tracing::warn!(error = %err, "undecodable AsciiFrame"),
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
                    sink.play(&samples);
                }
            }
        }
        PacketType::ServerState => {
            if let Ok(state) = crate::protocol::ServerStatePayload::decode(&payload) {
                tracing::info!(active = state.active_clients, max = state.max_clients, "server state");
            }
        }
        PacketType::Ping => {
            let _ = transport.send(PacketType::Pong, client_id, 0, vec![]).await;
        }
        PacketType::Pong => {}
        PacketType::ClearConsole => {
            let _ = view.lock().await.clear();
        }
        PacketType::RekeyRequest => {
            let request = match RekeyRequestPayload::decode(&payload) {
                Ok(request) => request,
                Err(err) => {
                    tracing::warn!(error = %err, "malformed RekeyRequest");
                    return true;
                }
            };
            if handshake::rekey_respond(transport, Role::Client, client_id, HANDSHAKE_STEP_TIMEOUT, request)
                .await
                .is_err()
            {
                return false;
            }
        }
        other => {
            tracing::debug!(packet_type = ?other, "unexpected packet type from server");
        }
    }
    true
}

/// Sends captured video and audio for the session's lifetime. Runs as its own
/// task; `Transport::send` locks only the write half, so this never contends with
/// `receive_loop`'s read-side `recv()`.
async fn upload_loop(transport: Arc<Transport>, capabilities: Capabilities, video_source: Option<VideoSourceKind>, client_id: u32) {
    let video_rx = if capabilities.wants_video {
        let kind = video_source.unwrap_or(VideoSourceKind::Webcam);
        match capture::open_source(&kind, capabilities.width as u32, capabilities.height as u32) {
            Ok(source) => {
                let period = Duration::from_secs_f64(1.0 / capabilities.clamped_fps() as f64);
                Some(capture::spawn_capture_thread(source, period))
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to open video source");
                None
            }
        }
    } else {
        None
    };

    let audio_rx = if capabilities.wants_audio {
        let source: Box<dyn AudioSource> = Box::new(capture::SilenceSource::new(SAMPLES_PER_CHUNK));
        Some(capture::spawn_audio_capture_thread(source, UPLOAD_AUDIO_PERIOD))
    } else {
        None
    };

    if video_rx.is_none() && audio_rx.is_none() {
        return;
    }

    let mut encoder = new_codec();

    loop {
        tokio::select! {
            frame = async { match &video_rx { Some(rx) => capture::recv_frame(rx).await, None => std::future::pending::<Option<crate::media::Frame>>().await } } => {
                let Some(frame) = frame else { return };
                let payload = ImageFramePayload {
                    width: frame.width,
                    height: frame.height,
                    compressed_flag: 0,
                    bytes: frame.rgb.clone(),
                };
                if transport.send(PacketType::ImageFrame, client_id, 0, payload.encode()).await.is_err() {
                    return;
                }
            }
            chunk = async { match &audio_rx { Some(rx) => capture::recv_chunk(rx).await, None => std::future::pending::<Option<Vec<f32>>>().await } } => {
                let Some(chunk) = chunk else { return };
                let Ok(encoded) = encoder.encode(&chunk) else { continue };
                let payload = AudioOpusBatchPayload {
                    sample_rate: crate::media::SAMPLE_RATE,
                    frame_duration_ms: 20,
                    frame_sizes: vec![encoded.len() as u16],
                    opus_bytes: encoded,
                };
                if transport.send(PacketType::AudioOpusBatch, client_id, 0, payload.encode()).await.is_err() {
                    return;
                }
            }
        }
    }
}
