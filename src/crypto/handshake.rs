//! The encrypted-session handshake state machine (SPEC_FULL.md §4.3):
//! `Init -> VersionExchanged -> ParametersExchanged -> KeyExchanged -> AuthChallenged? ->
//! Ready -> (Rekeying -> Ready)* -> Closed`. No teacher file runs this exact exchange
//! (the teacher negotiates a Noise session via `snow` in
//! `transport/webrtc/secure_handshake.rs`), so the message sequence is authored
//! directly from the wire messages in `protocol::messages`; the *texture* - a running
//! transcript hash, HKDF-derived directional keys, a `HandshakeTimeout` around every
//! step, timing-safe comparisons for MACs - is carried over from that file.
//!
//! Both peers absorb the same messages in the same order (client's message, then
//! server's reply, for every round), so a transcript-hash snapshot taken by the
//! signer right before it sends its own reply is byte-identical to the snapshot the
//! other side takes right after receiving that reply. Session keys and every
//! signature/MAC in this module are bound to one of those snapshots rather than to
//! the full post-handshake transcript, so they can be taken once and re-verified by
//! the other party without either side needing to coordinate on timing.

use std::time::Duration;

use argon2::Argon2;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Sha256, Sha512};
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey};

use crate::protocol::{
    AuthChallengePayload, AuthResponsePayload, CryptoCapabilitiesPayload, CryptoParametersPayload,
    KeyExchangePayload, PacketType, ProtocolVersionPayload, RekeyRequestPayload, RekeyResponsePayload,
    AUTH_ED25519, AUTH_NONE, AUTH_PASSWORD, CIPHER_XCHACHA20POLY1305, KEX_X25519,
};
use crate::transport::{Transport, TransportError};

use super::aead::SessionKeys;
use super::known_hosts::{HostId, HostKeyStatus, KnownHosts};
use super::keys::fingerprint;
use super::transcript::Transcript;
use super::CryptoError;

/// Which side of the wire a handshake participant is playing. Determines how the
/// shared X25519 secret is split into a send key and a receive key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// The outcome of a successful handshake. Session keys are installed directly into
/// the `Transport` passed in, not returned here, since the caller never needs them
/// except through the transport.
#[derive(Debug, Default)]
pub struct HandshakeOutcome {
    pub peer_identity: Option<VerifyingKey>,
    pub host_fingerprint: Option<String>,
}

/// What the server requires of a connecting client, negotiated against the bitmap
/// the client advertises in its `CryptoCapabilities`.
pub enum ClientAuthPolicy {
    None,
    Ed25519 { allowed: Vec<VerifyingKey> },
    Password { password: String },
}

pub struct ServerHandshakeConfig<'a> {
    /// The server's long-term Ed25519 host identity. `None` means the server never
    /// proves its identity, which a client should only accept with
    /// `--insecure-no-verify`.
    pub identity: Option<&'a SigningKey>,
    pub auth: ClientAuthPolicy,
    pub step_timeout: Duration,
    /// `--no-encrypt`: advertise `supports_encryption = false` in `ProtocolVersion`.
    /// The session only runs in the clear if both peers advertise it.
    pub no_encrypt: bool,
}

pub struct ClientHandshakeConfig<'a> {
    /// TOFU lookup key: hostname, resolved IP, and port (SPEC_FULL.md §3/§6).
    pub host: HostId,
    pub known_hosts: &'a mut KnownHosts,
    pub insecure_no_verify: bool,
    pub identity: Option<&'a SigningKey>,
    pub password: Option<String>,
    pub step_timeout: Duration,
    pub no_encrypt: bool,
    /// This client's self-chosen, non-security-bearing id (SPEC_FULL.md §3:
    /// "assigned by the client, derived from its local source port"), echoed in
    /// the header of every packet this side of the handshake sends.
    pub client_id: u32,
}

const REKEY_SALT: &[u8] = b"asciichat-rekey-v1";

async fn send_step(
    transport: &Transport,
    transcript: &mut Transcript,
    client_id: u32,
    packet_type: PacketType,
    payload: Vec<u8>,
) -> Result<(), CryptoError> {
    transcript.absorb(&payload);
    transport.send(packet_type, client_id, 0, payload).await.map_err(wrap_transport_err)
}

async fn recv_step(
    transport: &Transport,
    transcript: &mut Transcript,
    timeout: Duration,
    expected: PacketType,
) -> Result<Vec<u8>, CryptoError> {
    let (packet_type, payload, _client_id) = tokio::time::timeout(timeout, transport.recv())
        .await
        .map_err(|_| CryptoError::HandshakeTimeout(timeout))?
        .map_err(wrap_transport_err)?;
    if packet_type != expected {
        return Err(CryptoError::OutOfOrder {
            expected: packet_type_name(expected),
            actual: packet_type_name(packet_type),
        });
    }
    transcript.absorb(&payload);
    Ok(payload)
}

fn wrap_transport_err(err: TransportError) -> CryptoError {
    match err {
        TransportError::Crypto(inner) => inner,
        other => CryptoError::Transport(other.to_string()),
    }
}

fn packet_type_name(packet_type: PacketType) -> &'static str {
    use PacketType::*;
    match packet_type {
        ProtocolVersion => "ProtocolVersion",
        CryptoCapabilities => "CryptoCapabilities",
        CryptoParameters => "CryptoParameters",
        KeyExchange => "KeyExchange",
        AuthChallenge => "AuthChallenge",
        AuthResponse => "AuthResponse",
        HandshakeComplete => "HandshakeComplete",
        Encrypted => "Encrypted",
        Ping => "Ping",
        Pong => "Pong",
        StreamStart => "StreamStart",
        ClientJoin => "ClientJoin",
        ClientCapabilities => "ClientCapabilities",
        ImageFrame => "ImageFrame",
        AsciiFrame => "AsciiFrame",
        AudioOpusBatch => "AudioOpusBatch",
        ServerState => "ServerState",
        RekeyRequest => "RekeyRequest",
        RekeyResponse => "RekeyResponse",
        RekeyComplete => "RekeyComplete",
        ClearConsole => "ClearConsole",
    }
}

fn derive_session_keys(shared_secret: &[u8], salt: &[u8], role: Role) -> SessionKeys {
    let hk = Hkdf::<Sha256>::new(Some(salt), shared_secret);
    let mut client_to_server = [0u8; 32];
    let mut server_to_client = [0u8; 32];
    hk.expand(b"asciichat c2s", &mut client_to_server)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    hk.expand(b"asciichat s2c", &mut server_to_client)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    match role {
        Role::Client => SessionKeys::new(client_to_server, server_to_client),
        Role::Server => SessionKeys::new(server_to_client, client_to_server),
    }
}

fn derive_password_key(password: &str, salt: &[u8]) -> Result<[u8; 32], CryptoError> {
    let mut out = [0u8; 32];
    Argon2::default()
        .hash_password_into(password.as_bytes(), salt, &mut out)
        .map_err(|err| CryptoError::Key(err.to_string()))?;
    Ok(out)
}

fn timing_safe_equal(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Drives the handshake from the client side of a freshly connected `Transport`.
pub async fn client_handshake(
    transport: &Transport,
    config: &mut ClientHandshakeConfig<'_>,
) -> Result<HandshakeOutcome, CryptoError> {
    let mut transcript = Transcript::new();
    let timeout = config.step_timeout;
    let client_id = config.client_id;

    let local_version = ProtocolVersionPayload {
        supports_encryption: !config.no_encrypt,
        ..ProtocolVersionPayload::CURRENT
    };
    send_step(transport, &mut transcript, client_id, PacketType::ProtocolVersion, local_version.encode()).await?;
    let remote_version_bytes = recv_step(transport, &mut transcript, timeout, PacketType::ProtocolVersion).await?;
    let remote_version = ProtocolVersionPayload::decode(&remote_version_bytes)?;
    if remote_version.protocol_version != local_version.protocol_version {
        return Err(CryptoError::VersionMismatch {
            local: local_version.protocol_version,
            remote: remote_version.protocol_version,
        });
    }

    if !local_version.supports_encryption || !remote_version.supports_encryption {
        recv_step(transport, &mut transcript, timeout, PacketType::HandshakeComplete).await?;
        send_step(transport, &mut transcript, client_id, PacketType::HandshakeComplete, vec![]).await?;
        return Ok(HandshakeOutcome::default());
    }

    let auth_bitmap = AUTH_NONE
        | if config.identity.is_some() { AUTH_ED25519 } else { 0 }
        | if config.password.is_some() { AUTH_PASSWORD } else { 0 };
    let capabilities = CryptoCapabilitiesPayload {
        kex_bitmap: KEX_X25519,
        auth_bitmap,
        cipher_bitmap: CIPHER_XCHACHA20POLY1305,
    };
    send_step(transport, &mut transcript, client_id, PacketType::CryptoCapabilities, capabilities.encode()).await?;
    let parameters_bytes = recv_step(transport, &mut transcript, timeout, PacketType::CryptoParameters).await?;
    let parameters = CryptoParametersPayload::decode(&parameters_bytes)?;
    if parameters.kex != KEX_X25519 || parameters.cipher != CIPHER_XCHACHA20POLY1305 {
        return Err(CryptoError::NoCommonSuite);
    }

    let ephemeral_secret = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = X25519PublicKey::from(&ephemeral_secret);
    let own_kex = KeyExchangePayload {
        ephemeral_public_key: *ephemeral_public.as_bytes(),
        host_public_key: None,
        host_signature: None,
    };
    send_step(transport, &mut transcript, client_id, PacketType::KeyExchange, own_kex.encode()).await?;
    let host_proof_snapshot = transcript.hash();
    let remote_kex_bytes = recv_step(transport, &mut transcript, timeout, PacketType::KeyExchange).await?;
    let remote_kex = KeyExchangePayload::decode(&remote_kex_bytes)?;
    let session_hash = transcript.hash();

    let host_fingerprint = verify_host_key(config, &remote_kex, &host_proof_snapshot)?;

    let shared_secret = ephemeral_secret.diffie_hellman(&X25519PublicKey::from(remote_kex.ephemeral_public_key));
    let mut session_keys = derive_session_keys(shared_secret.as_bytes(), &session_hash, Role::Client);

    let peer_identity = match parameters.auth {
        AUTH_ED25519 => {
            let challenge_bytes = recv_step(transport, &mut transcript, timeout, PacketType::AuthChallenge).await?;
            let challenge = AuthChallengePayload::decode(&challenge_bytes)?;
            let proof_snapshot = transcript.hash();
            let identity = config
                .identity
                .ok_or(CryptoError::AuthFailed("server requires an Ed25519 client identity"))?;
            let mut signed = Vec::with_capacity(64);
            signed.extend_from_slice(&proof_snapshot);
            signed.extend_from_slice(&challenge.challenge);
            let signature = identity.sign(&signed);
            let response = AuthResponsePayload {
                public_key: *identity.verifying_key().as_bytes(),
                signature: signature.to_bytes(),
            };
            send_step(transport, &mut transcript, client_id, PacketType::AuthResponse, response.encode()).await?;
            None
        }
        AUTH_PASSWORD => {
            let challenge_bytes = recv_step(transport, &mut transcript, timeout, PacketType::AuthChallenge).await?;
            let challenge = AuthChallengePayload::decode(&challenge_bytes)?;
            let proof_snapshot = transcript.hash();
            let password = config
                .password
                .as_deref()
                .ok_or(CryptoError::AuthFailed("server requires a password"))?;
            let derived_key = derive_password_key(password, &proof_snapshot)?;
            let mut mac = Hmac::<Sha512>::new_from_slice(&derived_key).expect("HMAC accepts any key length");
            mac.update(&proof_snapshot);
            mac.update(&challenge.challenge);
            let tag = mac.finalize().into_bytes();
            let response = AuthResponsePayload {
                public_key: [0u8; 32],
                signature: tag.into(),
            };
            send_step(transport, &mut transcript, client_id, PacketType::AuthResponse, response.encode()).await?;
            None
        }
        _ => None,
    };

    recv_step(transport, &mut transcript, timeout, PacketType::HandshakeComplete).await?;
    send_step(transport, &mut transcript, client_id, PacketType::HandshakeComplete, vec![]).await?;

    transport.install_keys(std::mem::replace(&mut session_keys, derive_session_keys(&[0u8; 32], &[0u8], Role::Client))).await;
    Ok(HandshakeOutcome { peer_identity, host_fingerprint })
}

fn verify_host_key(
    config: &mut ClientHandshakeConfig<'_>,
    remote_kex: &KeyExchangePayload,
    proof_snapshot: &[u8; 32],
) -> Result<Option<String>, CryptoError> {
    match (remote_kex.host_public_key, remote_kex.host_signature) {
        (Some(host_public_bytes), Some(signature_bytes)) => {
            let host_key = VerifyingKey::from_bytes(&host_public_bytes).map_err(|_| CryptoError::BadSignature)?;
            let signature = Signature::from_bytes(&signature_bytes);
            host_key
                .verify(proof_snapshot, &signature)
                .map_err(|_| CryptoError::BadSignature)?;
            let observed = fingerprint(&host_key);
            if config.insecure_no_verify {
                return Ok(Some(observed));
            }
            match config.known_hosts.check(&config.host, &observed) {
                HostKeyStatus::Match => {}
                HostKeyStatus::Absent => config.known_hosts.record(&config.host, &observed),
                HostKeyStatus::Mismatch => {
                    return Err(CryptoError::HostKeyMismatch {
                        host: config.host.to_string(),
                        expected: "the fingerprint recorded in known_hosts".to_string(),
                        actual: observed,
                    })
                }
            }
            Ok(Some(observed))
        }
        _ if config.insecure_no_verify => Ok(None),
        _ => Err(CryptoError::HostKeyMismatch {
            host: config.host.to_string(),
            expected: "a host identity".to_string(),
            actual: "none offered".to_string(),
        }),
    }
}

/// Drives the handshake from the server side for one freshly accepted connection.
pub async fn server_handshake(
    transport: &Transport,
    client_id: u32,
    config: &ServerHandshakeConfig<'_>,
) -> Result<HandshakeOutcome, CryptoError> {
    let mut transcript = Transcript::new();
    let timeout = config.step_timeout;

    let remote_version_bytes = recv_step(transport, &mut transcript, timeout, PacketType::ProtocolVersion).await?;
    let remote_version = ProtocolVersionPayload::decode(&remote_version_bytes)?;
    let local_version = ProtocolVersionPayload {
        supports_encryption: !config.no_encrypt,
        ..ProtocolVersionPayload::CURRENT
    };
    if remote_version.protocol_version != local_version.protocol_version {
        return Err(CryptoError::VersionMismatch {
            local: local_version.protocol_version,
            remote: remote_version.protocol_version,
        });
    }
    send_step(transport, &mut transcript, client_id, PacketType::ProtocolVersion, local_version.encode()).await?;

    if !local_version.supports_encryption || !remote_version.supports_encryption {
        send_step(transport, &mut transcript, client_id, PacketType::HandshakeComplete, vec![]).await?;
        recv_step(transport, &mut transcript, timeout, PacketType::HandshakeComplete).await?;
        return Ok(HandshakeOutcome::default());
    }

    let capabilities_bytes = recv_step(transport, &mut transcript, timeout, PacketType::CryptoCapabilities).await?;
    let capabilities = CryptoCapabilitiesPayload::decode(&capabilities_bytes)?;
    if capabilities.kex_bitmap & KEX_X25519 == 0 || capabilities.cipher_bitmap & CIPHER_XCHACHA20POLY1305 == 0 {
        return Err(CryptoError::NoCommonSuite);
    }
    let selected_auth = match &config.auth {
        ClientAuthPolicy::None => AUTH_NONE,
        ClientAuthPolicy::Ed25519 { .. } => {
            if capabilities.auth_bitmap & AUTH_ED25519 == 0 {
                return Err(CryptoError::NoCommonSuite);
            }
            AUTH_ED25519
        }
        ClientAuthPolicy::Password { .. } => {
            if capabilities.auth_bitmap & AUTH_PASSWORD == 0 {
                return Err(CryptoError::NoCommonSuite);
            }
            AUTH_PASSWORD
        }
    };
    let parameters = CryptoParametersPayload {
        kex: KEX_X25519,
        auth: selected_auth,
        cipher: CIPHER_XCHACHA20POLY1305,
        public_key_len: 32,
        signature_len: 64,
    };
    send_step(transport, &mut transcript, client_id, PacketType::CryptoParameters, parameters.encode()).await?;

    let remote_kex_bytes = recv_step(transport, &mut transcript, timeout, PacketType::KeyExchange).await?;
    let remote_kex = KeyExchangePayload::decode(&remote_kex_bytes)?;
    let host_proof_snapshot = transcript.hash();

    let ephemeral_secret = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = X25519PublicKey::from(&ephemeral_secret);
    let (host_public_key, host_signature) = match config.identity {
        Some(signing_key) => {
            let signature = signing_key.sign(&host_proof_snapshot);
            (Some(*signing_key.verifying_key().as_bytes()), Some(signature.to_bytes()))
        }
        None => (None, None),
    };
    let own_kex = KeyExchangePayload {
        ephemeral_public_key: *ephemeral_public.as_bytes(),
        host_public_key,
        host_signature,
    };
    send_step(transport, &mut transcript, client_id, PacketType::KeyExchange, own_kex.encode()).await?;
    let session_hash = transcript.hash();

    let shared_secret = ephemeral_secret.diffie_hellman(&X25519PublicKey::from(remote_kex.ephemeral_public_key));
    let session_keys = derive_session_keys(shared_secret.as_bytes(), &session_hash, Role::Server);

    let peer_identity = match &config.auth {
        ClientAuthPolicy::None => None,
        ClientAuthPolicy::Ed25519 { allowed } => {
            let mut challenge = [0u8; 32];
            OsRng.fill_bytes(&mut challenge);
            send_step(
                transport,
                &mut transcript,
                client_id,
                PacketType::AuthChallenge,
                AuthChallengePayload { challenge }.encode(),
            )
            .await?;
            let proof_snapshot = transcript.hash();
            let response_bytes = recv_step(transport, &mut transcript, timeout, PacketType::AuthResponse).await?;
            let response = AuthResponsePayload::decode(&response_bytes)?;
            let verifying = VerifyingKey::from_bytes(&response.public_key).map_err(|_| CryptoError::BadSignature)?;
            if !allowed.is_empty() && !allowed.iter().any(|key| key.as_bytes() == verifying.as_bytes()) {
                return Err(CryptoError::AuthFailed("client key is not in the allowlist"));
            }
            let mut signed = Vec::with_capacity(64);
            signed.extend_from_slice(&proof_snapshot);
            signed.extend_from_slice(&challenge);
            let signature = Signature::from_bytes(&response.signature);
            verifying.verify(&signed, &signature).map_err(|_| CryptoError::BadSignature)?;
            Some(verifying)
        }
        ClientAuthPolicy::Password { password } => {
            let mut challenge = [0u8; 32];
            OsRng.fill_bytes(&mut challenge);
            send_step(
                transport,
                &mut transcript,
                client_id,
                PacketType::AuthChallenge,
                AuthChallengePayload { challenge }.encode(),
            )
            .await?;
            let proof_snapshot = transcript.hash();
            let response_bytes = recv_step(transport, &mut transcript, timeout, PacketType::AuthResponse).await?;
            let response = AuthResponsePayload::decode(&response_bytes)?;
            let derived_key = derive_password_key(password, &proof_snapshot)?;
            let mut mac = Hmac::<Sha512>::new_from_slice(&derived_key).expect("HMAC accepts any key length");
            mac.update(&proof_snapshot);
            mac.update(&challenge);
            let expected = mac.finalize().into_bytes();
            if !timing_safe_equal(&expected, &response.signature) {
                return Err(CryptoError::AuthFailed("password mismatch"));
            }
            None
        }
    };

    send_step(transport, &mut transcript, client_id, PacketType::HandshakeComplete, vec![]).await?;
    recv_step(transport, &mut transcript, timeout, PacketType::HandshakeComplete).await?;

    transport.install_keys(session_keys).await;
    Ok(HandshakeOutcome {
        peer_identity,
        host_fingerprint: None,
    })
}

/// Which side originates the rekey (SPEC_FULL.md §4.3.6: a side crosses its
/// byte/packet threshold and initiates; the other side only responds).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RekeyRole {
    Initiator,
    Responder,
}

/// Runs one rekey round over an already-`Ready` transport. Both `RekeyRequest` and
/// `RekeyResponse`, and both `RekeyComplete` acknowledgements, travel under the
/// *old* session key; only after both sides have confirmed the round trip does
/// either install the freshly derived key, so a packet can never arrive encrypted
/// under a key the receiver hasn't installed yet.
pub async fn rekey(
    transport: &Transport,
    role: Role,
    rekey_role: RekeyRole,
    client_id: u32,
    timeout: Duration,
) -> Result<(), CryptoError> {
    match rekey_role {
        RekeyRole::Initiator => {
            let ephemeral_secret = EphemeralSecret::random_from_rng(OsRng);
            let ephemeral_public = X25519PublicKey::from(&ephemeral_secret);
            transport
                .send(
                    PacketType::RekeyRequest,
                    client_id,
                    0,
                    RekeyRequestPayload {
                        ephemeral_public_key: *ephemeral_public.as_bytes(),
                    }
                    .encode(),
                )
                .await
                .map_err(wrap_transport_err)?;

            let response = recv_rekey_message(transport, timeout, PacketType::RekeyResponse).await?;
            let response = RekeyResponsePayload::decode(&response)?;
            let shared_secret = ephemeral_secret.diffie_hellman(&X25519PublicKey::from(response.ephemeral_public_key));
            let new_keys = derive_session_keys(shared_secret.as_bytes(), REKEY_SALT, role);

            transport
                .send(PacketType::RekeyComplete, client_id, 0, vec![])
                .await
                .map_err(wrap_transport_err)?;
            recv_rekey_message(transport, timeout, PacketType::RekeyComplete).await?;

            transport.install_keys(new_keys).await;
            Ok(())
        }
        RekeyRole::Responder => {
            let request = recv_rekey_message(transport, timeout, PacketType::RekeyRequest).await?;
            let request = RekeyRequestPayload::decode(&request)?;
            rekey_respond(transport, role, client_id, timeout, request).await
        }
    }
}

/// The `RekeyRole::Responder` half of [`rekey`], taking an already-decoded
/// `RekeyRequest` instead of reading one off the wire itself. A per-client receive
/// loop is the sole owner of `transport.recv()` (SPEC_FULL.md §4.2 concurrency
/// contract); when it observes a `RekeyRequest` arrive during ordinary dispatch, it
/// hands the decoded payload here rather than letting `rekey()` race it for the
/// next read.
pub async fn rekey_respond(
    transport: &Transport,
    role: Role,
    client_id: u32,
    timeout: Duration,
    request: RekeyRequestPayload,
) -> Result<(), CryptoError> {
    let ephemeral_secret = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = X25519PublicKey::from(&ephemeral_secret);
    let shared_secret = ephemeral_secret.diffie_hellman(&X25519PublicKey::from(request.ephemeral_public_key));
    let new_keys = derive_session_keys(shared_secret.as_bytes(), REKEY_SALT, role);

    transport
        .send(
            PacketType::RekeyResponse,
            client_id,
            0,
            RekeyResponsePayload {
                ephemeral_public_key: *ephemeral_public.as_bytes(),
            }
            .encode(),
        )
        .await
        .map_err(wrap_transport_err)?;
    recv_rekey_message(transport, timeout, PacketType::RekeyComplete).await?;
    transport
        .send(PacketType::RekeyComplete, client_id, 0, vec![])
        .await
        .map_err(wrap_transport_err)?;

    transport.install_keys(new_keys).await;
    Ok(())
}

async fn recv_rekey_message(transport: &Transport, timeout: Duration, expected: PacketType) -> Result<Vec<u8>, CryptoError> {
    let (packet_type, payload, _client_id) = tokio::time::timeout(timeout, transport.recv())
        .await
        .map_err(|_| CryptoError::HandshakeTimeout(timeout))?
        .map_err(wrap_transport_err)?;
    if packet_type != expected {
        return Err(CryptoError::OutOfOrder {
            expected: packet_type_name(expected),
            actual: packet_type_name(packet_type),
        });
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn loopback_pair() -> (Transport, Transport) {
        let (a_rw, b_rw) = duplex(256 * 1024);
        let (a_read, a_write) = tokio::io::split(a_rw);
        let (b_read, b_write) = tokio::io::split(b_rw);
        (Transport::new(a_read, a_write), Transport::new(b_read, b_write))
    }

    #[tokio::test]
    async fn unauthenticated_handshake_installs_matching_keys() {
        let (mut client_transport, mut server_transport) = loopback_pair();
        let mut known_hosts = KnownHosts::default();
        let mut client_config = ClientHandshakeConfig {
            host: HostId::new("example.test", "192.0.2.10", 4242),
            known_hosts: &mut known_hosts,
            insecure_no_verify: true,
            identity: None,
            password: None,
            step_timeout: Duration::from_secs(5),
            no_encrypt: false,
            client_id: 42,
        };
        let server_config = ServerHandshakeConfig {
            identity: None,
            auth: ClientAuthPolicy::None,
            step_timeout: Duration::from_secs(5),
            no_encrypt: false,
        };

        let (client_result, server_result) = tokio::join!(
            client_handshake(&mut client_transport, &mut client_config),
            server_handshake(&mut server_transport, 1, &server_config),
        );
        client_result.unwrap();
        server_result.unwrap();

        assert!(client_transport.has_keys().await);
        assert!(server_transport.has_keys().await);

        client_transport.send(PacketType::Ping, 0, 0, b"hi".to_vec()).await.unwrap();
        let (packet_type, payload, _) = server_transport.recv().await.unwrap();
        assert_eq!(packet_type, PacketType::Ping);
        assert_eq!(payload, b"hi");
    }

    #[tokio::test]
    async fn host_key_is_recorded_on_first_connect_and_rejected_on_mismatch() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let server_config = ServerHandshakeConfig {
            identity: Some(&signing_key),
            auth: ClientAuthPolicy::None,
            step_timeout: Duration::from_secs(5),
            no_encrypt: false,
        };

        let (mut client_transport, mut server_transport) = loopback_pair();
        let mut known_hosts = KnownHosts::default();
        let mut client_config = ClientHandshakeConfig {
            host: HostId::new("example.test", "192.0.2.10", 4242),
            known_hosts: &mut known_hosts,
            insecure_no_verify: false,
            identity: None,
            password: None,
            step_timeout: Duration::from_secs(5),
            no_encrypt: false,
            client_id: 42,
        };
        let (client_result, server_result) = tokio::join!(
            client_handshake(&mut client_transport, &mut client_config),
            server_handshake(&mut server_transport, 1, &server_config),
        );
        let outcome = client_result.unwrap();
        server_result.unwrap();
        assert!(outcome.host_fingerprint.is_some());
        assert_eq!(
            known_hosts.check(&HostId::new("example.test", "192.0.2.10", 4242), outcome.host_fingerprint.as_deref().unwrap()),
            HostKeyStatus::Match
        );

        // A second handshake against an impostor host key must now be rejected.
        let impostor_key = SigningKey::generate(&mut OsRng);
        let impostor_config = ServerHandshakeConfig {
            identity: Some(&impostor_key),
            auth: ClientAuthPolicy::None,
            step_timeout: Duration::from_secs(5),
            no_encrypt: false,
        };
        let (mut client_transport, mut server_transport) = loopback_pair();
        let mut client_config = ClientHandshakeConfig {
            host: HostId::new("example.test", "192.0.2.10", 4242),
            known_hosts: &mut known_hosts,
            insecure_no_verify: false,
            identity: None,
            password: None,
            step_timeout: Duration::from_secs(5),
            no_encrypt: false,
            client_id: 42,
        };
        let (client_result, _server_result) = tokio::join!(
            client_handshake(&mut client_transport, &mut client_config),
            server_handshake(&mut server_transport, 1, &impostor_config),
        );
        assert!(matches!(client_result, Err(CryptoError::HostKeyMismatch { .. })));
    }

    #[tokio::test]
    async fn password_auth_rejects_wrong_password() {
        let server_config = ServerHandshakeConfig {
            identity: None,
            auth: ClientAuthPolicy::Password {
                password: "correct horse battery staple".to_string(),
            },
            step_timeout: Duration::from_secs(5),
            no_encrypt: false,
        };
        let (mut client_transport, mut server_transport) = loopback_pair();
        let mut known_hosts = KnownHosts::default();
        let mut client_config = ClientHandshakeConfig {
            host: HostId::new("example.test", "192.0.2.10", 4242),
            known_hosts: &mut known_hosts,
            insecure_no_verify: true,
            identity: None,
            password: Some("wrong password".to_string()),
            step_timeout: Duration::from_secs(5),
            no_encrypt: false,
            client_id: 42,
        };
        let (client_result, server_result) = tokio::join!(
            client_handshake(&mut client_transport, &mut client_config),
            server_handshake(&mut server_transport, 1, &server_config),
        );
        assert!(client_result.is_ok());
        assert!(matches!(server_result, Err(CryptoError::AuthFailed(_))));
    }

    #[tokio::test]
    async fn ed25519_auth_round_trips_and_binds_the_client_identity() {
        let client_identity = SigningKey::generate(&mut OsRng);
        let server_config = ServerHandshakeConfig {
            identity: None,
            auth: ClientAuthPolicy::Ed25519 {
                allowed: vec![client_identity.verifying_key()],
            },
            step_timeout: Duration::from_secs(5),
            no_encrypt: false,
        };
        let (mut client_transport, mut server_transport) = loopback_pair();
        let mut known_hosts = KnownHosts::default();
        let mut client_config = ClientHandshakeConfig {
            host: HostId::new("example.test", "192.0.2.10", 4242),
            known_hosts: &mut known_hosts,
            insecure_no_verify: true,
            identity: Some(&client_identity),
            password: None,
            step_timeout: Duration::from_secs(5),
            no_encrypt: false,
            client_id: 42,
        };
        let (client_result, server_result) = tokio::join!(
            client_handshake(&mut client_transport, &mut client_config),
            server_handshake(&mut server_transport, 1, &server_config),
        );
        client_result.unwrap();
        let outcome = server_result.unwrap();
        assert_eq!(
            outcome.peer_identity.map(|key| *key.as_bytes()),
            Some(*client_identity.verifying_key().as_bytes())
        );
    }

    #[tokio::test]
    async fn rekey_replaces_keys_and_traffic_keeps_flowing() {
        let (mut client_transport, mut server_transport) = loopback_pair();
        let mut known_hosts = KnownHosts::default();
        let mut client_config = ClientHandshakeConfig {
            host: HostId::new("example.test", "192.0.2.10", 4242),
            known_hosts: &mut known_hosts,
            insecure_no_verify: true,
            identity: None,
            password: None,
            step_timeout: Duration::from_secs(5),
            no_encrypt: false,
            client_id: 42,
        };
        let server_config = ServerHandshakeConfig {
            identity: None,
            auth: ClientAuthPolicy::None,
            step_timeout: Duration::from_secs(5),
            no_encrypt: false,
        };
        let (client_result, server_result) = tokio::join!(
            client_handshake(&mut client_transport, &mut client_config),
            server_handshake(&mut server_transport, 1, &server_config),
        );
        client_result.unwrap();
        server_result.unwrap();

        let (client_rekey, server_rekey) = tokio::join!(
            rekey(&mut client_transport, Role::Client, RekeyRole::Initiator, 0, Duration::from_secs(5)),
            rekey(&mut server_transport, Role::Server, RekeyRole::Responder, 1, Duration::from_secs(5)),
        );
        client_rekey.unwrap();
        server_rekey.unwrap();

        client_transport.send(PacketType::Ping, 0, 0, b"post-rekey".to_vec()).await.unwrap();
        let (packet_type, payload, _) = server_transport.recv().await.unwrap();
        assert_eq!(packet_type, PacketType::Ping);
        assert_eq!(payload, b"post-rekey");
    }
}
