//! Encrypted session protocol (SPEC_FULL.md §4.3): X25519 key exchange, optional
//! Ed25519 client auth, Argon2id password binding, and the XChaCha20-Poly1305 AEAD
//! that wraps every post-handshake packet. No counterpart exists in the teacher for
//! this subsystem; the state-machine shape and transcript-hash idiom are grounded in
//! `transport/webrtc/secure_handshake.rs`, the KDF/AEAD idiom in `auth/crypto.rs`.

pub mod aead;
pub mod handshake;
pub mod keys;
pub mod known_hosts;
pub mod transcript;

use crate::error::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("protocol version mismatch: local {local}, remote {remote}")]
    VersionMismatch { local: u16, remote: u16 },
    #[error("no common cipher/kex/auth suite with peer")]
    NoCommonSuite,
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(std::time::Duration),
    #[error("authentication failed: {0}")]
    AuthFailed(&'static str),
    #[error("host key mismatch for {host}: expected {expected}, got {actual}")]
    HostKeyMismatch {
        host: String,
        expected: String,
        actual: String,
    },
    #[error("signature verification failed")]
    BadSignature,
    #[error("AEAD seal/open failed")]
    Aead,
    #[error("nonce {0} is not greater than the last accepted nonce {1}")]
    NonceReplay(u64, u64),
    #[error("known_hosts error: {0}")]
    KnownHosts(String),
    #[error("key error: {0}")]
    Key(String),
    #[error("handshake used out of order: expected state {expected}, got message for {actual}")]
    OutOfOrder {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("transport error during handshake: {0}")]
    Transport(String),
}

impl CryptoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CryptoError::VersionMismatch { .. } => ErrorKind::ProtocolViolation,
            CryptoError::NoCommonSuite => ErrorKind::ProtocolViolation,
            CryptoError::HandshakeTimeout(_) => ErrorKind::HandshakeTimeout,
            CryptoError::AuthFailed(_) => ErrorKind::AuthFailed,
            CryptoError::HostKeyMismatch { .. } => ErrorKind::HostKeyMismatch,
            CryptoError::BadSignature => ErrorKind::AuthFailed,
            CryptoError::Aead => ErrorKind::Corruption,
            CryptoError::NonceReplay(..) => ErrorKind::Corruption,
            CryptoError::KnownHosts(_) => ErrorKind::Internal,
            CryptoError::Key(_) => ErrorKind::Internal,
            CryptoError::OutOfOrder { .. } => ErrorKind::ProtocolViolation,
            CryptoError::Transport(_) => ErrorKind::ConnectionLost,
        }
    }
}
