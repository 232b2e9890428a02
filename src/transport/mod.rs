//! The per-session packet transport (SPEC_FULL.md §4.2): owns a byte stream (TCP or
//! WebSocket) and an optional AEAD session key, and turns it into a send/recv pair of
//! whole framed packets. Grounded in the teacher's `transport/mod.rs` minimal
//! `Transport` trait shape (`send`/`recv`/`is_connected`) and `transport/framed.rs`'s
//! send-lock-around-the-whole-write idiom; the teacher's chunk-reassembly machinery
//! has no counterpart here because this spec's packets are never split across frames.

pub mod tcp;
pub mod websocket;

use crate::crypto::aead::SessionKeys;
use crate::error::ErrorKind;
use crate::protocol::{Packet, PacketType, WireError, HEADER_LEN};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Crypto(#[from] crate::crypto::CryptoError),
    #[error("transport closed")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::Wire(err) => err.kind(),
            TransportError::Crypto(err) => err.kind(),
            TransportError::Closed => ErrorKind::ConnectionLost,
            TransportError::Io(_) => ErrorKind::TransientIo,
        }
    }
}

#[async_trait]
trait ReadHalf: Send {
    async fn read_exact_bytes(&mut self, buf: &mut [u8]) -> std::io::Result<()>;
}

#[async_trait]
trait WriteHalf: Send {
    async fn write_all_bytes(&mut self, buf: &[u8]) -> std::io::Result<()>;
    async fn shutdown(&mut self) -> std::io::Result<()>;
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> ReadHalf for R {
    async fn read_exact_bytes(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        self.read_exact(buf).await.map(|_| ())
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> WriteHalf for W {
    async fn write_all_bytes(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.write_all(buf).await
    }

    async fn shutdown(&mut self) -> std::io::Result<()> {
        AsyncWriteExt::shutdown(self).await
    }
}

/// Owns a byte stream plus an optional post-handshake `SessionKeys`. `send` and
/// `recv` implement SPEC_FULL.md §4.2 exactly: plaintext before the handshake
/// completes, `Encrypted`-wrapped afterwards. The read half and write half are each
/// behind their own async lock: the write lock is held across an entire framed write
/// so concurrent senders never interleave bytes on the wire (SPEC_FULL.md §5
/// ordering guarantee); the read lock is never actually contended in practice
/// because exactly one task ever calls `recv`, but the lock still lets `Transport`
/// be shared behind a plain `Arc` rather than requiring callers to serialize access
/// themselves.
pub struct Transport {
    reader: Mutex<Box<dyn ReadHalf>>,
    writer: Mutex<Box<dyn WriteHalf>>,
    keys: Mutex<Option<SessionKeys>>,
    closed: AtomicBool,
    bytes_sent: std::sync::atomic::AtomicU64,
}

impl Transport {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            reader: Mutex::new(Box::new(reader)),
            writer: Mutex::new(Box::new(writer)),
            keys: Mutex::new(None),
            closed: AtomicBool::new(false),
            bytes_sent: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Installs (or replaces, on rekey) the session's AEAD key material. Once set,
    /// every subsequent `send`/`recv` wraps/unwraps via `Encrypted` packets. Takes
    /// `&self` rather than `&mut self` so a rekey can run over the same
    /// `Arc<Transport>` the render/receive loops already share, without requiring
    /// exclusive access (SPEC_FULL.md §4.3.6).
    pub async fn install_keys(&self, keys: SessionKeys) {
        *self.keys.lock().await = Some(keys);
    }

    pub async fn has_keys(&self) -> bool {
        self.keys.lock().await.is_some()
    }

    /// Packets sealed under the current send key so far, or 0 before a key is
    /// installed. Feeds the rekey packet-count threshold (SPEC_FULL.md §4.3.6).
    pub async fn sent_packet_count(&self) -> u64 {
        self.keys.lock().await.as_ref().map(|keys| keys.send.counter()).unwrap_or(0)
    }

    /// Total wire bytes written so far, plaintext or encrypted. Feeds the rekey
    /// byte-count threshold (SPEC_FULL.md §4.3.6, default ~1 GiB).
    pub fn sent_byte_count(&self) -> u64 {
        self.bytes_sent.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Sends one packet, encrypting under the installed session key if present.
    /// Holds the write lock across the whole write so a partial write from one task
    /// can never interleave with another's framed packet.
    pub async fn send(&self, packet_type: PacketType, client_id: u32, flags: u16, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        let wire = match self.keys.lock().await.as_mut() {
            None => Packet::new(packet_type, client_id, flags, payload)?.encode(),
            Some(keys) => {
                let inner = Packet::new(packet_type, client_id, flags, payload)?.encode();
                let sealed = keys.send.seal(&inner)?;
                Packet::new(PacketType::Encrypted, client_id, 0, sealed)?.encode()
            }
        };
        let mut writer = self.writer.lock().await;
        if let Err(err) = writer.write_all_bytes(&wire).await {
            self.mark_closed();
            return Err(err.into());
        }
        self.bytes_sent.fetch_add(wire.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Reads exactly one framed packet, decrypting if it was `Encrypted`. The inner
    /// plaintext begins with its own header (SPEC_FULL.md §6), so an `Encrypted`
    /// envelope is parsed recursively exactly once (the plaintext is never itself
    /// `Encrypted` by construction).
    pub async fn recv(&self) -> Result<(PacketType, Vec<u8>, u32), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        let mut header_bytes = [0u8; HEADER_LEN];
        {
            let mut reader = self.reader.lock().await;
            if let Err(err) = reader.read_exact_bytes(&mut header_bytes).await {
                self.mark_closed();
                return Err(err.into());
            }
        }
        let header = crate::protocol::PacketHeader::decode(&header_bytes)?;
        let mut payload = vec![0u8; header.length as usize];
        {
            let mut reader = self.reader.lock().await;
            if let Err(err) = reader.read_exact_bytes(&mut payload).await {
                self.mark_closed();
                return Err(err.into());
            }
        }
        let mut full = Vec::with_capacity(HEADER_LEN + payload.len());
        full.extend_from_slice(&header_bytes);
        full.extend_from_slice(&payload);
        let packet = Packet::decode(&full)?;
        let packet_type = packet.packet_type()?;

        if packet_type == PacketType::Encrypted {
            let plaintext = self
                .keys
                .lock()
                .await
                .as_mut()
                .ok_or(TransportError::Closed)?
                .recv
                .open(&packet.payload)?;
            let inner = Packet::decode(&plaintext)?;
            let inner_type = inner.packet_type()?;
            return Ok((inner_type, inner.payload, inner.header.client_id));
        }
        Ok((packet_type, packet.payload, packet.header.client_id))
    }

    /// Half-closes the underlying stream. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn loopback_pair() -> (Transport, Transport) {
        let (a_rw, b_rw) = duplex(64 * 1024);
        let (a_read, a_write) = tokio::io::split(a_rw);
        let (b_read, b_write) = tokio::io::split(b_rw);
        (Transport::new(a_read, a_write), Transport::new(b_read, b_write))
    }

    #[tokio::test]
    async fn plaintext_packet_round_trips() {
        let (a, b) = loopback_pair();
        a.send(PacketType::Ping, 7, 0, vec![]).await.unwrap();
        let (packet_type, payload, client_id) = b.recv().await.unwrap();
        assert_eq!(packet_type, PacketType::Ping);
        assert_eq!(client_id, 7);
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn encrypted_packet_round_trips_once_keys_are_installed() {
        let (a, b) = loopback_pair();
        let send_key = [3u8; 32];
        let recv_key = [9u8; 32];
        a.install_keys(SessionKeys::new(send_key, recv_key)).await;
        b.install_keys(SessionKeys::new(recv_key, send_key)).await;

        a.send(PacketType::AudioOpusBatch, 1, 0, b"tone".to_vec()).await.unwrap();
        let (packet_type, payload, _) = b.recv().await.unwrap();
        assert_eq!(packet_type, PacketType::AudioOpusBatch);
        assert_eq!(payload, b"tone");
    }

    #[tokio::test]
    async fn closing_rejects_further_sends() {
        let (a, _b) = loopback_pair();
        a.close().await;
        assert!(matches!(a.send(PacketType::Ping, 0, 0, vec![]).await, Err(TransportError::Closed)));
    }
}
