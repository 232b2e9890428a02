//! Payload structs for the packet types that carry a structured body (SPEC_FULL.md
//! §6). Packets without a meaningful payload (`Ping`, `Pong`, `HandshakeComplete`,
//! `ClearConsole`, `StreamStart`) carry an empty byte slice and need no struct here.

use super::{PacketType, WireError};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

pub const FLAG_COMPRESSED: u32 = 0x1;
pub const FLAG_ZSTD: u32 = 0x1;
pub const FLAG_ZLIB: u32 = 0x2;

fn write_fixed(out: &mut Vec<u8>, field: &str, text: &str, len: usize) {
    let bytes = text.as_bytes();
    assert!(bytes.len() <= len, "{field} exceeds {len} bytes");
    out.extend_from_slice(bytes);
    out.extend(std::iter::repeat(0u8).take(len - bytes.len()));
}

fn read_fixed(cursor: &mut Cursor<&[u8]>, len: usize) -> Result<String, WireError> {
    let mut buf = vec![0u8; len];
    cursor
        .read_exact(&mut buf)
        .map_err(|_| WireError::Truncated { needed: len, had: 0 })?;
    let end = buf.iter().position(|&b| b == 0).unwrap_or(len);
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}

/// `{capabilities, color_level, color_count, render_mode, width, height,
/// palette_type, utf8_support, desired_fps, term_type[32], colorterm[32],
/// palette_custom[256], wants_padding, detection_reliable}`, all network order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCapabilitiesPayload {
    pub capabilities: u32,
    pub color_level: u32,
    pub color_count: u32,
    pub render_mode: u32,
    pub width: u16,
    pub height: u16,
    pub palette_type: u32,
    pub utf8_support: u32,
    pub desired_fps: u8,
    pub term_type: String,
    pub colorterm: String,
    pub palette_custom: String,
    pub wants_padding: bool,
    pub detection_reliable: bool,
}

impl ClientCapabilitiesPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 * 6 + 2 * 2 + 1 + 32 + 32 + 256 + 2);
        out.write_u32::<BigEndian>(self.capabilities).unwrap();
        out.write_u32::<BigEndian>(self.color_level).unwrap();
        out.write_u32::<BigEndian>(self.color_count).unwrap();
        out.write_u32::<BigEndian>(self.render_mode).unwrap();
        out.write_u16::<BigEndian>(self.width).unwrap();
        out.write_u16::<BigEndian>(self.height).unwrap();
        out.write_u32::<BigEndian>(self.palette_type).unwrap();
        out.write_u32::<BigEndian>(self.utf8_support).unwrap();
        out.write_u8(self.desired_fps).unwrap();
        write_fixed(&mut out, "term_type", &self.term_type, 32);
        write_fixed(&mut out, "colorterm", &self.colorterm, 32);
        write_fixed(&mut out, "palette_custom", &self.palette_custom, 256);
        out.write_u8(self.wants_padding as u8).unwrap();
        out.write_u8(self.detection_reliable as u8).unwrap();
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut cursor = Cursor::new(bytes);
        let err = |_| WireError::InvalidPayload(PacketType::ClientCapabilities, "truncated");
        Ok(Self {
            capabilities: cursor.read_u32::<BigEndian>().map_err(err)?,
            color_level: cursor.read_u32::<BigEndian>().map_err(err)?,
            color_count: cursor.read_u32::<BigEndian>().map_err(err)?,
            render_mode: cursor.read_u32::<BigEndian>().map_err(err)?,
            width: cursor.read_u16::<BigEndian>().map_err(err)?,
            height: cursor.read_u16::<BigEndian>().map_err(err)?,
            palette_type: cursor.read_u32::<BigEndian>().map_err(err)?,
            utf8_support: cursor.read_u32::<BigEndian>().map_err(err)?,
            desired_fps: cursor.read_u8().map_err(err)?,
            term_type: read_fixed(&mut cursor, 32)?,
            colorterm: read_fixed(&mut cursor, 32)?,
            palette_custom: read_fixed(&mut cursor, 256)?,
            wants_padding: cursor.read_u8().map_err(err)? != 0,
            detection_reliable: cursor.read_u8().map_err(err)? != 0,
        })
    }
}

/// `{display_name[32]}`: sent once, immediately after the handshake completes, to
/// mark a session ready for admission into the registry (SPEC_FULL.md §4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientJoinPayload {
    pub display_name: String,
}

impl ClientJoinPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32);
        write_fixed(&mut out, "display_name", &self.display_name, 32);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut cursor = Cursor::new(bytes);
        Ok(Self {
            display_name: read_fixed(&mut cursor, 32)?,
        })
    }
}

/// `{width, height, original_size, compressed_size, checksum, flags}` followed by
/// raw UTF-8 or zlib-compressed glyph bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsciiFramePayload {
    pub width: u32,
    pub height: u32,
    pub checksum: u32,
    pub flags: u32,
    pub bytes: Vec<u8>,
    pub original_size: u32,
}

impl AsciiFramePayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(24 + self.bytes.len());
        out.write_u32::<BigEndian>(self.width).unwrap();
        out.write_u32::<BigEndian>(self.height).unwrap();
        out.write_u32::<BigEndian>(self.original_size).unwrap();
        out.write_u32::<BigEndian>(self.bytes.len() as u32).unwrap();
        out.write_u32::<BigEndian>(self.checksum).unwrap();
        out.write_u32::<BigEndian>(self.flags).unwrap();
        out.extend_from_slice(&self.bytes);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut cursor = Cursor::new(bytes);
        let err = |_| WireError::InvalidPayload(PacketType::AsciiFrame, "truncated");
        let width = cursor.read_u32::<BigEndian>().map_err(err)?;
        let height = cursor.read_u32::<BigEndian>().map_err(err)?;
        let original_size = cursor.read_u32::<BigEndian>().map_err(err)?;
        let compressed_size = cursor.read_u32::<BigEndian>().map_err(err)?;
        let checksum = cursor.read_u32::<BigEndian>().map_err(err)?;
        let flags = cursor.read_u32::<BigEndian>().map_err(err)?;
        let mut body = vec![0u8; compressed_size as usize];
        cursor.read_exact(&mut body).map_err(err)?;
        Ok(Self {
            width,
            height,
            checksum,
            flags,
            bytes: body,
            original_size,
        })
    }

    /// Decompresses `bytes` per `flags`, returning the raw glyph stream.
    pub fn decoded_text(&self) -> Result<Vec<u8>, WireError> {
        if self.flags & FLAG_COMPRESSED == 0 {
            return Ok(self.bytes.clone());
        }
        use flate2::read::ZlibDecoder;
        let mut decoder = ZlibDecoder::new(self.bytes.as_slice());
        let mut out = Vec::with_capacity(self.original_size as usize);
        decoder
            .read_to_end(&mut out)
            .map_err(|_| WireError::InvalidPayload(PacketType::AsciiFrame, "bad zlib stream"))?;
        Ok(out)
    }
}

/// `{sample_rate, frame_duration_ms, reserved, frame_count, frame_size_table[u16;
/// frame_count], concat_opus_bytes}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioOpusBatchPayload {
    pub sample_rate: u32,
    pub frame_duration_ms: u32,
    pub frame_sizes: Vec<u16>,
    pub opus_bytes: Vec<u8>,
}

impl AudioOpusBatchPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(20 + self.frame_sizes.len() * 2 + self.opus_bytes.len());
        out.write_u32::<BigEndian>(self.sample_rate).unwrap();
        out.write_u32::<BigEndian>(self.frame_duration_ms).unwrap();
        out.write_u64::<BigEndian>(0).unwrap(); // reserved
        out.write_u32::<BigEndian>(self.frame_sizes.len() as u32).unwrap();
        for size in &self.frame_sizes {
            out.write_u16::<BigEndian>(*size).unwrap();
        }
        out.extend_from_slice(&self.opus_bytes);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut cursor = Cursor::new(bytes);
        let err = |_| WireError::InvalidPayload(PacketType::AudioOpusBatch, "truncated");
        let sample_rate = cursor.read_u32::<BigEndian>().map_err(err)?;
        let frame_duration_ms = cursor.read_u32::<BigEndian>().map_err(err)?;
        let _reserved = cursor.read_u64::<BigEndian>().map_err(err)?;
        let frame_count = cursor.read_u32::<BigEndian>().map_err(err)?;
        let mut frame_sizes = Vec::with_capacity(frame_count as usize);
        for _ in 0..frame_count {
            frame_sizes.push(cursor.read_u16::<BigEndian>().map_err(err)?);
        }
        let mut opus_bytes = Vec::new();
        cursor.read_to_end(&mut opus_bytes).map_err(err)?;
        let expected: usize = frame_sizes.iter().map(|&s| s as usize).sum();
        if expected != opus_bytes.len() {
            return Err(WireError::InvalidPayload(
                PacketType::AudioOpusBatch,
                "frame size table does not match payload length",
            ));
        }
        Ok(Self {
            sample_rate,
            frame_duration_ms,
            frame_sizes,
            opus_bytes,
        })
    }

    /// Splits the concatenated Opus bytes back into per-frame slices using the
    /// size table.
    pub fn frames(&self) -> Vec<&[u8]> {
        let mut out = Vec::with_capacity(self.frame_sizes.len());
        let mut offset = 0usize;
        for &size in &self.frame_sizes {
            let end = offset + size as usize;
            out.push(&self.opus_bytes[offset..end]);
            offset = end;
        }
        out
    }
}

/// `{width, height, compressed_flag, data_size, rgb_or_compressed_bytes}`,
/// client → server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFramePayload {
    pub width: u32,
    pub height: u32,
    pub compressed_flag: u32,
    pub bytes: Vec<u8>,
}

impl ImageFramePayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.bytes.len());
        out.write_u32::<BigEndian>(self.width).unwrap();
        out.write_u32::<BigEndian>(self.height).unwrap();
        out.write_u32::<BigEndian>(self.compressed_flag).unwrap();
        out.write_u32::<BigEndian>(self.bytes.len() as u32).unwrap();
        out.extend_from_slice(&self.bytes);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut cursor = Cursor::new(bytes);
        let err = |_| WireError::InvalidPayload(PacketType::ImageFrame, "truncated");
        let width = cursor.read_u32::<BigEndian>().map_err(err)?;
        let height = cursor.read_u32::<BigEndian>().map_err(err)?;
        let compressed_flag = cursor.read_u32::<BigEndian>().map_err(err)?;
        let data_size = cursor.read_u32::<BigEndian>().map_err(err)?;
        let mut data = vec![0u8; data_size as usize];
        cursor.read_exact(&mut data).map_err(err)?;
        Ok(Self {
            width,
            height,
            compressed_flag,
            bytes: data,
        })
    }

    /// Decompresses the payload into raw interleaved RGB bytes, per `compressed_flag`.
    pub fn decoded_rgb(&self) -> Result<Vec<u8>, WireError> {
        match self.compressed_flag {
            0 => Ok(self.bytes.clone()),
            f if f & FLAG_ZLIB != 0 => {
                use flate2::read::ZlibDecoder;
                let mut decoder = ZlibDecoder::new(self.bytes.as_slice());
                let mut out = Vec::new();
                decoder
                    .read_to_end(&mut out)
                    .map_err(|_| WireError::InvalidPayload(PacketType::ImageFrame, "bad zlib stream"))?;
                Ok(out)
            }
            f if f & FLAG_ZSTD != 0 => zstd::stream::decode_all(self.bytes.as_slice())
                .map_err(|_| WireError::InvalidPayload(PacketType::ImageFrame, "bad zstd stream")),
            _ => Err(WireError::InvalidPayload(PacketType::ImageFrame, "unknown compression flag")),
        }
    }
}

/// `{protocol_version, revision, supports_encryption, feature_flags}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersionPayload {
    pub protocol_version: u16,
    pub revision: u16,
    pub supports_encryption: bool,
    pub feature_flags: u32,
}

impl ProtocolVersionPayload {
    pub const CURRENT: Self = Self {
        protocol_version: 1,
        revision: 0,
        supports_encryption: true,
        feature_flags: 0,
    };

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(9);
        out.write_u16::<BigEndian>(self.protocol_version).unwrap();
        out.write_u16::<BigEndian>(self.revision).unwrap();
        out.write_u8(self.supports_encryption as u8).unwrap();
        out.write_u32::<BigEndian>(self.feature_flags).unwrap();
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut cursor = Cursor::new(bytes);
        let err = |_| WireError::InvalidPayload(PacketType::ProtocolVersion, "truncated");
        Ok(Self {
            protocol_version: cursor.read_u16::<BigEndian>().map_err(err)?,
            revision: cursor.read_u16::<BigEndian>().map_err(err)?,
            supports_encryption: cursor.read_u8().map_err(err)? != 0,
            feature_flags: cursor.read_u32::<BigEndian>().map_err(err)?,
        })
    }
}

/// `ServerState`: active client count and registry capacity, broadcast on
/// admission/eviction so clients can repaint a roster delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerStatePayload {
    pub active_clients: u32,
    pub max_clients: u32,
}

impl ServerStatePayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8);
        out.write_u32::<BigEndian>(self.active_clients).unwrap();
        out.write_u32::<BigEndian>(self.max_clients).unwrap();
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut cursor = Cursor::new(bytes);
        let err = |_| WireError::InvalidPayload(PacketType::ServerState, "truncated");
        Ok(Self {
            active_clients: cursor.read_u32::<BigEndian>().map_err(err)?,
            max_clients: cursor.read_u32::<BigEndian>().map_err(err)?,
        })
    }
}

/// `{kex_bitmap, auth_bitmap, cipher_bitmap}`: one bit per supported algorithm.
/// Bit 0 of each bitmap is the only algorithm this build knows (X25519 / Ed25519-or-
/// none / XChaCha20-Poly1305), but the field stays a bitmap so a future build can
/// widen the set without a wire format change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CryptoCapabilitiesPayload {
    pub kex_bitmap: u32,
    pub auth_bitmap: u32,
    pub cipher_bitmap: u32,
}

pub const KEX_X25519: u32 = 0x1;
pub const AUTH_NONE: u32 = 0x1;
pub const AUTH_ED25519: u32 = 0x2;
pub const AUTH_PASSWORD: u32 = 0x4;
pub const CIPHER_XCHACHA20POLY1305: u32 = 0x1;

impl CryptoCapabilitiesPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12);
        out.write_u32::<BigEndian>(self.kex_bitmap).unwrap();
        out.write_u32::<BigEndian>(self.auth_bitmap).unwrap();
        out.write_u32::<BigEndian>(self.cipher_bitmap).unwrap();
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut cursor = Cursor::new(bytes);
        let err = |_| WireError::InvalidPayload(PacketType::CryptoCapabilities, "truncated");
        Ok(Self {
            kex_bitmap: cursor.read_u32::<BigEndian>().map_err(err)?,
            auth_bitmap: cursor.read_u32::<BigEndian>().map_err(err)?,
            cipher_bitmap: cursor.read_u32::<BigEndian>().map_err(err)?,
        })
    }
}

/// The server's selection from the intersection of both sides' `CryptoCapabilities`,
/// plus the sizes the client should expect in the following `KeyExchange` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CryptoParametersPayload {
    pub kex: u32,
    pub auth: u32,
    pub cipher: u32,
    pub public_key_len: u16,
    pub signature_len: u16,
}

impl CryptoParametersPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        out.write_u32::<BigEndian>(self.kex).unwrap();
        out.write_u32::<BigEndian>(self.auth).unwrap();
        out.write_u32::<BigEndian>(self.cipher).unwrap();
        out.write_u16::<BigEndian>(self.public_key_len).unwrap();
        out.write_u16::<BigEndian>(self.signature_len).unwrap();
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut cursor = Cursor::new(bytes);
        let err = |_| WireError::InvalidPayload(PacketType::CryptoParameters, "truncated");
        Ok(Self {
            kex: cursor.read_u32::<BigEndian>().map_err(err)?,
            auth: cursor.read_u32::<BigEndian>().map_err(err)?,
            cipher: cursor.read_u32::<BigEndian>().map_err(err)?,
            public_key_len: cursor.read_u16::<BigEndian>().map_err(err)?,
            signature_len: cursor.read_u16::<BigEndian>().map_err(err)?,
        })
    }
}

/// Server → client: ephemeral X25519 public key, long-term Ed25519 host public key,
/// and a signature over the transcript hash so far. Client → server: just the
/// ephemeral public key (clients are not required to hold a host identity).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyExchangePayload {
    pub ephemeral_public_key: [u8; 32],
    pub host_public_key: Option<[u8; 32]>,
    pub host_signature: Option<[u8; 64]>,
}

impl KeyExchangePayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + 32 + 1 + 32 + 64);
        out.extend_from_slice(&self.ephemeral_public_key);
        match (&self.host_public_key, &self.host_signature) {
            (Some(key), Some(sig)) => {
                out.write_u8(1).unwrap();
                out.extend_from_slice(key);
                out.extend_from_slice(sig);
            }
            _ => out.write_u8(0).unwrap(),
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut cursor = Cursor::new(bytes);
        let err = |_| WireError::InvalidPayload(PacketType::KeyExchange, "truncated");
        let mut ephemeral_public_key = [0u8; 32];
        cursor.read_exact(&mut ephemeral_public_key).map_err(err)?;
        let has_host_key = cursor.read_u8().map_err(err)? != 0;
        if !has_host_key {
            return Ok(Self {
                ephemeral_public_key,
                host_public_key: None,
                host_signature: None,
            });
        }
        let mut host_public_key = [0u8; 32];
        cursor.read_exact(&mut host_public_key).map_err(err)?;
        let mut host_signature = [0u8; 64];
        cursor.read_exact(&mut host_signature).map_err(err)?;
        Ok(Self {
            ephemeral_public_key,
            host_public_key: Some(host_public_key),
            host_signature: Some(host_signature),
        })
    }
}

/// `AuthChallenge`: a random 32-byte nonce the client must sign together with the
/// transcript hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthChallengePayload {
    pub challenge: [u8; 32],
}

impl AuthChallengePayload {
    pub fn encode(&self) -> Vec<u8> {
        self.challenge.to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let challenge: [u8; 32] = bytes
            .try_into()
            .map_err(|_| WireError::InvalidPayload(PacketType::AuthChallenge, "expected 32 bytes"))?;
        Ok(Self { challenge })
    }
}

/// `AuthResponse`: client's Ed25519 public key and its signature over
/// `transcript_hash || challenge`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResponsePayload {
    pub public_key: [u8; 32],
    pub signature: [u8; 64],
}

impl AuthResponsePayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(96);
        out.extend_from_slice(&self.public_key);
        out.extend_from_slice(&self.signature);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut cursor = Cursor::new(bytes);
        let err = |_| WireError::InvalidPayload(PacketType::AuthResponse, "truncated");
        let mut public_key = [0u8; 32];
        cursor.read_exact(&mut public_key).map_err(err)?;
        let mut signature = [0u8; 64];
        cursor.read_exact(&mut signature).map_err(err)?;
        Ok(Self { public_key, signature })
    }
}

/// `RekeyRequest` carries the requester's fresh ephemeral public key (so both sides
/// exchange a new key pair in the same two messages used for the initial
/// `KeyExchange`); `RekeyResponse` carries the responder's matching fresh key.
/// `RekeyComplete` carries nothing and needs no struct here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RekeyRequestPayload {
    pub ephemeral_public_key: [u8; 32],
}

impl RekeyRequestPayload {
    pub fn encode(&self) -> Vec<u8> {
        self.ephemeral_public_key.to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let ephemeral_public_key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| WireError::InvalidPayload(PacketType::RekeyRequest, "expected 32 bytes"))?;
        Ok(Self { ephemeral_public_key })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RekeyResponsePayload {
    pub ephemeral_public_key: [u8; 32],
}

impl RekeyResponsePayload {
    pub fn encode(&self) -> Vec<u8> {
        self.ephemeral_public_key.to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let ephemeral_public_key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| WireError::InvalidPayload(PacketType::RekeyResponse, "expected 32 bytes"))?;
        Ok(Self { ephemeral_public_key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_capabilities_round_trip() {
        let payload = ClientCapabilitiesPayload {
            capabilities: 0b1111,
            color_level: 3,
            color_count: 16_777_216,
            render_mode: 0,
            width: 80,
            height: 24,
            palette_type: 0,
            utf8_support: 1,
            desired_fps: 30,
            term_type: "xterm-256color".to_string(),
            colorterm: "truecolor".to_string(),
            palette_custom: String::new(),
            wants_padding: false,
            detection_reliable: true,
        };
        let bytes = payload.encode();
        assert_eq!(bytes.len(), 4 * 6 + 2 * 2 + 1 + 32 + 32 + 256 + 2);
        let decoded = ClientCapabilitiesPayload::decode(&bytes).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn ascii_frame_round_trip_uncompressed() {
        let payload = AsciiFramePayload {
            width: 2,
            height: 2,
            checksum: 0,
            flags: 0,
            bytes: b"ab\ncd\n".to_vec(),
            original_size: 6,
        };
        let bytes = payload.encode();
        let decoded = AsciiFramePayload::decode(&bytes).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(decoded.decoded_text().unwrap(), b"ab\ncd\n");
    }

    #[test]
    fn audio_batch_frame_table_must_match_payload_length() {
        let mut bytes = AudioOpusBatchPayload {
            sample_rate: 48_000,
            frame_duration_ms: 20,
            frame_sizes: vec![3, 4],
            opus_bytes: vec![0u8; 7],
        }
        .encode();
        // Corrupt the frame_count field to disagree with the real table/payload.
        bytes[16] = 0;
        bytes[17] = 0;
        bytes[18] = 0;
        bytes[19] = 1;
        assert!(AudioOpusBatchPayload::decode(&bytes).is_err());
    }

    #[test]
    fn audio_batch_splits_frames_correctly() {
        let payload = AudioOpusBatchPayload {
            sample_rate: 48_000,
            frame_duration_ms: 20,
            frame_sizes: vec![2, 3],
            opus_bytes: vec![1, 2, 3, 4, 5],
        };
        let frames = payload.frames();
        assert_eq!(frames, vec![&[1u8, 2][..], &[3u8, 4, 5][..]]);
    }

    #[test]
    fn client_join_round_trip() {
        let payload = ClientJoinPayload {
            display_name: "ada".to_string(),
        };
        let bytes = payload.encode();
        assert_eq!(bytes.len(), 32);
        assert_eq!(ClientJoinPayload::decode(&bytes).unwrap(), payload);
    }

    #[test]
    fn image_frame_round_trip() {
        let payload = ImageFramePayload {
            width: 2,
            height: 1,
            compressed_flag: 0,
            bytes: vec![255, 0, 0, 255, 0, 0],
        };
        let bytes = payload.encode();
        let decoded = ImageFramePayload::decode(&bytes).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(decoded.decoded_rgb().unwrap(), payload.bytes);
    }
}
