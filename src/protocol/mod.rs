//! The wire packet codec (SPEC_FULL.md §4.1, §6): a fixed 20-byte big-endian header
//! followed by a type-tagged payload. One encode/decode function pair per payload
//! kind; the codec module owns framing end to end, no payload type frames itself.

pub mod header;
pub mod messages;

use crate::error::ErrorKind;
use thiserror::Error;

pub use header::{PacketHeader, HEADER_LEN, MAGIC, MAX_PAYLOAD_LEN};
pub use messages::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum PacketType {
    ProtocolVersion = 0,
    CryptoCapabilities = 1,
    CryptoParameters = 2,
    KeyExchange = 3,
    AuthChallenge = 4,
    AuthResponse = 5,
    HandshakeComplete = 6,
    Encrypted = 7,
    Ping = 8,
    Pong = 9,
    StreamStart = 10,
    ClientJoin = 11,
    ClientCapabilities = 12,
    ImageFrame = 13,
    AsciiFrame = 14,
    AudioOpusBatch = 15,
    ServerState = 16,
    RekeyRequest = 17,
    RekeyResponse = 18,
    RekeyComplete = 19,
    ClearConsole = 20,
}

impl PacketType {
    pub fn from_u16(value: u16) -> Result<Self, WireError> {
        use PacketType::*;
        Ok(match value {
            0 => ProtocolVersion,
            1 => CryptoCapabilities,
            2 => CryptoParameters,
            3 => KeyExchange,
            4 => AuthChallenge,
            5 => AuthResponse,
            6 => HandshakeComplete,
            7 => Encrypted,
            8 => Ping,
            9 => Pong,
            10 => StreamStart,
            11 => ClientJoin,
            12 => ClientCapabilities,
            13 => ImageFrame,
            14 => AsciiFrame,
            15 => AudioOpusBatch,
            16 => ServerState,
            17 => RekeyRequest,
            18 => RekeyResponse,
            19 => RekeyComplete,
            20 => ClearConsole,
            other => return Err(WireError::UnknownPacketType(other)),
        })
    }
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("packet magic mismatch")]
    BadMagic,
    #[error("unknown packet type {0}")]
    UnknownPacketType(u16),
    #[error("payload length {0} exceeds the {1} byte cap")]
    PayloadTooLarge(u32, u32),
    #[error("crc32 mismatch: header said {expected:#010x}, computed {actual:#010x}")]
    CrcMismatch { expected: u32, actual: u32 },
    #[error("truncated packet: needed {needed} bytes, had {had}")]
    Truncated { needed: usize, had: usize },
    #[error("invalid payload for {0:?}: {1}")]
    InvalidPayload(PacketType, &'static str),
}

impl WireError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WireError::BadMagic | WireError::UnknownPacketType(_) => ErrorKind::ProtocolViolation,
            WireError::PayloadTooLarge(..) => ErrorKind::ProtocolViolation,
            WireError::CrcMismatch { .. } => ErrorKind::Corruption,
            WireError::Truncated { .. } => ErrorKind::ConnectionLost,
            WireError::InvalidPayload(..) => ErrorKind::ProtocolViolation,
        }
    }
}

/// A fully decoded, still-owned packet: header plus raw payload bytes. Higher layers
/// (crypto, session) decode the payload further once they know the type.
#[derive(Debug, Clone)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(packet_type: PacketType, client_id: u32, flags: u16, payload: Vec<u8>) -> Result<Self, WireError> {
        if payload.len() as u64 > MAX_PAYLOAD_LEN as u64 {
            return Err(WireError::PayloadTooLarge(payload.len() as u32, MAX_PAYLOAD_LEN));
        }
        let crc32 = crc32fast::hash(&payload);
        let header = PacketHeader {
            magic: MAGIC,
            packet_type: packet_type as u16,
            flags,
            length: payload.len() as u32,
            crc32,
            client_id,
        };
        Ok(Self { header, payload })
    }

    pub fn packet_type(&self) -> Result<PacketType, WireError> {
        PacketType::from_u16(self.header.packet_type)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        self.header.encode(&mut out);
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decodes one full framed packet from `bytes`, verifying magic, the length
    /// cap, and the CRC over the payload. `bytes` must contain exactly the header
    /// plus `length` payload bytes (callers read the length-prefixed frame first).
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < HEADER_LEN {
            return Err(WireError::Truncated {
                needed: HEADER_LEN,
                had: bytes.len(),
            });
        }
        let header = PacketHeader::decode(&bytes[..HEADER_LEN])?;
        let total = HEADER_LEN + header.length as usize;
        if bytes.len() < total {
            return Err(WireError::Truncated {
                needed: total,
                had: bytes.len(),
            });
        }
        let payload = bytes[HEADER_LEN..total].to_vec();
        let actual = crc32fast::hash(&payload);
        if actual != header.crc32 {
            return Err(WireError::CrcMismatch {
                expected: header.crc32,
                actual,
            });
        }
        Ok(Self { header, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_payload_and_crc() {
        let packet = Packet::new(PacketType::Ping, 42, 0, b"hello".to_vec()).unwrap();
        let bytes = packet.encode();
        let decoded = Packet::decode(&bytes).unwrap();
        assert_eq!(decoded.payload, b"hello");
        assert_eq!(decoded.header.client_id, 42);
        assert_eq!(decoded.packet_type().unwrap(), PacketType::Ping);
    }

    #[test]
    fn corrupted_payload_fails_crc() {
        let packet = Packet::new(PacketType::Ping, 1, 0, b"hello".to_vec()).unwrap();
        let mut bytes = packet.encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(matches!(Packet::decode(&bytes), Err(WireError::CrcMismatch { .. })));
    }

    #[test]
    fn oversized_payload_is_rejected_before_encoding() {
        let huge = vec![0u8; MAX_PAYLOAD_LEN as usize + 1];
        assert!(matches!(
            Packet::new(PacketType::ImageFrame, 1, 0, huge),
            Err(WireError::PayloadTooLarge(..))
        ));
    }
}
