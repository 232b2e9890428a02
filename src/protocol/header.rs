use super::WireError;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

pub const MAGIC: u32 = 0x4143_4853; // "ACHS", per SPEC_FULL.md §6 (example constant)
pub const HEADER_LEN: usize = 20;
pub const MAX_PAYLOAD_LEN: u32 = 16 * 1024 * 1024;

/// The 20-byte big-endian wire header: `magic | type | flags | length | crc32 | client_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub magic: u32,
    pub packet_type: u16,
    pub flags: u16,
    pub length: u32,
    pub crc32: u32,
    pub client_id: u32,
}

impl PacketHeader {
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.write_u32::<BigEndian>(self.magic).expect("vec write is infallible");
        out.write_u16::<BigEndian>(self.packet_type).expect("vec write is infallible");
        out.write_u16::<BigEndian>(self.flags).expect("vec write is infallible");
        out.write_u32::<BigEndian>(self.length).expect("vec write is infallible");
        out.write_u32::<BigEndian>(self.crc32).expect("vec write is infallible");
        out.write_u32::<BigEndian>(self.client_id).expect("vec write is infallible");
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < HEADER_LEN {
            return Err(WireError::Truncated {
                needed: HEADER_LEN,
                had: bytes.len(),
            });
        }
        let mut cursor = Cursor::new(bytes);
        let magic = cursor.read_u32::<BigEndian>().expect("length checked above");
        if magic != MAGIC {
            return Err(WireError::BadMagic);
        }
        let packet_type = cursor.read_u16::<BigEndian>().expect("length checked above");
        let flags = cursor.read_u16::<BigEndian>().expect("length checked above");
        let length = cursor.read_u32::<BigEndian>().expect("length checked above");
        if length > MAX_PAYLOAD_LEN {
            return Err(WireError::PayloadTooLarge(length, MAX_PAYLOAD_LEN));
        }
        let crc32 = cursor.read_u32::<BigEndian>().expect("length checked above");
        let client_id = cursor.read_u32::<BigEndian>().expect("length checked above");
        Ok(Self {
            magic,
            packet_type,
            flags,
            length,
            crc32,
            client_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = PacketHeader {
            magic: MAGIC,
            packet_type: 14,
            flags: 0b10,
            length: 1234,
            crc32: 0xdead_beef,
            client_id: 99,
        };
        let mut bytes = Vec::new();
        header.encode(&mut bytes);
        assert_eq!(bytes.len(), HEADER_LEN);
        let decoded = PacketHeader::decode(&bytes).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = vec![0u8; HEADER_LEN];
        bytes[0] = 0xff;
        assert!(matches!(PacketHeader::decode(&bytes), Err(WireError::BadMagic)));
    }

    #[test]
    fn oversized_length_is_rejected_at_header_decode() {
        let header = PacketHeader {
            magic: MAGIC,
            packet_type: 0,
            flags: 0,
            length: MAX_PAYLOAD_LEN + 1,
            crc32: 0,
            client_id: 0,
        };
        let mut bytes = Vec::new();
        header.encode(&mut bytes);
        assert!(matches!(
            PacketHeader::decode(&bytes),
            Err(WireError::PayloadTooLarge(..))
        ));
    }
}
