//! Wire-format definitions for protocol segments.
//!
//! Every datagram exchanged between peers is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (header fields, flags, payload).
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`].
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Acknowledgment Number                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      reserved       |S|A|F|          Window Size              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 12 bytes.
//! There is no length field: everything after the header is payload.  There
//! is no checksum either; the substrate delivers a datagram intact or not at
//! all.

use thiserror::Error;

/// Bit-flag constants for the 16-bit `flags` header field.
pub mod flags {
    /// Finish: the sender of this segment is closing.
    pub const FIN: u16 = 0b001;
    /// Acknowledgement field is valid.
    pub const ACK: u16 = 0b010;
    /// Synchronise sequence numbers (handshake).
    pub const SYN: u16 = 0b100;
    /// Every bit the protocol defines; the rest are reserved.
    pub const MASK: u16 = SYN | ACK | FIN;
}

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 12;

// Byte offsets of each field within the serialised header.
const OFF_SEQ: usize = 0;
const OFF_ACK: usize = 4;
const OFF_FLAGS: usize = 8;
const OFF_WINDOW: usize = 10;

/// Fixed-size protocol header, in host byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    /// Byte offset of the first payload byte, or the initial sequence number
    /// on a handshake segment.
    pub seq: u32,
    /// Next byte the sender of this segment expects from its peer.
    pub ack: u32,
    /// Bitmask of [`flags`] constants.
    pub flags: u16,
    /// Advertised receive space, in segments.
    pub window: u16,
}

impl Header {
    /// `true` when every bit in `mask` is set.
    pub fn has(&self, mask: u16) -> bool {
        self.flags & mask == mask
    }
}

/// A complete protocol datagram: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Build a payload-free control segment.
    pub fn control(seq: u32, ack: u32, flags: u16, window: u16) -> Self {
        Self {
            header: Header {
                seq,
                ack,
                flags,
                window,
            },
            payload: Vec::new(),
        }
    }

    /// `true` when the segment carries application bytes.
    pub fn is_data(&self) -> bool {
        !self.payload.is_empty()
    }

    /// Sequence number one past the last payload byte.
    pub fn end_seq(&self) -> u32 {
        self.header.seq.wrapping_add(self.payload.len() as u32)
    }

    /// Serialise this packet into a newly allocated byte vector.
    ///
    /// Reserved flag bits are never written.
    pub fn encode(&self) -> Vec<u8> {
        encode(
            self.header.seq,
            self.header.ack,
            self.header.flags,
            self.header.window,
            &self.payload,
        )
    }

    /// Parse a [`Packet`] from a raw byte slice.
    ///
    /// Fails only when `buf` is shorter than [`HEADER_LEN`].  Reserved flag
    /// bits are cleared.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::Malformed { len: buf.len() });
        }

        let seq = read_u32(buf, OFF_SEQ);
        let ack = read_u32(buf, OFF_ACK);
        let flags = read_u16(buf, OFF_FLAGS) & flags::MASK;
        let window = read_u16(buf, OFF_WINDOW);

        Ok(Packet {
            header: Header {
                seq,
                ack,
                flags,
                window,
            },
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

/// Encode a segment from its raw fields.
pub fn encode(seq: u32, ack: u32, flags: u16, window: u16, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&seq.to_be_bytes());
    buf.extend_from_slice(&ack.to_be_bytes());
    buf.extend_from_slice(&(flags & flags::MASK).to_be_bytes());
    buf.extend_from_slice(&window.to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    /// Buffer shorter than the fixed header size.
    #[error("malformed segment: {len} bytes is shorter than the 12-byte header")]
    Malformed { len: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_packet(seq: u32, ack: u32, flags: u16, window: u16, payload: &[u8]) -> Packet {
        Packet {
            header: Header {
                seq,
                ack,
                flags,
                window,
            },
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let pkt = make_packet(42, 7, flags::SYN | flags::ACK, 4096, b"hello");
        assert_eq!(Packet::decode(&pkt.encode()).unwrap(), pkt);
    }

    #[test]
    fn every_flag_combination_survives() {
        for f in 0..=flags::MASK {
            let pkt = make_packet(u32::MAX, 1, f, u16::MAX, b"");
            assert_eq!(Packet::decode(&pkt.encode()).unwrap().header.flags, f);
        }
    }

    #[test]
    fn decode_empty_buffer_returns_error() {
        assert_eq!(Packet::decode(&[]), Err(PacketError::Malformed { len: 0 }));
    }

    #[test]
    fn decode_short_header_returns_error() {
        assert_eq!(
            Packet::decode(&[0u8; HEADER_LEN - 1]),
            Err(PacketError::Malformed {
                len: HEADER_LEN - 1
            })
        );
    }

    #[test]
    fn header_only_decodes_to_empty_payload() {
        let decoded = Packet::decode(&[0u8; HEADER_LEN]).unwrap();
        assert!(decoded.payload.is_empty());
        assert!(!decoded.is_data());
    }

    #[test]
    fn reserved_bits_are_cleared() {
        let mut bytes = make_packet(0, 0, flags::ACK, 0, b"").encode();
        bytes[OFF_FLAGS] = 0xff;
        bytes[OFF_FLAGS + 1] |= 0xf8;
        assert_eq!(Packet::decode(&bytes).unwrap().header.flags, flags::ACK);

        let encoded = encode(0, 0, 0xffff, 0, b"");
        assert_eq!(&encoded[OFF_FLAGS..OFF_FLAGS + 2], &[0x00, 0x07]);
    }

    #[test]
    fn flag_bit_positions() {
        let bytes = make_packet(0, 0, flags::SYN, 0, b"").encode();
        assert_eq!(bytes[OFF_FLAGS + 1], 0b100);
        let bytes = make_packet(0, 0, flags::FIN, 0, b"").encode();
        assert_eq!(bytes[OFF_FLAGS + 1], 0b001);
    }

    #[test]
    fn encoded_length_equals_header_plus_payload() {
        let payload = b"exactly twelve!";
        let bytes = make_packet(0, 0, 0, 0, payload).encode();
        assert_eq!(bytes.len(), HEADER_LEN + payload.len());
    }

    #[test]
    fn fields_big_endian_on_wire() {
        let bytes = make_packet(0x0102_0304, 0x0506_0708, 0, 0x090a, b"").encode();
        assert_eq!(&bytes[OFF_SEQ..OFF_SEQ + 4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[OFF_ACK..OFF_ACK + 4], &[0x05, 0x06, 0x07, 0x08]);
        assert_eq!(&bytes[OFF_WINDOW..OFF_WINDOW + 2], &[0x09, 0x0a]);
    }

    #[test]
    fn end_seq_wraps() {
        let pkt = make_packet(u32::MAX - 1, 0, flags::ACK, 0, b"abcd");
        assert_eq!(pkt.end_seq(), 2);
    }
}
