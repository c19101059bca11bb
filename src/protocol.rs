//! Wire codec for source, repair, and ack packets.
//!
//! Every packet leads with a one-byte type tag; all multi-byte fields are
//! little-endian.
//!
//! ```text
//! source:  tag | source_id:u32 | user_size:u16 | bytes[user_size]
//! repair:  tag | repair_id:u32 | encoded_size:u16 | nb_ids:u16
//!          | source_ids[nb_ids]:u32 | symbol_len:u16 | symbol[symbol_len]
//! ack:     tag | nb_ids:u16 | source_ids[nb_ids]:u32
//! ```
//!
//! Parsing returns the number of bytes consumed; a malformed packet (unknown
//! tag, truncation, unsorted repair ids) parses to `None` and the caller
//! drops it.

use bytes::{Buf, BufMut};

use crate::symbol::EncoderRepair;
use crate::transport::PacketSink;

/// Packet type discriminator, the first byte of every packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// Verbatim source symbol.
    Source = 0,
    /// Coded repair symbol.
    Repair = 1,
    /// Acknowledgment of held sources.
    Ack = 2,
}

impl PacketType {
    /// Parse a packet type from its tag byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Source),
            1 => Some(Self::Repair),
            2 => Some(Self::Ack),
            _ => None,
        }
    }
}

/// A parsed packet, borrowing payload bytes from the input.
#[derive(Debug, PartialEq, Eq)]
pub enum Packet<'a> {
    Source {
        source_id: u32,
        /// Exactly `user_size` bytes.
        data: &'a [u8],
    },
    Repair {
        repair_id: u32,
        encoded_size: u16,
        /// Ascending.
        source_ids: Vec<u32>,
        symbol: &'a [u8],
    },
    Ack {
        source_ids: Vec<u32>,
    },
}

impl<'a> Packet<'a> {
    /// Peek at the type tag without consuming anything.
    pub fn peek_type(buf: &[u8]) -> Option<PacketType> {
        buf.first().and_then(|&b| PacketType::from_u8(b))
    }

    /// Parse one packet from the front of `buf`.
    ///
    /// Returns the packet and the number of bytes consumed; trailing bytes
    /// are left for the caller. `None` means malformed.
    pub fn parse(buf: &'a [u8]) -> Option<(Packet<'a>, usize)> {
        let mut cur = buf;
        if cur.remaining() < 1 {
            return None;
        }
        let tag = PacketType::from_u8(cur.get_u8())?;

        let packet = match tag {
            PacketType::Source => {
                if cur.remaining() < 6 {
                    return None;
                }
                let source_id = cur.get_u32_le();
                let user_size = usize::from(cur.get_u16_le());
                if cur.remaining() < user_size {
                    return None;
                }
                let data = &cur[..user_size];
                cur.advance(user_size);
                Packet::Source { source_id, data }
            }
            PacketType::Repair => {
                if cur.remaining() < 8 {
                    return None;
                }
                let repair_id = cur.get_u32_le();
                let encoded_size = cur.get_u16_le();
                let nb_ids = usize::from(cur.get_u16_le());
                if cur.remaining() < nb_ids * 4 {
                    return None;
                }
                let mut source_ids = Vec::with_capacity(nb_ids);
                for _ in 0..nb_ids {
                    source_ids.push(cur.get_u32_le());
                }
                if !source_ids.windows(2).all(|w| w[0] < w[1]) {
                    return None;
                }
                if cur.remaining() < 2 {
                    return None;
                }
                let symbol_len = usize::from(cur.get_u16_le());
                if cur.remaining() < symbol_len {
                    return None;
                }
                let symbol = &cur[..symbol_len];
                cur.advance(symbol_len);
                Packet::Repair {
                    repair_id,
                    encoded_size,
                    source_ids,
                    symbol,
                }
            }
            PacketType::Ack => {
                if cur.remaining() < 2 {
                    return None;
                }
                let nb_ids = usize::from(cur.get_u16_le());
                if cur.remaining() < nb_ids * 4 {
                    return None;
                }
                let mut source_ids = Vec::with_capacity(nb_ids);
                for _ in 0..nb_ids {
                    source_ids.push(cur.get_u32_le());
                }
                Packet::Ack { source_ids }
            }
        };

        Some((packet, buf.len() - cur.len()))
    }
}

/// Serialize a source packet into `sink`.
pub fn write_source<S: PacketSink>(sink: &mut S, source_id: u32, data: &[u8]) {
    debug_assert!(data.len() <= usize::from(u16::MAX));
    let mut header = Vec::with_capacity(7);
    header.put_u8(PacketType::Source as u8);
    header.put_u32_le(source_id);
    header.put_u16_le(data.len() as u16);
    sink.put(&header);
    sink.put(data);
    sink.end();
}

/// Serialize a sealed repair into `sink`.
pub fn write_repair<S: PacketSink>(sink: &mut S, repair: &EncoderRepair) {
    let ids = repair.source_ids();
    debug_assert!(ids.len() <= usize::from(u16::MAX));
    debug_assert!(repair.symbol().len() <= usize::from(u16::MAX));
    let mut header = Vec::with_capacity(11 + ids.len() * 4);
    header.put_u8(PacketType::Repair as u8);
    header.put_u32_le(repair.id());
    header.put_u16_le(repair.encoded_size());
    header.put_u16_le(ids.len() as u16);
    for &id in ids {
        header.put_u32_le(id);
    }
    header.put_u16_le(repair.symbol().len() as u16);
    sink.put(&header);
    sink.put(repair.symbol());
    sink.end();
}

/// Serialize an ack over `ids` into `sink`.
pub fn write_ack<S: PacketSink>(sink: &mut S, ids: &[u32]) {
    debug_assert!(ids.len() <= usize::from(u16::MAX));
    let mut packet = Vec::with_capacity(3 + ids.len() * 4);
    packet.put_u8(PacketType::Ack as u8);
    packet.put_u16_le(ids.len() as u16);
    for &id in ids {
        packet.put_u32_le(id);
    }
    sink.put(&packet);
    sink.end();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ZeroBuffer;
    use crate::transport::VecSink;

    #[test]
    fn test_packet_type_from_u8() {
        assert_eq!(PacketType::from_u8(0), Some(PacketType::Source));
        assert_eq!(PacketType::from_u8(1), Some(PacketType::Repair));
        assert_eq!(PacketType::from_u8(2), Some(PacketType::Ack));
        assert_eq!(PacketType::from_u8(3), None);
    }

    #[test]
    fn test_source_roundtrip() {
        let mut sink = VecSink::new();
        write_source(&mut sink, 42, b"abcd");
        let bytes = &sink.packets()[0];

        assert_eq!(Packet::peek_type(bytes), Some(PacketType::Source));
        let (packet, consumed) = Packet::parse(bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(
            packet,
            Packet::Source {
                source_id: 42,
                data: b"abcd",
            }
        );
    }

    #[test]
    fn test_repair_roundtrip() {
        let repair = EncoderRepair {
            id: 3,
            source_ids: vec![5, 6, 9],
            encoded_size: 0x1234,
            symbol: ZeroBuffer::from_padded(b"coded", 16),
        };

        let mut sink = VecSink::new();
        write_repair(&mut sink, &repair);
        let bytes = &sink.packets()[0];

        let (packet, consumed) = Packet::parse(bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        match packet {
            Packet::Repair {
                repair_id,
                encoded_size,
                source_ids,
                symbol,
            } => {
                assert_eq!(repair_id, 3);
                assert_eq!(encoded_size, 0x1234);
                assert_eq!(source_ids, vec![5, 6, 9]);
                assert_eq!(symbol.len(), 16);
                assert_eq!(&symbol[..5], b"coded");
            }
            other => panic!("expected repair, got {:?}", other),
        }
    }

    #[test]
    fn test_ack_roundtrip() {
        let mut sink = VecSink::new();
        write_ack(&mut sink, &[1, 2, 7]);
        let bytes = &sink.packets()[0];

        let (packet, consumed) = Packet::parse(bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(
            packet,
            Packet::Ack {
                source_ids: vec![1, 2, 7],
            }
        );
    }

    #[test]
    fn test_empty_ack() {
        let mut sink = VecSink::new();
        write_ack(&mut sink, &[]);
        let (packet, _) = Packet::parse(&sink.packets()[0]).unwrap();
        assert_eq!(packet, Packet::Ack { source_ids: vec![] });
    }

    #[test]
    fn test_unknown_tag_rejected() {
        assert!(Packet::parse(&[9, 0, 0, 0]).is_none());
        assert!(Packet::parse(&[]).is_none());
    }

    #[test]
    fn test_truncated_rejected() {
        let mut sink = VecSink::new();
        write_source(&mut sink, 42, b"abcd");
        let bytes = &sink.packets()[0];

        for len in 0..bytes.len() {
            assert!(Packet::parse(&bytes[..len]).is_none(), "len {}", len);
        }
    }

    #[test]
    fn test_unsorted_repair_ids_rejected() {
        let repair = EncoderRepair {
            id: 0,
            source_ids: vec![9, 5],
            encoded_size: 0,
            symbol: ZeroBuffer::new(),
        };
        let mut sink = VecSink::new();
        write_repair(&mut sink, &repair);
        assert!(Packet::parse(&sink.packets()[0]).is_none());
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut sink = VecSink::new();
        write_source(&mut sink, 1, b"xy");
        let mut bytes = sink.packets()[0].clone();
        let real_len = bytes.len();
        bytes.extend_from_slice(b"garbage");

        let (_, consumed) = Packet::parse(&bytes).unwrap();
        assert_eq!(consumed, real_len);
    }
}
