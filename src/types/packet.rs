//! Application packet (TP_PDU) types

use crate::{DownlinkError, Result};

/// Size of the application packet primary header.
pub const PACKET_HEADER_SIZE: usize = 6;

/// APID reserved for idle packets.
pub const IDLE_APID: u16 = 2047;

/// Packet version carried by every valid packet.
pub const PACKET_VERSION: u8 = 0;

/// Size of the CRC trailing every packet data field.
pub const PACKET_CRC_SIZE: usize = 2;

/// Size of the transport file header at the start of a file's first packet.
pub const TRANSPORT_HEADER_SIZE: usize = 10;

/// Position of a packet within its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceFlags {
    Continuation,
    First,
    Last,
    Standalone,
}

impl SequenceFlags {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => SequenceFlags::Continuation,
            1 => SequenceFlags::First,
            2 => SequenceFlags::Last,
            _ => SequenceFlags::Standalone,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            SequenceFlags::Continuation => 0,
            SequenceFlags::First => 1,
            SequenceFlags::Last => 2,
            SequenceFlags::Standalone => 3,
        }
    }

    /// Whether this packet starts a new file.
    pub fn opens_file(self) -> bool {
        matches!(self, SequenceFlags::First | SequenceFlags::Standalone)
    }

    /// Whether this packet is the final one of its file.
    pub fn closes_file(self) -> bool {
        matches!(self, SequenceFlags::Last | SequenceFlags::Standalone)
    }
}

/// Decoded packet primary header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub version: u8,
    pub packet_type: u8,
    pub secondary_header: bool,
    pub apid: u16,
    pub sequence_flags: SequenceFlags,
    /// 14-bit per-APID sequence count.
    pub sequence_count: u16,
    /// Raw length field: data field length minus one.
    pub length_field: u16,
}

impl PacketHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < PACKET_HEADER_SIZE {
            return Err(DownlinkError::parse(
                "Packet header",
                format!("need {} bytes, have {}", PACKET_HEADER_SIZE, data.len()),
            ));
        }
        Ok(Self {
            version: data[0] >> 5,
            packet_type: (data[0] >> 4) & 0x01,
            secondary_header: data[0] & 0x08 != 0,
            apid: (((data[0] & 0x07) as u16) << 8) | data[1] as u16,
            sequence_flags: SequenceFlags::from_bits(data[2] >> 6),
            sequence_count: (((data[2] & 0x3f) as u16) << 8) | data[3] as u16,
            length_field: u16::from_be_bytes([data[4], data[5]]),
        })
    }

    pub fn encode(&self) -> [u8; PACKET_HEADER_SIZE] {
        let length = self.length_field.to_be_bytes();
        [
            (self.version << 5)
                | ((self.packet_type & 0x01) << 4)
                | if self.secondary_header { 0x08 } else { 0 }
                | ((self.apid >> 8) as u8 & 0x07),
            self.apid as u8,
            (self.sequence_flags.bits() << 6) | ((self.sequence_count >> 8) as u8 & 0x3f),
            self.sequence_count as u8,
            length[0],
            length[1],
        ]
    }

    /// Length of the data field in bytes, CRC included.
    pub fn data_length(&self) -> usize {
        self.length_field as usize + 1
    }

    pub fn is_idle(&self) -> bool {
        self.apid == IDLE_APID
    }
}

/// A fully reassembled application packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationPacket {
    pub vcid: u8,
    pub header: PacketHeader,
    /// Data field, trailing CRC included.
    pub data: Vec<u8>,
    /// Whether the trailing CRC matched the data.
    pub crc_ok: bool,
}

impl ApplicationPacket {
    /// Data field without the trailing CRC.
    pub fn user_data(&self) -> &[u8] {
        &self.data[..self.data.len().saturating_sub(PACKET_CRC_SIZE)]
    }
}

/// Transport file header carried at the start of a file's first packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportFileHeader {
    pub file_counter: u16,
    pub length_bits: u64,
}

impl TransportFileHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        Ok(Self {
            file_counter: crate::wire::parse_u16_be(data, 0)?,
            length_bits: crate::wire::parse_u64_be(data, 2)?,
        })
    }

    pub fn encode(&self) -> [u8; TRANSPORT_HEADER_SIZE] {
        let mut out = [0u8; TRANSPORT_HEADER_SIZE];
        out[..2].copy_from_slice(&self.file_counter.to_be_bytes());
        out[2..].copy_from_slice(&self.length_bits.to_be_bytes());
        out
    }

    /// Declared file length in bytes, rounded up.
    pub fn length_bytes(&self) -> u64 {
        self.length_bits.div_ceil(8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_fields_survive_encoding() {
        let header = PacketHeader {
            version: 0,
            packet_type: 0,
            secondary_header: false,
            apid: 0x3ab,
            sequence_flags: SequenceFlags::Last,
            sequence_count: 0x2fff,
            length_field: 8191,
        };
        let raw = header.encode();
        assert_eq!(PacketHeader::parse(&raw).unwrap(), header);
        assert_eq!(header.data_length(), 8192);
        assert_eq!(raw[2] >> 6, 2);
    }

    #[test]
    fn idle_apid_is_detected() {
        let raw = [0x07, 0xff, 0xc0, 0x00, 0x00, 0x09];
        let header = PacketHeader::parse(&raw).unwrap();
        assert!(header.is_idle());
        assert_eq!(header.sequence_flags, SequenceFlags::Standalone);
        assert_eq!(header.data_length(), 10);
    }

    #[test]
    fn sequence_flags_classify_file_boundaries() {
        assert!(SequenceFlags::First.opens_file());
        assert!(SequenceFlags::Standalone.opens_file());
        assert!(SequenceFlags::Standalone.closes_file());
        assert!(!SequenceFlags::Continuation.opens_file());
        assert!(!SequenceFlags::Continuation.closes_file());
    }

    #[test]
    fn transport_header_declares_length_in_bits() {
        let header = TransportFileHeader { file_counter: 7, length_bits: 8 * 1234 + 3 };
        let parsed = TransportFileHeader::parse(&header.encode()).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.length_bytes(), 1235);
        assert!(TransportFileHeader::parse(&[0u8; 4]).is_err());
    }
}
