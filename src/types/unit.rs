//! Transport unit (VCDU) types

use std::sync::Arc;

use crate::{DownlinkError, Result};

/// Size of the transport unit primary header.
pub const UNIT_HEADER_SIZE: usize = 6;

/// Virtual channel carrying fill units only.
pub const FILL_VCID: u8 = 63;

/// Transfer frame version carried by every valid unit.
pub const UNIT_VERSION: u8 = 1;

/// First header pointer value meaning "no packet starts in this unit".
pub const NO_PACKET_START: u16 = 2047;

/// Size of the M_PDU header at the start of the payload.
pub const MPDU_HEADER_SIZE: usize = 2;

/// Decoded transport unit header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitHeader {
    pub version: u8,
    pub spacecraft_id: u8,
    pub vcid: u8,
    /// 24-bit per-channel counter.
    pub counter: u32,
    /// Signalling field; bit 7 is the replay flag.
    pub signal: u8,
}

impl UnitHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < UNIT_HEADER_SIZE {
            return Err(DownlinkError::framing(format!(
                "unit header needs {} bytes, have {}",
                UNIT_HEADER_SIZE,
                data.len()
            )));
        }
        Ok(Self {
            version: data[0] >> 6,
            spacecraft_id: ((data[0] & 0x3f) << 2) | (data[1] >> 6),
            vcid: data[1] & 0x3f,
            counter: u32::from_be_bytes([0, data[2], data[3], data[4]]),
            signal: data[5],
        })
    }

    pub fn encode(&self) -> [u8; UNIT_HEADER_SIZE] {
        let counter = self.counter.to_be_bytes();
        [
            (self.version << 6) | (self.spacecraft_id >> 2),
            ((self.spacecraft_id & 0x03) << 6) | (self.vcid & 0x3f),
            counter[1],
            counter[2],
            counter[3],
            self.signal,
        ]
    }

    pub fn is_fill(&self) -> bool {
        self.vcid == FILL_VCID
    }

    pub fn is_replay(&self) -> bool {
        self.signal & 0x80 != 0
    }

    /// Whether the signalling field flags this unit as anything but a clean
    /// real-time transfer.
    pub fn is_flagged(&self) -> bool {
        self.signal != 0
    }
}

/// One fixed-size frame from the receiver.
#[derive(Debug, Clone)]
pub struct TransportUnit {
    pub header: UnitHeader,
    /// Whole frame, header included (zero-copy via Arc).
    pub data: Arc<[u8]>,
}

impl TransportUnit {
    /// Wrap a frame of exactly `frame_size` bytes.
    pub fn from_frame(frame: Vec<u8>, frame_size: usize) -> Result<Self> {
        if frame.len() != frame_size {
            return Err(DownlinkError::framing(format!(
                "frame is {} bytes, expected {}",
                frame.len(),
                frame_size
            )));
        }
        let header = UnitHeader::parse(&frame)?;
        Ok(Self { header, data: frame.into() })
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[UNIT_HEADER_SIZE..]
    }

    /// Split the payload into the M_PDU first header pointer and packet zone.
    pub fn packet_zone(&self) -> Result<(MpduHeader, &[u8])> {
        let payload = self.payload();
        if payload.len() < MPDU_HEADER_SIZE {
            return Err(DownlinkError::framing("payload too short for M_PDU header"));
        }
        let header = MpduHeader::parse([payload[0], payload[1]]);
        Ok((header, &payload[MPDU_HEADER_SIZE..]))
    }
}

/// M_PDU header: five spare bits and the 11-bit first header pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MpduHeader {
    pub spare: u8,
    pub first_header_pointer: u16,
}

impl MpduHeader {
    pub fn parse(bytes: [u8; 2]) -> Self {
        Self {
            spare: bytes[0] >> 3,
            first_header_pointer: (((bytes[0] & 0x07) as u16) << 8) | bytes[1] as u16,
        }
    }

    pub fn encode(&self) -> [u8; 2] {
        [(self.spare << 3) | ((self.first_header_pointer >> 8) as u8 & 0x07), self.first_header_pointer as u8]
    }

    /// Offset of the first packet header within the packet zone, if any.
    pub fn first_packet(&self) -> Option<usize> {
        (self.first_header_pointer != NO_PACKET_START).then_some(self.first_header_pointer as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_fields_are_extracted() {
        // version 1, scid 0b1000_0001, vcid 21, counter 0x0a0b0c, replay flag
        let raw = [0b0110_0000, 0b0101_0101, 0x0a, 0x0b, 0x0c, 0x80];
        let header = UnitHeader::parse(&raw).unwrap();
        assert_eq!(header.version, 1);
        assert_eq!(header.spacecraft_id, 0b1000_0001);
        assert_eq!(header.vcid, 21);
        assert_eq!(header.counter, 0x0a0b0c);
        assert!(header.is_replay());
        assert!(header.is_flagged());
        assert!(!header.is_fill());
        assert_eq!(header.encode(), raw);
    }

    #[test]
    fn frames_of_the_wrong_size_are_framing_errors() {
        let err = TransportUnit::from_frame(vec![0; 10], 892).unwrap_err();
        assert!(matches!(err, DownlinkError::Framing { .. }));
    }

    #[test]
    fn mpdu_pointer_decodes() {
        let header = MpduHeader::parse([0x07, 0xff]);
        assert_eq!(header.first_header_pointer, NO_PACKET_START);
        assert_eq!(header.first_packet(), None);

        let header = MpduHeader::parse([0x01, 0x2c]);
        assert_eq!(header.first_packet(), Some(300));
        assert_eq!(header.spare, 0);
        assert_eq!(header.encode(), [0x01, 0x2c]);
    }
}
