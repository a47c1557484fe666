//! Synthetic downlink generation.
//!
//! Builds files, packets and transport units the way a ground station would
//! emit them, so the intake pipeline can be exercised without a receiver:
//!
//! - [`LritFileBuilder`] lays out header records and a data field
//! - [`Packetizer`] splits a file into CRC-protected application packets,
//!   prefixed with the transport file header
//! - [`Multiplexer`] packs packets into fixed-size units for one virtual
//!   channel, maintaining counters and first header pointers and padding the
//!   last unit with an idle packet

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::types::{
    FILL_VCID, IDLE_APID, MPDU_HEADER_SIZE, MpduHeader, NO_PACKET_START, PACKET_HEADER_SIZE,
    PACKET_SEQUENCE_MODULUS, PacketHeader, SequenceFlags, TransportFileHeader, TransportUnit,
    UNIT_COUNTER_MODULUS, UNIT_HEADER_SIZE, UNIT_VERSION, UnitHeader,
};
use crate::types::FileType;
use crate::wire::crc::crc16;
use crate::wire::headers::{
    ANCILLARY_TEXT, ANNOTATION, IMAGE_STRUCTURE, NOAA_HEADER, NoaaCompression, PRIMARY_HEADER_SIZE,
    SEGMENT_IDENTIFICATION, SegmentIdentification, TIME_STAMP,
};
use crate::wire::time::utc_to_cds;

/// Smallest packet the reassembler accepts: header plus CRC.
const MIN_PACKET: usize = PACKET_HEADER_SIZE + 2;

/// Lays out a file: primary header, secondary records, data field.
#[derive(Debug, Clone)]
pub struct LritFileBuilder {
    file_type: FileType,
    records: Vec<u8>,
    data: Vec<u8>,
}

impl LritFileBuilder {
    pub fn new(file_type: FileType) -> Self {
        Self { file_type, records: Vec::new(), data: Vec::new() }
    }

    /// Append a raw record of any type.
    pub fn record(mut self, record_type: u8, body: &[u8]) -> Self {
        self.records.push(record_type);
        self.records.extend_from_slice(&((body.len() + 3) as u16).to_be_bytes());
        self.records.extend_from_slice(body);
        self
    }

    pub fn annotation(self, text: &str) -> Self {
        self.record(ANNOTATION, text.as_bytes())
    }

    pub fn ancillary_text(self, text: &str) -> Self {
        self.record(ANCILLARY_TEXT, text.as_bytes())
    }

    pub fn time_stamp(self, time: DateTime<Utc>) -> Self {
        let (days, ms) = utc_to_cds(time).unwrap_or((0, 0));
        let mut body = vec![0x40];
        body.extend_from_slice(&days.to_be_bytes());
        body.extend_from_slice(&ms.to_be_bytes());
        self.record(TIME_STAMP, &body)
    }

    pub fn noaa(self, product_id: u16, product_subid: u16, compression: NoaaCompression) -> Self {
        let mut body = b"NOAA".to_vec();
        body.extend_from_slice(&product_id.to_be_bytes());
        body.extend_from_slice(&product_subid.to_be_bytes());
        body.extend_from_slice(&0u16.to_be_bytes());
        body.push(compression.code());
        self.record(NOAA_HEADER, &body)
    }

    pub fn image_structure(self, bits_per_pixel: u8, columns: u16, lines: u16) -> Self {
        let mut body = vec![bits_per_pixel];
        body.extend_from_slice(&columns.to_be_bytes());
        body.extend_from_slice(&lines.to_be_bytes());
        body.push(0);
        self.record(IMAGE_STRUCTURE, &body)
    }

    pub fn segment(self, seg: SegmentIdentification) -> Self {
        let mut body = Vec::with_capacity(14);
        for v in [
            seg.image_id,
            seg.segment_seq,
            seg.start_column,
            seg.start_line,
            seg.max_segment,
            seg.max_column,
            seg.max_row,
        ] {
            body.extend_from_slice(&v.to_be_bytes());
        }
        self.record(SEGMENT_IDENTIFICATION, &body)
    }

    pub fn data(mut self, data: &[u8]) -> Self {
        self.data = data.to_vec();
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let total = (PRIMARY_HEADER_SIZE + self.records.len()) as u32;
        let mut out = Vec::with_capacity(total as usize + self.data.len());
        out.extend_from_slice(&[0, 0, PRIMARY_HEADER_SIZE as u8, self.file_type.code()]);
        out.extend_from_slice(&total.to_be_bytes());
        out.extend_from_slice(&(self.data.len() as u64 * 8).to_be_bytes());
        out.extend_from_slice(&self.records);
        out.extend_from_slice(&self.data);
        out
    }
}

/// Encode one packet: header, user data, CRC.
pub fn encode_packet(apid: u16, flags: SequenceFlags, sequence: u16, user: &[u8]) -> Vec<u8> {
    let header = PacketHeader {
        version: 0,
        packet_type: 0,
        secondary_header: false,
        apid,
        sequence_flags: flags,
        sequence_count: sequence,
        length_field: (user.len() + 1) as u16,
    };
    let mut out = Vec::with_capacity(PACKET_HEADER_SIZE + user.len() + 2);
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(user);
    out.extend_from_slice(&crc16(user).to_be_bytes());
    out
}

/// An idle packet occupying exactly `total_len` bytes (at least 8).
pub fn idle_packet(total_len: usize) -> Vec<u8> {
    let user = vec![0u8; total_len.max(MIN_PACKET) - MIN_PACKET];
    encode_packet(IDLE_APID, SequenceFlags::Standalone, 0, &user)
}

/// Splits files into packets for one APID.
#[derive(Debug, Clone)]
pub struct Packetizer {
    apid: u16,
    sequence: u16,
}

impl Packetizer {
    pub fn new(apid: u16) -> Self {
        Self { apid, sequence: 0 }
    }

    /// Packetize `file` with at most `max_user` user bytes per packet.
    pub fn packetize(&mut self, file: &[u8], file_counter: u16, max_user: usize) -> Vec<Vec<u8>> {
        let mut payload = TransportFileHeader { file_counter, length_bits: file.len() as u64 * 8 }
            .encode()
            .to_vec();
        payload.extend_from_slice(file);

        let chunks: Vec<&[u8]> = payload.chunks(max_user.max(1)).collect();
        let last = chunks.len() - 1;
        chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                let flags = match (i, last) {
                    (0, 0) => SequenceFlags::Standalone,
                    (0, _) => SequenceFlags::First,
                    (i, last) if i == last => SequenceFlags::Last,
                    _ => SequenceFlags::Continuation,
                };
                let packet = encode_packet(self.apid, flags, self.sequence, chunk);
                self.sequence = ((self.sequence as u32 + 1) % PACKET_SEQUENCE_MODULUS) as u16;
                packet
            })
            .collect()
    }
}

/// Packs packets into transport units.
#[derive(Debug, Clone)]
pub struct Multiplexer {
    spacecraft_id: u8,
    frame_size: usize,
    counters: BTreeMap<u8, u32>,
}

impl Multiplexer {
    pub fn new(spacecraft_id: u8, frame_size: usize) -> Self {
        Self { spacecraft_id, frame_size, counters: BTreeMap::new() }
    }

    /// Packet zone bytes per unit.
    pub fn zone_size(&self) -> usize {
        self.frame_size - UNIT_HEADER_SIZE - MPDU_HEADER_SIZE
    }

    /// Set the counter the next unit on `vcid` will carry.
    pub fn set_counter(&mut self, vcid: u8, counter: u32) {
        self.counters.insert(vcid, counter % UNIT_COUNTER_MODULUS);
    }

    /// Units for `packets` sent back to back on `vcid`, padded to a unit boundary.
    pub fn units(&mut self, vcid: u8, packets: &[Vec<u8>]) -> Vec<TransportUnit> {
        self.build(vcid, packets)
            .into_iter()
            .map(|(header, frame)| TransportUnit { header, data: frame.into() })
            .collect()
    }

    /// Same as [`Multiplexer::units`], as raw frames.
    pub fn frames(&mut self, vcid: u8, packets: &[Vec<u8>]) -> Vec<Vec<u8>> {
        self.build(vcid, packets).into_iter().map(|(_, frame)| frame).collect()
    }

    /// A unit on the fill channel.
    pub fn fill_frame(&mut self) -> Vec<u8> {
        let header = self.next_header(FILL_VCID);
        let mut frame = header.encode().to_vec();
        frame.extend_from_slice(&MpduHeader { spare: 0, first_header_pointer: NO_PACKET_START }.encode());
        frame.resize(self.frame_size, 0);
        frame
    }

    fn next_header(&mut self, vcid: u8) -> UnitHeader {
        let counter = self.counters.entry(vcid).or_insert(0);
        let header = UnitHeader {
            version: UNIT_VERSION,
            spacecraft_id: self.spacecraft_id,
            vcid,
            counter: *counter,
            signal: 0,
        };
        *counter = (*counter + 1) % UNIT_COUNTER_MODULUS;
        header
    }

    fn build(&mut self, vcid: u8, packets: &[Vec<u8>]) -> Vec<(UnitHeader, Vec<u8>)> {
        let zone = self.zone_size();
        let mut stream = Vec::new();
        let mut starts = Vec::new();
        for packet in packets {
            starts.push(stream.len());
            stream.extend_from_slice(packet);
        }
        let remainder = stream.len() % zone;
        if remainder != 0 {
            let mut fill = zone - remainder;
            while fill < MIN_PACKET {
                fill += zone;
            }
            starts.push(stream.len());
            stream.extend_from_slice(&idle_packet(fill));
        }

        stream
            .chunks(zone)
            .enumerate()
            .map(|(i, chunk)| {
                let base = i * zone;
                let pointer = starts
                    .iter()
                    .find(|&&s| s >= base && s < base + zone)
                    .map(|&s| (s - base) as u16)
                    .unwrap_or(NO_PACKET_START);
                let header = self.next_header(vcid);
                let mut frame = Vec::with_capacity(self.frame_size);
                frame.extend_from_slice(&header.encode());
                frame.extend_from_slice(&MpduHeader { spare: 0, first_header_pointer: pointer }.encode());
                frame.extend_from_slice(chunk);
                (header, frame)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PACKET_CRC_SIZE;
    use crate::wire::crc::packet_crc_ok;
    use crate::wire::headers::FileHeaders;

    #[test]
    fn built_files_parse_back() {
        let file = LritFileBuilder::new(FileType::Text)
            .annotation("A_NOTICE.TXT")
            .noaa(6, 1, NoaaCompression::Zip)
            .data(b"payload")
            .build();
        let headers = FileHeaders::parse(&file).unwrap();
        assert_eq!(headers.file_type(), FileType::Text);
        assert_eq!(headers.annotation.as_deref(), Some("A_NOTICE.TXT"));
        assert_eq!(&file[headers.header_length()..], b"payload");
    }

    #[test]
    fn packets_carry_flags_and_valid_crc() {
        let mut p = Packetizer::new(42);
        let packets = p.packetize(&[7u8; 100], 3, 40);
        // 110 bytes of transport header + file in 40-byte chunks
        assert_eq!(packets.len(), 3);
        let flags: Vec<_> = packets
            .iter()
            .map(|raw| PacketHeader::parse(raw).unwrap().sequence_flags)
            .collect();
        assert_eq!(flags, vec![SequenceFlags::First, SequenceFlags::Continuation, SequenceFlags::Last]);
        for raw in &packets {
            let header = PacketHeader::parse(raw).unwrap();
            assert_eq!(raw.len(), PACKET_HEADER_SIZE + header.data_length());
            assert!(packet_crc_ok(&raw[PACKET_HEADER_SIZE..]));
        }
        let next = p.packetize(&[1], 4, 40);
        assert_eq!(PacketHeader::parse(&next[0]).unwrap().sequence_count, 3);
        assert_eq!(next[0].len(), PACKET_HEADER_SIZE + 11 + PACKET_CRC_SIZE);
    }

    #[test]
    fn units_are_full_size_with_consecutive_counters() {
        let mut mux = Multiplexer::new(5, 892);
        mux.set_counter(3, UNIT_COUNTER_MODULUS - 1);
        let packets = Packetizer::new(1).packetize(&[9u8; 2000], 0, 884);
        let units = mux.units(3, &packets);
        assert!(units.len() >= 3);
        assert!(units.iter().all(|u| u.data.len() == 892 && u.header.vcid == 3));
        assert_eq!(units[0].header.counter, UNIT_COUNTER_MODULUS - 1);
        assert_eq!(units[1].header.counter, 0);
        let fill = mux.fill_frame();
        assert_eq!(fill.len(), 892);
        assert_eq!(UnitHeader::parse(&fill).unwrap().vcid, FILL_VCID);
    }

    #[test]
    fn short_remainders_get_a_spilling_idle_packet() {
        let mut mux = Multiplexer::new(0, 892);
        let zone = mux.zone_size();
        // leave 3 bytes free in the first zone
        let packet = encode_packet(9, SequenceFlags::Standalone, 0, &vec![0u8; zone - 3 - MIN_PACKET]);
        let units = mux.units(1, &[packet]);
        assert_eq!(units.len(), 2);
        let (second, _) = units[1].packet_zone().unwrap();
        assert_eq!(second.first_header_pointer, NO_PACKET_START);
    }
}
