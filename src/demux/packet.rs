//! Application packet reassembly from M_PDU packet zones.
//!
//! Packets run across unit boundaries. Each unit's first header pointer says
//! where the first packet header in its packet zone begins; bytes before it
//! belong to the packet already in progress. When the pointer and the
//! in-progress packet disagree, the pointer wins and the partial packet is
//! discarded.

use tracing::{debug, trace, warn};

use crate::types::{
    ApplicationPacket, MpduHeader, PACKET_CRC_SIZE, PACKET_HEADER_SIZE, PACKET_VERSION,
    PacketHeader,
};
use crate::DownlinkError;
use crate::wire::crc::verify_packet_crc;

/// Packets and faults produced by one unit.
#[derive(Debug, Default)]
pub struct PacketOutput {
    pub packets: Vec<ApplicationPacket>,
    pub idle: u32,
    pub crc_failures: u32,
    pub overflows: u32,
    pub resyncs: u32,
}

#[derive(Debug, Default)]
struct PartialPacket {
    header_bytes: Vec<u8>,
    header: Option<PacketHeader>,
    data: Vec<u8>,
}

impl PartialPacket {
    /// Consume bytes until the packet is complete or `bytes` runs out.
    ///
    /// Returns the header instead when it is malformed.
    fn fill(&mut self, bytes: &[u8], max_data_length: usize) -> Result<usize, PacketHeader> {
        let mut used = 0;
        if self.header.is_none() {
            let n = (PACKET_HEADER_SIZE - self.header_bytes.len()).min(bytes.len());
            self.header_bytes.extend_from_slice(&bytes[..n]);
            used += n;
            if self.header_bytes.len() < PACKET_HEADER_SIZE {
                return Ok(used);
            }
            let Ok(header) = PacketHeader::parse(&self.header_bytes) else {
                return Ok(used);
            };
            if header.version != PACKET_VERSION
                || header.data_length() > max_data_length
                || header.data_length() < PACKET_CRC_SIZE
            {
                return Err(header);
            }
            self.data.reserve(header.data_length());
            self.header = Some(header);
        }

        if let Some(header) = &self.header {
            let n = (header.data_length() - self.data.len()).min(bytes.len() - used);
            self.data.extend_from_slice(&bytes[used..used + n]);
            used += n;
        }
        Ok(used)
    }

    fn is_complete(&self) -> bool {
        self.header.is_some_and(|h| self.data.len() == h.data_length())
    }
}

/// Per-channel packet reassembly state.
#[derive(Debug)]
pub struct PacketReassembler {
    vcid: u8,
    max_data_length: usize,
    partial: Option<PartialPacket>,
}

impl PacketReassembler {
    pub fn new(vcid: u8, max_data_length: usize) -> Self {
        Self { vcid, max_data_length, partial: None }
    }

    /// Whether a packet is currently split across units.
    pub fn has_partial(&self) -> bool {
        self.partial.is_some()
    }

    /// Drop any partial packet. Returns whether one was dropped.
    pub fn reset(&mut self) -> bool {
        self.partial.take().is_some()
    }

    /// Process the packet zone of one unit.
    pub fn push(&mut self, mpdu: MpduHeader, zone: &[u8]) -> PacketOutput {
        let mut out = PacketOutput::default();
        let pointer = mpdu.first_packet();

        if mpdu.spare != 0 || pointer.is_some_and(|p| p >= zone.len()) {
            warn!(
                vcid = self.vcid,
                spare = mpdu.spare,
                pointer = mpdu.first_header_pointer,
                "Invalid M_PDU header; dropping packet state"
            );
            self.partial = None;
            out.resyncs += 1;
            return out;
        }

        // Finish the packet carried over from the previous unit.
        let mut continued = None;
        if let Some(mut partial) = self.partial.take() {
            let limit = pointer.unwrap_or(zone.len());
            match partial.fill(&zone[..limit], self.max_data_length) {
                Err(header) => self.overflow(header, &mut out),
                Ok(used) if partial.is_complete() => {
                    self.finish(partial, &mut out);
                    continued = Some(used);
                }
                Ok(_) if pointer.is_none() => {
                    self.partial = Some(partial);
                    return out;
                }
                Ok(used) => {
                    debug!(
                        vcid = self.vcid,
                        used,
                        pointer = limit,
                        "Packet header pointer precedes end of partial packet; resyncing"
                    );
                    out.resyncs += 1;
                }
            }
        }

        let mut offset = match (continued, pointer) {
            (Some(end), Some(start)) if end != start => {
                debug!(vcid = self.vcid, end, start, "Packet boundary disagrees with header pointer");
                out.resyncs += 1;
                start
            }
            (Some(end), _) => end,
            (None, Some(start)) => start,
            (None, None) => return out,
        };

        while offset < zone.len() {
            let mut partial = PartialPacket::default();
            match partial.fill(&zone[offset..], self.max_data_length) {
                Err(header) => {
                    self.overflow(header, &mut out);
                    break;
                }
                Ok(used) => {
                    offset += used;
                    if partial.is_complete() {
                        self.finish(partial, &mut out);
                    } else {
                        self.partial = Some(partial);
                    }
                }
            }
        }

        out
    }

    fn overflow(&mut self, header: PacketHeader, out: &mut PacketOutput) {
        let fault = DownlinkError::PacketOverflow {
            vcid: self.vcid,
            declared: header.data_length(),
            limit: self.max_data_length,
        };
        warn!(
            apid = header.apid,
            version = header.version,
            error = %fault,
            "Malformed packet header; resyncing at next unit"
        );
        self.partial = None;
        out.overflows += 1;
    }

    fn finish(&self, partial: PartialPacket, out: &mut PacketOutput) {
        let Some(header) = partial.header else {
            return;
        };
        if header.is_idle() {
            out.idle += 1;
            return;
        }
        let checked = verify_packet_crc(&partial.data);
        let crc_ok = checked.is_ok();
        if let Err(e) = checked {
            warn!(
                vcid = self.vcid,
                apid = header.apid,
                sequence = header.sequence_count,
                error = %e,
                "Packet CRC mismatch"
            );
            out.crc_failures += 1;
        }
        trace!(
            vcid = self.vcid,
            apid = header.apid,
            sequence = header.sequence_count,
            len = partial.data.len(),
            "Packet complete"
        );
        out.packets.push(ApplicationPacket { vcid: self.vcid, header, data: partial.data, crc_ok });
    }
}
