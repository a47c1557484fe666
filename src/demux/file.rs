//! File reassembly from application packets.
//!
//! Each virtual channel has at most one open file. The first packet of a file
//! starts with a 10-byte transport file header giving the file's total length;
//! the remaining user data of that packet and of every following packet is
//! appended in order until that length is reached or a packet flagged as the
//! last one arrives. Bytes a packet carries past the declared length belong to
//! the next file: they open it when they start with a plausible transport
//! header and are counted as overflow otherwise.
//!
//! Per-channel state machine:
//!
//! ```text
//! Idle -> HeaderSeen -> Accumulating -> { Complete | Incomplete }
//! ```
//!
//! `HeaderSeen` means a file is open but its header records are not yet fully
//! buffered. Closing returns to `Idle`.

use chrono::Utc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::integrity::{Assessment, is_stalled};
use crate::DownlinkError;
use crate::types::{
    ApplicationPacket, CloseReason, CompletedFile, CounterStep, PACKET_SEQUENCE_MODULUS, PacketHeader,
    Quality, TRANSPORT_HEADER_SIZE, TransportFileHeader, classify,
};
use crate::wire::headers::{FileHeaders, PRIMARY_HEADER_SIZE, PrimaryHeader};

/// Reassembly state of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Idle,
    HeaderSeen,
    Accumulating,
}

/// Identifies the transport unit a packet completed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitMark {
    /// Per-channel index of the unit, increasing by one per accepted unit.
    pub index: u64,
    pub flagged: bool,
}

/// Side effects of feeding packets, beyond completed files.
#[derive(Debug, Default)]
pub struct FileEvents {
    pub files: Vec<CompletedFile>,
    pub opened: u32,
    pub orphans: u32,
    pub missing_packets: u32,
    pub overflow_bytes: u64,
    pub invalid_headers: u32,
}

#[derive(Debug)]
struct FileContext {
    apid: u16,
    file_counter: u16,
    declared_length: usize,
    buffer: Vec<u8>,
    headers: Option<FileHeaders>,
    headers_invalid: bool,
    last_sequence: u16,
    last_unit: Option<u64>,
    quality: Quality,
    packet_offsets: Vec<usize>,
    last_activity: Instant,
}

impl FileContext {
    fn note_unit(&mut self, mark: UnitMark) {
        if self.last_unit != Some(mark.index) {
            self.last_unit = Some(mark.index);
            self.quality.units += 1;
            if mark.flagged {
                self.quality.flagged_units += 1;
            }
        }
    }

    /// Append up to the declared length and return what did not fit.
    fn append<'b>(&mut self, bytes: &'b [u8], crc_ok: bool, now: Instant, events: &mut FileEvents) -> &'b [u8] {
        self.packet_offsets.push(self.buffer.len());
        let room = self.declared_length - self.buffer.len();
        let (fits, excess) = bytes.split_at(bytes.len().min(room));
        self.buffer.extend_from_slice(fits);
        if !crc_ok {
            self.quality.crc_failures += 1;
        }
        self.last_activity = now;
        self.parse_headers(events);
        excess
    }

    fn parse_headers(&mut self, events: &mut FileEvents) {
        if self.headers.is_some() || self.headers_invalid || self.buffer.len() < PRIMARY_HEADER_SIZE {
            return;
        }
        let result = PrimaryHeader::parse(&self.buffer).and_then(|primary| {
            if self.buffer.len() < primary.total_header_length as usize {
                return Ok(None);
            }
            FileHeaders::parse(&self.buffer).map(Some)
        });
        match result {
            Ok(Some(headers)) => {
                if let Some(primary) = headers.primary {
                    let expected = primary.total_header_length as u64 + primary.data_length();
                    if expected != self.declared_length as u64 && !headers.is_rice_compressed() {
                        debug!(
                            apid = self.apid,
                            declared = self.declared_length,
                            headers = expected,
                            "Declared length disagrees with primary header"
                        );
                    }
                }
                self.headers = Some(headers);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(apid = self.apid, error = %e, "Unparseable file headers");
                self.headers_invalid = true;
                events.invalid_headers += 1;
            }
        }
    }

    fn is_full(&self) -> bool {
        self.buffer.len() >= self.declared_length
    }

    fn state(&self) -> ContextState {
        if self.headers.is_some() { ContextState::Accumulating } else { ContextState::HeaderSeen }
    }

    fn close(self, vcid: u8, reason: CloseReason) -> CompletedFile {
        let assessment = Assessment {
            reason,
            received: self.buffer.len(),
            declared: self.declared_length,
            length_exempt: self.headers.as_ref().is_some_and(FileHeaders::is_rice_compressed),
            crc_failures: self.quality.crc_failures,
        };
        let status = assessment.status();
        if let Some(short) = assessment.shortfall() {
            warn!(vcid, apid = self.apid, file_counter = self.file_counter, ?reason, error = %short, "File short of declared length");
        }
        info!(
            vcid,
            apid = self.apid,
            file_counter = self.file_counter,
            received = assessment.received,
            declared = assessment.declared,
            ?reason,
            ?status,
            "File closed"
        );
        CompletedFile {
            vcid,
            apid: self.apid,
            file_counter: self.file_counter,
            data: self.buffer.into(),
            headers: self.headers,
            declared_length: self.declared_length,
            packet_offsets: self.packet_offsets,
            status,
            quality: self.quality,
            close_reason: reason,
            received_at: Utc::now(),
        }
    }
}

/// Per-channel file reassembly.
#[derive(Debug)]
pub struct FileReassembler {
    vcid: u8,
    max_file_length: usize,
    context: Option<FileContext>,
}

impl FileReassembler {
    pub fn new(vcid: u8, max_file_length: usize) -> Self {
        Self { vcid, max_file_length, context: None }
    }

    pub fn state(&self) -> ContextState {
        self.context.as_ref().map(FileContext::state).unwrap_or(ContextState::Idle)
    }

    /// APID of the open file, if any.
    pub fn open_apid(&self) -> Option<u16> {
        self.context.as_ref().map(|c| c.apid)
    }

    /// Bytes buffered for the open file.
    pub fn buffered(&self) -> usize {
        self.context.as_ref().map(|c| c.buffer.len()).unwrap_or(0)
    }

    /// Count a unit against the open file.
    pub fn note_unit(&mut self, mark: UnitMark) {
        if let Some(ctx) = self.context.as_mut() {
            ctx.note_unit(mark);
        }
    }

    /// Record lost units against the open file.
    pub fn note_gap(&mut self, missing_units: u32) {
        if let Some(ctx) = self.context.as_mut() {
            ctx.quality.gap_units += missing_units;
        }
    }

    pub fn push_packet(
        &mut self,
        packet: ApplicationPacket,
        mark: UnitMark,
        now: Instant,
        events: &mut FileEvents,
    ) {
        let header = packet.header;
        let user = packet.user_data();
        let mut excess: &[u8] = &[];
        if header.sequence_flags.opens_file() {
            if let Some(previous) = self.context.take() {
                warn!(vcid = self.vcid, apid = previous.apid, "New file started before previous finished");
                events.files.push(previous.close(self.vcid, CloseReason::Superseded));
            }
            match self.file_start(user) {
                Ok((transport, declared)) => {
                    excess = self.begin(header, transport, declared, user, packet.crc_ok, mark, now, events);
                }
                Err(e) => {
                    warn!(vcid = self.vcid, apid = header.apid, error = %e, "File start rejected");
                    events.invalid_headers += 1;
                }
            }
        } else {
            let Some(ctx) = self.context.as_mut() else {
                debug!(vcid = self.vcid, apid = header.apid, "Packet with no open file");
                events.orphans += 1;
                return;
            };
            if ctx.apid != header.apid {
                debug!(
                    vcid = self.vcid,
                    apid = header.apid,
                    open_apid = ctx.apid,
                    "Packet for a different APID than the open file"
                );
                events.orphans += 1;
                return;
            }
            match classify(
                Some(ctx.last_sequence as u32),
                header.sequence_count as u32,
                PACKET_SEQUENCE_MODULUS,
            ) {
                CounterStep::Duplicate => {
                    debug!(vcid = self.vcid, apid = header.apid, "Duplicate packet discarded");
                    events.orphans += 1;
                    return;
                }
                CounterStep::Gap { missing } => {
                    warn!(
                        vcid = self.vcid,
                        apid = header.apid,
                        missing,
                        "Packet sequence gap within file"
                    );
                    ctx.quality.missing_packets += missing;
                    events.missing_packets += missing;
                }
                CounterStep::Reset => {
                    debug!(vcid = self.vcid, apid = header.apid, "Packet sequence stepped backwards");
                }
                CounterStep::First | CounterStep::Next => {}
            }
            ctx.last_sequence = header.sequence_count;
            ctx.note_unit(mark);
            excess = ctx.append(user, packet.crc_ok, now, events);
        }

        loop {
            let done = self
                .context
                .as_ref()
                .is_some_and(|ctx| ctx.is_full() || header.sequence_flags.closes_file());
            if done {
                if let Some(ctx) = self.context.take() {
                    events.files.push(ctx.close(self.vcid, CloseReason::Completed));
                }
            }
            if excess.is_empty() {
                break;
            }
            excess = self.redirect(header, excess, packet.crc_ok, mark, now, events);
        }
    }

    /// Transport header and declared length of a file whose user data starts
    /// with `user`.
    fn file_start(&self, user: &[u8]) -> Result<(TransportFileHeader, usize), DownlinkError> {
        let transport = TransportFileHeader::parse(user)
            .map_err(|e| DownlinkError::framing(format!("transport file header: {e}")))?;
        let declared = transport.length_bytes();
        if declared < PRIMARY_HEADER_SIZE as u64 || declared > self.max_file_length as u64 {
            return Err(DownlinkError::framing(format!(
                "declared file length {declared} outside {PRIMARY_HEADER_SIZE}..={}",
                self.max_file_length
            )));
        }
        Ok((transport, declared as usize))
    }

    /// Open a file from `user`, which starts with its transport header.
    #[allow(clippy::too_many_arguments)]
    fn begin<'b>(
        &mut self,
        header: PacketHeader,
        transport: TransportFileHeader,
        declared: usize,
        user: &'b [u8],
        crc_ok: bool,
        mark: UnitMark,
        now: Instant,
        events: &mut FileEvents,
    ) -> &'b [u8] {
        debug!(
            vcid = self.vcid,
            apid = header.apid,
            file_counter = transport.file_counter,
            declared,
            "File opened"
        );
        let mut ctx = FileContext {
            apid: header.apid,
            file_counter: transport.file_counter,
            declared_length: declared,
            buffer: Vec::with_capacity(declared.min(1 << 20)),
            headers: None,
            headers_invalid: false,
            last_sequence: header.sequence_count,
            last_unit: None,
            quality: Quality::default(),
            packet_offsets: Vec::new(),
            last_activity: now,
        };
        ctx.note_unit(mark);
        let excess = ctx.append(&user[TRANSPORT_HEADER_SIZE..], crc_ok, now, events);
        events.opened += 1;
        self.context = Some(ctx);
        excess
    }

    /// Hand bytes left over by a full file to the next one.
    #[allow(clippy::too_many_arguments)]
    fn redirect<'b>(
        &mut self,
        header: PacketHeader,
        bytes: &'b [u8],
        crc_ok: bool,
        mark: UnitMark,
        now: Instant,
        events: &mut FileEvents,
    ) -> &'b [u8] {
        match self.file_start(bytes) {
            Ok((transport, declared)) => {
                debug!(vcid = self.vcid, apid = header.apid, bytes = bytes.len(), "Excess bytes open the next file");
                self.begin(header, transport, declared, bytes, crc_ok, mark, now, events)
            }
            Err(e) => {
                warn!(
                    vcid = self.vcid,
                    apid = header.apid,
                    excess = bytes.len(),
                    error = %e,
                    "Packet runs past declared file length; excess discarded"
                );
                events.overflow_bytes += bytes.len() as u64;
                &[]
            }
        }
    }

    /// Close the open file, if any, as incomplete.
    pub fn flush(&mut self, reason: CloseReason) -> Option<CompletedFile> {
        self.context.take().map(|ctx| ctx.close(self.vcid, reason))
    }

    /// Close the open file if it has not been extended within `timeout`.
    pub fn flush_if_stalled(&mut self, now: Instant, timeout: Duration) -> Option<CompletedFile> {
        if self.context.as_ref().is_some_and(|ctx| is_stalled(ctx.last_activity, now, timeout)) {
            warn!(vcid = self.vcid, "Open file stalled");
            return self.flush(CloseReason::Stalled);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IntegrityStatus, SequenceFlags};

    fn packet(apid: u16, seq: u16, flags: SequenceFlags, user: &[u8], crc_ok: bool) -> ApplicationPacket {
        let mut data = user.to_vec();
        data.extend_from_slice(&[0, 0]);
        ApplicationPacket {
            vcid: 1,
            header: PacketHeader {
                version: 0,
                packet_type: 0,
                secondary_header: false,
                apid,
                sequence_flags: flags,
                sequence_count: seq,
                length_field: (data.len() - 1) as u16,
            },
            data,
            crc_ok,
        }
    }

    /// File body: primary header only (text type) followed by `data_len` bytes.
    fn file_bytes(data_len: usize) -> Vec<u8> {
        let mut out = vec![0, 0, 16, 2];
        out.extend_from_slice(&16u32.to_be_bytes());
        out.extend_from_slice(&((data_len as u64) * 8).to_be_bytes());
        out.extend((0..data_len).map(|i| i as u8));
        out
    }

    /// Transport header declaring all of `file`, followed by its first `take` bytes.
    fn first_payload(file: &[u8], counter: u16, take: usize) -> Vec<u8> {
        let mut out = TransportFileHeader { file_counter: counter, length_bits: file.len() as u64 * 8 }
            .encode()
            .to_vec();
        out.extend_from_slice(&file[..take]);
        out
    }

    fn mark(index: u64) -> UnitMark {
        UnitMark { index, flagged: false }
    }

    #[test]
    fn multi_packet_file_completes_at_declared_length() {
        let file = file_bytes(40);
        let now = Instant::now();
        let mut r = FileReassembler::new(1, 1 << 20);
        let mut ev = FileEvents::default();

        r.push_packet(packet(10, 0, SequenceFlags::First, &first_payload(&file, 1, 20), true), mark(0), now, &mut ev);
        // the first packet carried the transport header plus 20 file bytes
        assert_eq!(r.state(), ContextState::Accumulating);
        assert_eq!(r.buffered(), 20);

        r.push_packet(packet(10, 1, SequenceFlags::Continuation, &file[20..40], true), mark(1), now, &mut ev);
        assert!(ev.files.is_empty());
        r.push_packet(packet(10, 2, SequenceFlags::Last, &file[40..], true), mark(2), now, &mut ev);

        assert_eq!(ev.files.len(), 1);
        let f = &ev.files[0];
        assert_eq!(&f.data[..], &file[..]);
        assert_eq!(f.status, IntegrityStatus::Ok);
        assert_eq!(f.packet_offsets, vec![0, 20, 40]);
        assert_eq!(f.quality.units, 3);
        assert_eq!(r.state(), ContextState::Idle);
    }

    #[test]
    fn new_first_packet_supersedes_open_file() {
        let file = file_bytes(40);
        let now = Instant::now();
        let mut r = FileReassembler::new(1, 1 << 20);
        let mut ev = FileEvents::default();
        r.push_packet(packet(10, 0, SequenceFlags::First, &first_payload(&file, 1, 20), true), mark(0), now, &mut ev);
        r.push_packet(packet(11, 0, SequenceFlags::Standalone, &first_payload(&file, 2, file.len()), true), mark(1), now, &mut ev);

        assert_eq!(ev.files.len(), 2);
        assert_eq!(ev.files[0].close_reason, CloseReason::Superseded);
        assert_eq!(ev.files[0].status, IntegrityStatus::Truncated);
        assert_eq!(ev.files[1].status, IntegrityStatus::Ok);
        assert_eq!(ev.files[1].file_counter, 2);
    }

    #[test]
    fn overflow_bytes_are_never_appended() {
        let file = file_bytes(8);
        let mut payload = first_payload(&file, 3, file.len());
        payload.extend_from_slice(&[0xee; 5]);
        let mut r = FileReassembler::new(1, 1 << 20);
        let mut ev = FileEvents::default();
        r.push_packet(packet(4, 0, SequenceFlags::First, &payload, true), mark(0), Instant::now(), &mut ev);

        assert_eq!(ev.overflow_bytes, 5);
        assert_eq!(ev.files.len(), 1);
        assert_eq!(&ev.files[0].data[..], &file[..]);
    }

    #[test]
    fn bytes_past_the_declared_length_open_the_next_file() {
        let first = file_bytes(8);
        let second = file_bytes(24);
        let mut payload = first_payload(&first, 3, first.len());
        payload.extend_from_slice(&first_payload(&second, 4, 10));
        let now = Instant::now();
        let mut r = FileReassembler::new(1, 1 << 20);
        let mut ev = FileEvents::default();

        r.push_packet(packet(4, 0, SequenceFlags::First, &payload, true), mark(0), now, &mut ev);
        assert_eq!(ev.files.len(), 1);
        assert_eq!(r.buffered(), 10);
        r.push_packet(packet(4, 1, SequenceFlags::Last, &second[10..], true), mark(1), now, &mut ev);

        assert_eq!(ev.overflow_bytes, 0);
        assert_eq!(ev.opened, 2);
        assert_eq!(ev.files.len(), 2);
        assert_eq!(&ev.files[0].data[..], &first[..]);
        assert_eq!(ev.files[0].file_counter, 3);
        assert_eq!(&ev.files[1].data[..], &second[..]);
        assert_eq!(ev.files[1].file_counter, 4);
        assert!(ev.files.iter().all(|f| f.status == IntegrityStatus::Ok));
    }

    #[test]
    fn orphans_and_sequence_gaps_are_counted() {
        let file = file_bytes(40);
        let now = Instant::now();
        let mut r = FileReassembler::new(1, 1 << 20);
        let mut ev = FileEvents::default();
        r.push_packet(packet(10, 0, SequenceFlags::Continuation, &[1, 2], true), mark(0), now, &mut ev);
        assert_eq!(ev.orphans, 1);

        r.push_packet(packet(10, 5, SequenceFlags::First, &first_payload(&file, 1, 20), true), mark(1), now, &mut ev);
        r.push_packet(packet(99, 6, SequenceFlags::Continuation, &[1, 2], true), mark(2), now, &mut ev);
        assert_eq!(ev.orphans, 2);

        r.push_packet(packet(10, 8, SequenceFlags::Continuation, &file[20..30], true), mark(3), now, &mut ev);
        assert_eq!(ev.missing_packets, 2);
        r.push_packet(packet(10, 8, SequenceFlags::Continuation, &file[30..40], true), mark(3), now, &mut ev);
        assert_eq!(ev.orphans, 3);

        let f = r.flush(CloseReason::Shutdown).unwrap();
        assert_eq!(f.status, IntegrityStatus::Truncated);
        assert_eq!(f.quality.missing_packets, 2);
    }

    #[test]
    fn crc_failure_is_carried_to_the_verdict() {
        let file = file_bytes(10);
        let mut r = FileReassembler::new(1, 1 << 20);
        let mut ev = FileEvents::default();
        r.push_packet(packet(4, 0, SequenceFlags::Standalone, &first_payload(&file, 1, file.len()), false), mark(0), Instant::now(), &mut ev);
        assert_eq!(ev.files[0].status, IntegrityStatus::Corrupt);
        assert_eq!(ev.files[0].quality.crc_failures, 1);
    }

    #[test]
    fn stalled_files_are_flushed() {
        let file = file_bytes(40);
        let start = Instant::now();
        let mut r = FileReassembler::new(1, 1 << 20);
        let mut ev = FileEvents::default();
        r.push_packet(packet(10, 0, SequenceFlags::First, &first_payload(&file, 1, 20), true), mark(0), start, &mut ev);

        let timeout = Duration::from_secs(10);
        assert!(r.flush_if_stalled(start + Duration::from_secs(9), timeout).is_none());
        let f = r.flush_if_stalled(start + Duration::from_secs(10), timeout).unwrap();
        assert_eq!(f.close_reason, CloseReason::Stalled);
        assert_eq!(f.status, IntegrityStatus::Truncated);
        assert!(r.flush(CloseReason::Shutdown).is_none());
    }

    #[test]
    fn implausible_declared_length_is_rejected() {
        let mut r = FileReassembler::new(1, 64);
        let mut ev = FileEvents::default();
        let payload = first_payload(&file_bytes(100), 1, 20);
        r.push_packet(packet(4, 0, SequenceFlags::First, &payload, true), mark(0), Instant::now(), &mut ev);
        assert_eq!(ev.invalid_headers, 1);
        assert_eq!(r.state(), ContextState::Idle);

        r.push_packet(packet(4, 0, SequenceFlags::First, &[0, 1, 2], true), mark(1), Instant::now(), &mut ev);
        assert_eq!(ev.invalid_headers, 2);
    }
}
