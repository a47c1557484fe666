//! Virtual channel demultiplexing.
//!
//! Units are validated, routed by virtual channel id, and checked against the
//! channel's last counter before their packet zone is handed to that channel's
//! packet and file reassemblers. Channels are created lazily on first sight and
//! never interact.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use super::file::{ContextState, FileEvents, FileReassembler, UnitMark};
use super::packet::PacketReassembler;
use crate::DownlinkError;
use crate::config::MissionProfile;
use crate::diagnostics::{ChannelCounters, Diagnostics};
use crate::types::{
    CloseReason, CompletedFile, CounterStep, TransportUnit, UNIT_COUNTER_MODULUS, UNIT_VERSION,
    classify,
};

/// State kept for one virtual channel.
#[derive(Debug)]
pub struct ChannelState {
    vcid: u8,
    last_counter: Option<u32>,
    units: u64,
    packets: PacketReassembler,
    files: FileReassembler,
}

impl ChannelState {
    pub fn new(vcid: u8, mission: &MissionProfile) -> Self {
        Self {
            vcid,
            last_counter: None,
            units: 0,
            packets: PacketReassembler::new(vcid, mission.max_packet_length),
            files: FileReassembler::new(vcid, mission.max_file_length),
        }
    }

    pub fn last_counter(&self) -> Option<u32> {
        self.last_counter
    }

    pub fn file_state(&self) -> ContextState {
        self.files.state()
    }

    /// Process one unit addressed to this channel.
    pub fn accept(
        &mut self,
        unit: &TransportUnit,
        now: Instant,
        counters: &mut ChannelCounters,
    ) -> Vec<CompletedFile> {
        let header = unit.header;
        let mut closed = Vec::new();

        match classify(self.last_counter, header.counter, UNIT_COUNTER_MODULUS) {
            CounterStep::Duplicate => {
                debug!(vcid = self.vcid, counter = header.counter, "Duplicate unit discarded");
                counters.duplicates += 1;
                return closed;
            }
            CounterStep::Gap { missing } => {
                let gap = DownlinkError::SequenceGap { vcid: self.vcid, missing };
                warn!(previous = self.last_counter, counter = header.counter, error = %gap, "Unit counter gap");
                counters.gap_events += 1;
                counters.missing_units += missing as u64;
                if self.packets.reset() {
                    debug!(vcid = self.vcid, "Partial packet dropped after gap");
                }
                self.files.note_gap(missing);
            }
            CounterStep::Reset => {
                warn!(
                    vcid = self.vcid,
                    previous = self.last_counter,
                    counter = header.counter,
                    "Unit counter stepped backwards; resetting channel"
                );
                counters.resets += 1;
                self.packets.reset();
                closed.extend(self.files.flush(CloseReason::Reset));
            }
            CounterStep::First | CounterStep::Next => {}
        }
        self.last_counter = Some(header.counter);

        let mark = UnitMark { index: self.units, flagged: header.is_flagged() };
        self.units += 1;
        counters.units += 1;
        counters.bytes += unit.payload().len() as u64;
        if mark.flagged {
            counters.flagged_units += 1;
        }
        self.files.note_unit(mark);

        let (mpdu, zone) = match unit.packet_zone() {
            Ok(split) => split,
            Err(e) => {
                warn!(vcid = self.vcid, error = %e, "Unit without packet zone");
                return closed;
            }
        };
        let out = self.packets.push(mpdu, zone);
        trace!(
            vcid = self.vcid,
            counter = header.counter,
            packets = out.packets.len(),
            "Unit demultiplexed"
        );
        counters.packets += out.packets.len() as u64;
        counters.idle_packets += out.idle as u64;
        counters.crc_failures += out.crc_failures as u64;
        counters.packet_overflows += out.overflows as u64;
        counters.packet_resyncs += out.resyncs as u64;

        let mut events = FileEvents::default();
        for packet in out.packets {
            self.files.push_packet(packet, mark, now, &mut events);
        }
        counters.files_opened += events.opened as u64;
        counters.orphan_packets += events.orphans as u64;
        counters.missing_packets += events.missing_packets as u64;
        counters.overflow_bytes += events.overflow_bytes;
        counters.invalid_file_headers += events.invalid_headers as u64;

        closed.extend(events.files);
        for file in &closed {
            counters.record_file(file.status);
        }
        closed
    }

    pub fn flush(&mut self, reason: CloseReason) -> Option<CompletedFile> {
        self.packets.reset();
        self.files.flush(reason)
    }

    pub fn flush_if_stalled(&mut self, now: Instant, timeout: Duration) -> Option<CompletedFile> {
        self.files.flush_if_stalled(now, timeout)
    }
}

/// Routes units to per-channel state.
#[derive(Debug)]
pub struct Demultiplexer {
    mission: MissionProfile,
    channels: BTreeMap<u8, ChannelState>,
}

impl Demultiplexer {
    pub fn new(mission: MissionProfile) -> Self {
        Self { mission, channels: BTreeMap::new() }
    }

    pub fn channel(&self, vcid: u8) -> Option<&ChannelState> {
        self.channels.get(&vcid)
    }

    pub fn channel_ids(&self) -> impl Iterator<Item = u8> + '_ {
        self.channels.keys().copied()
    }

    /// Validate and route one unit. Returns files closed by it.
    pub fn push(
        &mut self,
        unit: &TransportUnit,
        now: Instant,
        diagnostics: &mut Diagnostics,
    ) -> Vec<CompletedFile> {
        let header = unit.header;
        diagnostics.intake.units_read += 1;

        if header.version != UNIT_VERSION {
            debug!(version = header.version, "Unit with unexpected version dropped");
            diagnostics.intake.framing_errors += 1;
            return Vec::new();
        }
        if !self.mission.accepts_spacecraft(header.spacecraft_id) {
            debug!(spacecraft_id = header.spacecraft_id, "Unit from unknown spacecraft dropped");
            diagnostics.intake.framing_errors += 1;
            diagnostics.intake.rejected_spacecraft += 1;
            return Vec::new();
        }
        if header.is_fill() {
            diagnostics.intake.fill_units += 1;
            return Vec::new();
        }

        let mission = &self.mission;
        let channel =
            self.channels.entry(header.vcid).or_insert_with(|| ChannelState::new(header.vcid, mission));
        channel.accept(unit, now, diagnostics.channel_mut(header.vcid))
    }

    /// Close every open file with `reason`, keeping channel counters.
    pub fn flush_all(&mut self, reason: CloseReason, diagnostics: &mut Diagnostics) -> Vec<CompletedFile> {
        let mut closed = Vec::new();
        for (vcid, channel) in self.channels.iter_mut() {
            if let Some(file) = channel.flush(reason) {
                diagnostics.channel_mut(*vcid).record_file(file.status);
                closed.push(file);
            }
        }
        closed
    }

    /// Close files that have not been extended within `timeout`.
    pub fn flush_stalled(
        &mut self,
        now: Instant,
        timeout: Duration,
        diagnostics: &mut Diagnostics,
    ) -> Vec<CompletedFile> {
        let mut closed = Vec::new();
        for (vcid, channel) in self.channels.iter_mut() {
            if let Some(file) = channel.flush_if_stalled(now, timeout) {
                diagnostics.channel_mut(*vcid).record_file(file.status);
                closed.push(file);
            }
        }
        closed
    }

    /// Forget all channel state, closing open files as reset.
    pub fn reset(&mut self, diagnostics: &mut Diagnostics) -> Vec<CompletedFile> {
        let closed = self.flush_all(CloseReason::Reset, diagnostics);
        self.channels.clear();
        closed
    }
}
