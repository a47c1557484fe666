//! Read-only diagnostics counters.
//!
//! The intake task owns every section except `persistence` and publishes a
//! snapshot through a `watch` channel; the persistence task replaces the
//! `persistence` section of the same snapshot.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::types::IntegrityStatus;

/// Counters for one virtual channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelCounters {
    pub units: u64,
    pub bytes: u64,
    pub duplicates: u64,
    pub gap_events: u64,
    pub missing_units: u64,
    pub resets: u64,
    pub flagged_units: u64,
    pub packets: u64,
    pub idle_packets: u64,
    pub crc_failures: u64,
    pub packet_overflows: u64,
    pub packet_resyncs: u64,
    pub orphan_packets: u64,
    pub overflow_bytes: u64,
    pub missing_packets: u64,
    pub invalid_file_headers: u64,
    pub files_opened: u64,
    pub files_completed: u64,
    pub files_ok: u64,
    pub files_corrupt: u64,
    pub files_truncated: u64,
}

impl ChannelCounters {
    pub fn record_file(&mut self, status: IntegrityStatus) {
        self.files_completed += 1;
        match status {
            IntegrityStatus::Ok => self.files_ok += 1,
            IntegrityStatus::Corrupt => self.files_corrupt += 1,
            IntegrityStatus::Truncated => self.files_truncated += 1,
        }
    }
}

/// Counters for the receiver stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntakeCounters {
    pub units_read: u64,
    pub framing_errors: u64,
    pub rejected_spacecraft: u64,
    pub fill_units: u64,
    pub discarded_tail_bytes: u64,
}

/// Counters for product handling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchCounters {
    pub files: u64,
    pub artifacts: u64,
    pub decode_failures: u64,
    pub bulletins: u64,
    pub images_stitched: u64,
    pub images_evicted: u64,
    pub segments_rejected: u64,
    pub dcs_crc_failures: u64,
}

/// Counters for the persistence stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PersistenceCounters {
    pub written: u64,
    pub renamed: u64,
    pub write_retries: u64,
    pub write_failures: u64,
    pub dropped_queue_full: u64,
    pub dropped_shutdown: u64,
}

/// Counters for the ingest source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceCounters {
    pub connected: bool,
    pub errors: u64,
    pub reconnects: u64,
}

/// Complete diagnostics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    pub channels: BTreeMap<u8, ChannelCounters>,
    pub intake: IntakeCounters,
    pub dispatch: DispatchCounters,
    pub persistence: PersistenceCounters,
    pub source: SourceCounters,
}

impl Diagnostics {
    pub fn channel(&self, vcid: u8) -> Option<&ChannelCounters> {
        self.channels.get(&vcid)
    }

    pub fn channel_mut(&mut self, vcid: u8) -> &mut ChannelCounters {
        self.channels.entry(vcid).or_default()
    }

    /// Files emitted across all channels.
    pub fn files_completed(&self) -> u64 {
        self.channels.values().map(|c| c.files_completed).sum()
    }

    pub fn total_gap_events(&self) -> u64 {
        self.channels.values().map(|c| c.gap_events).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_outcomes_are_tallied_per_channel() {
        let mut diag = Diagnostics::default();
        diag.channel_mut(21).record_file(IntegrityStatus::Ok);
        diag.channel_mut(21).record_file(IntegrityStatus::Truncated);
        diag.channel_mut(2).record_file(IntegrityStatus::Corrupt);

        let vc21 = diag.channel(21).unwrap();
        assert_eq!((vc21.files_ok, vc21.files_truncated), (1, 1));
        assert_eq!(diag.channel(2).unwrap().files_corrupt, 1);
        assert_eq!(diag.files_completed(), 3);
        assert!(diag.channel(5).is_none());
    }
}
