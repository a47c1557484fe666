//! Integrity and completion verdicts for reassembled files.

use std::time::{Duration, Instant};

use crate::DownlinkError;
use crate::types::{CloseReason, IntegrityStatus};

/// Everything the verdict depends on, gathered when a context closes.
#[derive(Debug, Clone, Copy)]
pub struct Assessment {
    pub reason: CloseReason,
    pub received: usize,
    pub declared: usize,
    /// Declared length describes the decoded file, so a shortfall is expected.
    pub length_exempt: bool,
    pub crc_failures: u32,
}

impl Assessment {
    /// Truncation outranks corruption: a file that never finished is truncated
    /// even if some of what did arrive failed its CRC.
    pub fn status(&self) -> IntegrityStatus {
        if !self.reason.is_complete() {
            return IntegrityStatus::Truncated;
        }
        if self.shortfall().is_some() {
            return IntegrityStatus::Truncated;
        }
        if self.crc_failures > 0 {
            return IntegrityStatus::Corrupt;
        }
        IntegrityStatus::Ok
    }

    /// Bytes missing from the declared length, unless the length is exempt.
    pub fn shortfall(&self) -> Option<DownlinkError> {
        (self.received < self.declared && !self.length_exempt)
            .then_some(DownlinkError::FileTruncated { received: self.received, declared: self.declared })
    }
}

/// Whether a context last extended at `last_activity` has stalled by `now`.
pub fn is_stalled(last_activity: Instant, now: Instant, timeout: Duration) -> bool {
    now.saturating_duration_since(last_activity) >= timeout
}
