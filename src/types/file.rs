//! Completed file types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::wire::headers::FileHeaders;

/// File type code from the primary header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    Image,
    GtsMessage,
    Text,
    EncryptionKey,
    Dcs,
    Unknown(u8),
}

impl FileType {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => FileType::Image,
            1 => FileType::GtsMessage,
            2 => FileType::Text,
            3 => FileType::EncryptionKey,
            130 => FileType::Dcs,
            other => FileType::Unknown(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            FileType::Image => 0,
            FileType::GtsMessage => 1,
            FileType::Text => 2,
            FileType::EncryptionKey => 3,
            FileType::Dcs => 130,
            FileType::Unknown(code) => code,
        }
    }
}

/// Integrity verdict attached to every emitted file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntegrityStatus {
    Ok,
    Corrupt,
    Truncated,
}

/// Why a reassembly context was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloseReason {
    /// Declared length reached or final packet received.
    Completed,
    /// A new file started on the same channel.
    Superseded,
    /// No data arrived within the stall timeout.
    Stalled,
    /// The channel counter stepped backwards or the source reconnected.
    Reset,
    /// The pipeline is shutting down.
    Shutdown,
}

impl CloseReason {
    pub fn is_complete(self) -> bool {
        self == CloseReason::Completed
    }
}

/// Advisory reception quality of a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quality {
    /// Transport units lost while the file was open.
    pub gap_units: u32,
    /// Packets missing according to the packet sequence count.
    pub missing_packets: u32,
    /// Units carrying a non-zero signalling field.
    pub flagged_units: u32,
    /// Packets whose CRC did not match.
    pub crc_failures: u32,
    /// Units that contributed to the file.
    pub units: u32,
}

impl Quality {
    pub fn has_gaps(&self) -> bool {
        self.gap_units > 0 || self.missing_packets > 0
    }

    /// Share of contributing units that were clean, in `0.0..=1.0`.
    pub fn score(&self) -> f64 {
        let seen = self.units + self.gap_units;
        if seen == 0 {
            return 1.0;
        }
        let bad = self.gap_units + self.flagged_units.min(self.units);
        1.0 - bad as f64 / seen as f64
    }
}

/// A reassembled file handed to the dispatcher.
#[derive(Debug, Clone)]
pub struct CompletedFile {
    pub vcid: u8,
    pub apid: u16,
    pub file_counter: u16,
    /// Headers and data field as received.
    pub data: Arc<[u8]>,
    pub headers: Option<FileHeaders>,
    pub declared_length: usize,
    /// Start offset of each packet's contribution within `data`.
    pub packet_offsets: Vec<usize>,
    pub status: IntegrityStatus,
    pub quality: Quality,
    pub close_reason: CloseReason,
    pub received_at: DateTime<Utc>,
}

impl CompletedFile {
    pub fn file_type(&self) -> FileType {
        self.headers.as_ref().map(FileHeaders::file_type).unwrap_or(FileType::Unknown(u8::MAX))
    }

    /// Product time from the time stamp record, if present.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.headers.as_ref().and_then(FileHeaders::timestamp)
    }

    /// Data field following the header records.
    pub fn body(&self) -> &[u8] {
        let start = self.headers.as_ref().map(FileHeaders::header_length).unwrap_or(0);
        self.data.get(start..).unwrap_or(&[])
    }

    pub fn annotation(&self) -> Option<&str> {
        self.headers.as_ref()?.annotation.as_deref()
    }

    /// Product/region code: NOAA product ids when present, else the annotation stem.
    pub fn product_code(&self) -> Option<String> {
        let headers = self.headers.as_ref()?;
        if let Some(noaa) = &headers.noaa {
            return Some(format!("p{}-{}", noaa.product_id, noaa.product_subid));
        }
        headers
            .annotation
            .as_deref()
            .map(|a| a.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(a).to_string())
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_type_codes_map_both_ways() {
        for code in [0u8, 1, 2, 3, 130, 17] {
            assert_eq!(FileType::from_code(code).code(), code);
        }
        assert_eq!(FileType::from_code(130), FileType::Dcs);
        assert_eq!(FileType::from_code(9), FileType::Unknown(9));
    }

    #[test]
    fn quality_score_reflects_losses() {
        assert_eq!(Quality::default().score(), 1.0);
        let q = Quality { gap_units: 1, units: 3, ..Default::default() };
        assert!(q.has_gaps());
        assert!((q.score() - 0.75).abs() < 1e-9);
        let q = Quality { flagged_units: 2, units: 4, ..Default::default() };
        assert!(!q.has_gaps());
        assert!((q.score() - 0.5).abs() < 1e-9);
    }
}
