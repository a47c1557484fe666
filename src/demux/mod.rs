//! The ordered intake pipeline: demultiplexer, packet reassembler, file
//! reassembler and integrity checker.
//!
//! [`Pipeline`] is synchronous and owns all per-channel state. The driver feeds
//! it one unit at a time and forwards the files it returns to the dispatcher.
//!
//! ```rust
//! use downlink::config::MissionProfile;
//! use downlink::demux::Pipeline;
//! use downlink::sim::{LritFileBuilder, Multiplexer, Packetizer};
//! use downlink::types::{FileType, IntegrityStatus};
//!
//! let file = LritFileBuilder::new(FileType::Text).annotation("notice.txt").data(b"hello").build();
//! let packets = Packetizer::new(300).packetize(&file, 1, 512);
//! let units = Multiplexer::new(0, 892).units(21, &packets);
//!
//! let mut pipeline = Pipeline::new(MissionProfile::default());
//! let files: Vec<_> = units.iter().flat_map(|u| pipeline.push_unit(u.clone())).collect();
//! assert_eq!(files.len(), 1);
//! assert_eq!(files[0].status, IntegrityStatus::Ok);
//! assert_eq!(&files[0].data[..], &file[..]);
//! ```

pub mod channel;
pub mod file;
pub mod integrity;
pub mod packet;


use std::time::{Duration, Instant};

pub use channel::{ChannelState, Demultiplexer};
pub use file::{ContextState, FileReassembler, UnitMark};
pub use packet::PacketReassembler;

use crate::config::MissionProfile;
use crate::diagnostics::Diagnostics;
use crate::types::{CloseReason, CompletedFile, TransportUnit};

/// Receiver-to-integrity pipeline with its diagnostics.
#[derive(Debug)]
pub struct Pipeline {
    frame_size: usize,
    demux: Demultiplexer,
    diagnostics: Diagnostics,
}

impl Pipeline {
    pub fn new(mission: MissionProfile) -> Self {
        Self { frame_size: mission.frame_size, demux: Demultiplexer::new(mission), diagnostics: Diagnostics::default() }
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// For the stages after reassembly, which count into the same snapshot.
    pub fn diagnostics_mut(&mut self) -> &mut Diagnostics {
        &mut self.diagnostics
    }

    pub fn demultiplexer(&self) -> &Demultiplexer {
        &self.demux
    }

    /// Push a raw frame, counting it as a framing error if it has the wrong size.
    pub fn push_frame(&mut self, frame: Vec<u8>) -> Vec<CompletedFile> {
        match TransportUnit::from_frame(frame, self.frame_size) {
            Ok(unit) => self.push_unit(unit),
            Err(e) => {
                tracing::debug!(error = %e, "Frame rejected");
                self.diagnostics.intake.units_read += 1;
                self.diagnostics.intake.framing_errors += 1;
                Vec::new()
            }
        }
    }

    pub fn push_unit(&mut self, unit: TransportUnit) -> Vec<CompletedFile> {
        self.push_unit_at(unit, Instant::now())
    }

    pub fn push_unit_at(&mut self, unit: TransportUnit, now: Instant) -> Vec<CompletedFile> {
        self.demux.push(&unit, now, &mut self.diagnostics)
    }

    /// Flush files not extended within `timeout`.
    pub fn sweep(&mut self, now: Instant, timeout: Duration) -> Vec<CompletedFile> {
        self.demux.flush_stalled(now, timeout, &mut self.diagnostics)
    }

    /// Flush everything and forget channel state, as after a reconnect.
    pub fn reset(&mut self) -> Vec<CompletedFile> {
        self.demux.reset(&mut self.diagnostics)
    }

    /// Flush every open file as incomplete.
    pub fn shutdown(&mut self) -> Vec<CompletedFile> {
        self.demux.flush_all(CloseReason::Shutdown, &mut self.diagnostics)
    }

    pub fn record_discarded_tail(&mut self, bytes: u64) {
        self.diagnostics.intake.discarded_tail_bytes += bytes;
    }
}
