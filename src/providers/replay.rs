//! Replay source for recorded frame streams

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncRead, BufReader};
use tokio::time::{Interval, interval};
use tracing::{debug, info};

use super::reader::FrameReader;
use crate::provider::{SourceStats, UnitSource};
use crate::types::TransportUnit;
use crate::{DownlinkError, Result};

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;

/// Replay source that reads a recorded byte stream, as fast as possible or
/// paced to a fixed frame rate.
pub struct ReplaySource {
    /// Frame reader over the recording
    reader: FrameReader<BoxedRead>,

    frame_size: usize,

    /// Optional pacing between frames
    pacing: Option<Interval>,

    origin: String,
}

impl std::fmt::Debug for ReplaySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplaySource")
            .field("origin", &self.origin)
            .field("frame_size", &self.frame_size)
            .field("frames", &self.reader.frames())
            .finish_non_exhaustive()
    }
}

impl ReplaySource {
    /// Open a recording of concatenated frames.
    pub async fn open<P: AsRef<Path>>(path: P, frame_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| DownlinkError::file_error(PathBuf::from(path), e))?;
        let len = file.metadata().await.map(|m| m.len()).unwrap_or(0);
        info!(path = %path.display(), frames = len / frame_size.max(1) as u64, "Opened recording");
        Ok(Self::from_reader(Box::new(BufReader::new(file)), frame_size, path.display().to_string()))
    }

    /// Replay frames held in memory.
    pub fn from_bytes(bytes: Vec<u8>, frame_size: usize) -> Self {
        let origin = format!("memory ({} bytes)", bytes.len());
        Self::from_reader(Box::new(std::io::Cursor::new(bytes)), frame_size, origin)
    }

    pub fn from_reader(reader: BoxedRead, frame_size: usize, origin: impl Into<String>) -> Self {
        Self { reader: FrameReader::new(reader, frame_size), frame_size, pacing: None, origin: origin.into() }
    }

    /// Deliver at most `frames_per_second` frames per second.
    pub fn paced(mut self, frames_per_second: f64) -> Self {
        if frames_per_second > 0.0 {
            let period = Duration::from_secs_f64(1.0 / frames_per_second);
            debug!(?period, "Replay pacing enabled");
            self.pacing = Some(interval(period));
        }
        self
    }
}

#[async_trait::async_trait]
impl UnitSource for ReplaySource {
    async fn next_unit(&mut self) -> Result<Option<TransportUnit>> {
        if let Some(pacing) = self.pacing.as_mut() {
            pacing.tick().await;
        }
        match self.reader.next_frame().await {
            Ok(Some(frame)) => TransportUnit::from_frame(frame, self.frame_size).map(Some),
            Ok(None) => {
                debug!(origin = %self.origin, frames = self.reader.frames(), "Reached end of recording");
                Ok(None)
            }
            Err(e) => Err(DownlinkError::file_error(PathBuf::from(&self.origin), e)),
        }
    }

    async fn reconnect(&mut self) -> Result<()> {
        Err(DownlinkError::connection_failed(format!("{} cannot be reopened mid-stream", self.origin)))
    }

    fn describe(&self) -> String {
        format!("replay:{}", self.origin)
    }

    fn stats(&self) -> SourceStats {
        SourceStats { frames: self.reader.frames(), discarded_tail_bytes: self.reader.discarded_tail_bytes() }
    }
}
