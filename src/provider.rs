//! Source trait for transport units

use crate::Result;
use crate::types::TransportUnit;

/// Running totals a source keeps about the raw byte stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// Whole frames handed out.
    pub frames: u64,
    /// Bytes of partial frames dropped at end of stream or on disconnect.
    pub discarded_tail_bytes: u64,
}

/// Trait for transport unit sources
///
/// Sources turn a byte stream into frame-aligned units and own their
/// transport. The driver owns the source and is the only caller.
#[async_trait::async_trait]
pub trait UnitSource: Send + 'static {
    /// Get the next unit
    ///
    /// Returns:
    /// - `Ok(Some(unit))` - a complete frame
    /// - `Ok(None)` - the stream ended normally
    /// - `Err(e)` - the transport failed; the driver decides whether to
    ///   call [`UnitSource::reconnect`]
    ///
    /// Must be cancel safe: the driver drops pending calls to run its
    /// stall sweep.
    async fn next_unit(&mut self) -> Result<Option<TransportUnit>>;

    /// Re-establish the transport after a failure.
    async fn reconnect(&mut self) -> Result<()>;

    /// Human-readable origin, for logs.
    fn describe(&self) -> String;

    fn stats(&self) -> SourceStats;
}
