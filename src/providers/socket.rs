//! TCP source: the receiver process serving frames on a socket.

use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use super::reader::FrameReader;
use crate::provider::{SourceStats, UnitSource};
use crate::types::TransportUnit;
use crate::{DownlinkError, Result};

/// Frames from a TCP connection to the receiver.
///
/// The receiver closing the socket is an error, not an end of stream: a
/// live downlink never ends on its own.
#[derive(Debug)]
pub struct SocketSource {
    addr: String,
    frame_size: usize,
    connect_timeout: Duration,
    reader: Option<FrameReader<BufReader<TcpStream>>>,
    stats: SourceStats,
}

impl SocketSource {
    pub async fn connect(addr: impl Into<String>, frame_size: usize, connect_timeout: Duration) -> Result<Self> {
        let mut source =
            Self { addr: addr.into(), frame_size, connect_timeout, reader: None, stats: SourceStats::default() };
        source.reconnect().await?;
        Ok(source)
    }

    pub fn is_connected(&self) -> bool {
        self.reader.is_some()
    }

    /// Drop the connection, folding its counters into the running totals.
    fn disconnect(&mut self) {
        if let Some(reader) = self.reader.take() {
            self.stats.discarded_tail_bytes += reader.discarded_tail_bytes();
            if reader.buffered() > 0 {
                self.stats.discarded_tail_bytes += reader.buffered() as u64;
            }
        }
    }
}

#[async_trait::async_trait]
impl UnitSource for SocketSource {
    async fn next_unit(&mut self) -> Result<Option<TransportUnit>> {
        let Some(reader) = self.reader.as_mut() else {
            return Err(DownlinkError::connection_failed(format!("not connected to {}", self.addr)));
        };
        match reader.next_frame().await {
            Ok(Some(frame)) => {
                self.stats.frames += 1;
                TransportUnit::from_frame(frame, self.frame_size).map(Some)
            }
            Ok(None) => {
                warn!(addr = %self.addr, "Receiver closed the connection");
                self.disconnect();
                Err(DownlinkError::connection_failed(format!("{} closed the connection", self.addr)))
            }
            Err(e) => {
                self.disconnect();
                Err(DownlinkError::connection_failed_with_source(
                    format!("read from {} failed", self.addr),
                    Box::new(e),
                ))
            }
        }
    }

    async fn reconnect(&mut self) -> Result<()> {
        self.disconnect();
        debug!(addr = %self.addr, "Connecting to receiver");
        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(DownlinkError::connection_failed_with_source(
                    format!("connect to {} failed", self.addr),
                    Box::new(e),
                ));
            }
            Err(_) => return Err(DownlinkError::Timeout { duration: self.connect_timeout }),
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Could not disable Nagle");
        }
        info!(addr = %self.addr, "Connected to receiver");
        self.reader = Some(FrameReader::new(BufReader::new(stream), self.frame_size));
        Ok(())
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    fn stats(&self) -> SourceStats {
        let mut stats = self.stats;
        if let Some(reader) = &self.reader {
            stats.discarded_tail_bytes += reader.discarded_tail_bytes();
        }
        stats
    }
}
