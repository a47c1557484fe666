//! Frame-aligned reads over any byte stream.

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::warn;

/// Cuts an [`AsyncRead`] into frames of a fixed size.
///
/// Progress on a partially read frame survives a dropped `next_frame` call,
/// so the reader can sit in a `select!` loop.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    frame_size: usize,
    buf: Vec<u8>,
    filled: usize,
    frames: u64,
    discarded_tail_bytes: u64,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, frame_size: usize) -> Self {
        Self {
            inner,
            frame_size,
            buf: vec![0; frame_size],
            filled: 0,
            frames: 0,
            discarded_tail_bytes: 0,
        }
    }

    /// Next whole frame, or `None` at end of stream. A partial tail is dropped.
    pub async fn next_frame(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        while self.filled < self.frame_size {
            let n = self.inner.read(&mut self.buf[self.filled..]).await?;
            if n == 0 {
                if self.filled > 0 {
                    warn!(bytes = self.filled, frame_size = self.frame_size, "Partial frame at end of stream discarded");
                    self.discarded_tail_bytes += self.filled as u64;
                    self.filled = 0;
                }
                return Ok(None);
            }
            self.filled += n;
        }
        self.filled = 0;
        self.frames += 1;
        Ok(Some(std::mem::replace(&mut self.buf, vec![0; self.frame_size])))
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn discarded_tail_bytes(&self) -> u64 {
        self.discarded_tail_bytes
    }

    /// Bytes of the frame currently being assembled.
    pub fn buffered(&self) -> usize {
        self.filled
    }
}
