//! Handle to a running downlink pipeline

use futures::{Stream, StreamExt};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::diagnostics::Diagnostics;
use crate::driver::DriverChannels;
use crate::stream::ThrottleExt;
use crate::types::UpdateRate;


/// A running pipeline: source, reassembly, dispatch and persistence.
///
/// Dropping the connection cancels its tasks; use [`Connection::shutdown`] to
/// wait for open files to flush and the artifact queue to drain.
pub struct Connection {
    diagnostics: watch::Receiver<Diagnostics>,
    finished: watch::Receiver<bool>,
    cancel: CancellationToken,
    source: String,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("source", &self.source)
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub(crate) fn new(channels: DriverChannels, source: String) -> Self {
        Self {
            diagnostics: channels.diagnostics,
            finished: channels.finished,
            cancel: channels.cancel,
            source,
        }
    }

    /// Current diagnostics snapshot
    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.borrow().clone()
    }

    /// Diagnostics as a stream
    ///
    /// Emits the current snapshot immediately, then every published change,
    /// at most `rate` times per second. The stream ends after the final
    /// snapshot once the pipeline has stopped.
    pub fn diagnostics_updates(&self, rate: UpdateRate) -> impl Stream<Item = Diagnostics> + 'static {
        let updates = WatchStream::new(self.diagnostics.clone());
        match rate.throttle_interval() {
            None => updates.boxed(),
            Some(interval) => updates.throttle(interval).boxed(),
        }
    }

    /// Wait until the source has ended and the artifact queue is drained.
    pub async fn finished(&self) {
        let mut finished = self.finished.clone();
        // an error means the tasks are gone, which is just as final
        let _ = finished.wait_for(|done| *done).await;
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    /// Stop the source, flush open files, drain the queue and return the
    /// final diagnostics.
    pub async fn shutdown(self) -> Diagnostics {
        info!(source = %self.source, "Shutting down");
        self.cancel.cancel();
        self.finished().await;
        self.diagnostics()
    }

    /// Description of the unit source
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
