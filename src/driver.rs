//! Driver spawns and manages the intake and persistence tasks

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::DownlinkError;
use crate::config::DownlinkConfig;
use crate::demux::Pipeline;
use crate::diagnostics::{Diagnostics, PersistenceCounters};
use crate::dispatch::{Artifact, Dispatcher};
use crate::persist::Persister;
use crate::provider::UnitSource;
use crate::storage::Storage;
use crate::types::CompletedFile;

/// Result of spawning driver tasks
pub struct DriverChannels {
    /// Latest diagnostics snapshot
    pub diagnostics: watch::Receiver<Diagnostics>,
    /// Flips to `true` once both tasks have stopped
    pub finished: watch::Receiver<bool>,
    /// Cancellation token for graceful shutdown
    pub cancel: CancellationToken,
}

/// Driver spawns and manages the processing tasks
///
/// The intake task owns the source, the reassembly pipeline and the
/// dispatcher, and hands artifacts to the persistence task through a bounded
/// broadcast queue. Intake never waits on storage: when the queue is full the
/// oldest unwritten artifact is lost and counted.
pub struct Driver;

impl Driver {
    /// Spawn driver tasks for the given source with the default dispatcher.
    pub fn spawn<S>(source: S, config: &DownlinkConfig, storage: Arc<dyn Storage>) -> DriverChannels
    where
        S: UnitSource,
    {
        let dispatcher = Dispatcher::new(config.reassembly.pending_images)
            .with_max_image_pixels(config.reassembly.max_image_pixels);
        Self::spawn_with(source, config, storage, dispatcher)
    }

    /// Spawn driver tasks with a custom dispatcher (codec and unpacker).
    pub fn spawn_with<S>(
        source: S,
        config: &DownlinkConfig,
        storage: Arc<dyn Storage>,
        dispatcher: Dispatcher,
    ) -> DriverChannels
    where
        S: UnitSource,
    {
        let (diagnostics_tx, diagnostics_rx) = watch::channel(Diagnostics::default());
        let diagnostics_tx = Arc::new(diagnostics_tx);
        let (finished_tx, finished_rx) = watch::channel(false);
        let (artifact_tx, artifact_rx) = broadcast::channel(config.persistence.queue_capacity);
        let cancel = CancellationToken::new();

        let intake = Intake {
            source,
            pipeline: Pipeline::new(config.mission.clone()),
            dispatcher,
            artifacts: artifact_tx,
            diagnostics: diagnostics_tx.clone(),
            stall_timeout: config.reassembly.stall_timeout(),
            sweep_interval: config.reassembly.sweep_interval(),
            max_reconnect_attempts: config.receiver.max_reconnect_attempts,
            attempts: 0,
        };
        let intake = tokio::spawn(intake.run(cancel.clone()));

        let persister = Persister::new(storage, config.persistence.write_retries);
        tokio::spawn(Self::persistence_task(
            artifact_rx,
            persister,
            intake,
            diagnostics_tx,
            finished_tx,
            cancel.clone(),
            config.persistence.drain_grace(),
        ));

        DriverChannels { diagnostics: diagnostics_rx, finished: finished_rx, cancel }
    }

    /// Persistence task - writes queued artifacts until intake stops
    ///
    /// After cancellation the queue keeps draining until the grace period
    /// runs out; whatever is left is counted as dropped.
    async fn persistence_task(
        mut rx: broadcast::Receiver<Artifact>,
        mut persister: Persister,
        intake: JoinHandle<()>,
        diagnostics: Arc<watch::Sender<Diagnostics>>,
        finished: watch::Sender<bool>,
        cancel: CancellationToken,
        drain_grace: Duration,
    ) {
        info!("Persistence task started");
        let mut counters = PersistenceCounters::default();
        let mut deadline: Option<tokio::time::Instant> = None;

        loop {
            let received = match deadline {
                None => tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(queued = rx.len(), grace = ?drain_grace, "Draining artifact queue");
                        deadline = Some(tokio::time::Instant::now() + drain_grace);
                        continue;
                    }
                    received = rx.recv() => received,
                },
                Some(deadline) => match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Ok(received) => received,
                    Err(_) => {
                        let left = rx.len() as u64;
                        if left > 0 {
                            warn!(dropped = left, "Drain grace expired; artifacts dropped");
                        }
                        counters.dropped_shutdown += left;
                        break;
                    }
                },
            };

            match received {
                Ok(artifact) => {
                    let write = persister.persist(&artifact, &mut counters);
                    let outcome = match deadline {
                        Some(deadline) => tokio::time::timeout_at(deadline, write).await.ok(),
                        None => Some(write.await),
                    };
                    match outcome {
                        Some(Ok(name)) => trace!(name = %name, "Artifact stored"),
                        // already logged and counted by the persister
                        Some(Err(_)) => {}
                        None => {
                            let left = 1 + rx.len() as u64;
                            warn!(dropped = left, name = %artifact.name, "Drain grace expired mid-write");
                            counters.dropped_shutdown += left;
                            break;
                        }
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    warn!(dropped = n, "Artifact queue full; oldest artifacts dropped");
                    counters.dropped_queue_full += n;
                }
                Err(RecvError::Closed) => break,
            }
            publish_persistence(&diagnostics, &counters);
        }

        drop(rx);
        if let Err(e) = intake.await {
            error!(error = %e, "Intake task failed");
        }
        publish_persistence(&diagnostics, &counters);
        info!(written = counters.written, failures = counters.write_failures, "Persistence task ended");
        let _ = finished.send(true);
    }
}

/// Reassembly time follows the runtime clock, so a paused test clock drives
/// stall expiry too.
fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

fn publish_persistence(diagnostics: &watch::Sender<Diagnostics>, counters: &PersistenceCounters) {
    diagnostics.send_modify(|d| d.persistence = counters.clone());
}

/// State owned by the intake task.
struct Intake<S> {
    source: S,
    pipeline: Pipeline,
    dispatcher: Dispatcher,
    artifacts: broadcast::Sender<Artifact>,
    diagnostics: Arc<watch::Sender<Diagnostics>>,
    stall_timeout: Duration,
    sweep_interval: Duration,
    max_reconnect_attempts: u32,
    /// Consecutive source failures since the last good unit
    attempts: u32,
}

impl<S: UnitSource> Intake<S> {
    async fn run(mut self, cancel: CancellationToken) {
        info!(source = %self.source.describe(), "Intake task started");
        self.pipeline.diagnostics_mut().source.connected = true;
        self.publish();

        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        sweep.tick().await;

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Intake cancelled");
                    break;
                }
                _ = sweep.tick() => {
                    let files = self.pipeline.sweep(now(), self.stall_timeout);
                    if !files.is_empty() {
                        debug!(files = files.len(), "Stalled files flushed");
                    }
                    self.route(files);
                    self.publish();
                    continue;
                }
                result = self.source.next_unit() => result,
            };

            match result {
                Ok(Some(unit)) => {
                    self.attempts = 0;
                    let files = self.pipeline.push_unit_at(unit, now());
                    if !files.is_empty() {
                        self.route(files);
                        self.publish();
                    }
                }
                Ok(None) => {
                    info!(units = self.pipeline.diagnostics().intake.units_read, "Source ended");
                    break;
                }
                Err(e) => {
                    if !self.recover(e, &cancel).await {
                        break;
                    }
                }
            }
        }

        let files = self.pipeline.shutdown();
        if !files.is_empty() {
            info!(files = files.len(), "Open files flushed as incomplete");
        }
        self.route(files);
        let evicted = self.dispatcher.flush(&mut self.pipeline.diagnostics_mut().dispatch);
        self.send(evicted);
        self.pipeline.record_discarded_tail(self.source.stats().discarded_tail_bytes);
        self.pipeline.diagnostics_mut().source.connected = false;
        self.publish();
        info!(
            files = self.pipeline.diagnostics().files_completed(),
            artifacts = self.pipeline.diagnostics().dispatch.artifacts,
            "Intake task ended"
        );
    }

    /// Back off and reconnect. Returns `false` when the source is abandoned.
    async fn recover(&mut self, mut err: DownlinkError, cancel: &CancellationToken) -> bool {
        loop {
            self.attempts += 1;
            let source = &mut self.pipeline.diagnostics_mut().source;
            source.errors += 1;
            source.connected = false;
            self.publish();

            if !err.is_retryable() {
                error!(error = %err, "Source failed");
                return false;
            }
            if self.attempts > self.max_reconnect_attempts {
                error!(attempts = self.attempts, error = %err, "Too many source errors, giving up");
                return false;
            }
            error!(attempt = self.attempts, max = self.max_reconnect_attempts, error = %err, "Source error");

            // doubles per consecutive failure, 1.6s at most
            let backoff = Duration::from_millis(50 * (1 << self.attempts.min(5)));
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(backoff) => {}
            }

            match self.source.reconnect().await {
                Ok(()) => {
                    let files = self.pipeline.reset();
                    info!(
                        source = %self.source.describe(),
                        flushed = files.len(),
                        "Reconnected; channel state reset"
                    );
                    let source = &mut self.pipeline.diagnostics_mut().source;
                    source.reconnects += 1;
                    source.connected = true;
                    self.route(files);
                    self.publish();
                    return true;
                }
                Err(e) => err = e,
            }
        }
    }

    fn route(&mut self, files: Vec<CompletedFile>) {
        for file in files {
            let artifacts = self.dispatcher.dispatch(&file, &mut self.pipeline.diagnostics_mut().dispatch);
            self.send(artifacts);
        }
    }

    fn send(&self, artifacts: Vec<Artifact>) {
        for artifact in artifacts {
            if let Err(e) = self.artifacts.send(artifact) {
                warn!(name = %e.0.name, "Persistence task gone; artifact dropped");
            }
        }
    }

    /// Publish everything but the persistence section.
    fn publish(&self) {
        let snapshot = self.pipeline.diagnostics();
        self.diagnostics.send_modify(|d| {
            let persistence = std::mem::take(&mut d.persistence);
            *d = snapshot.clone();
            d.persistence = persistence;
        });
    }
}
