//! Artifact persistence with collision suffixes and bounded retries.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::diagnostics::PersistenceCounters;
use crate::dispatch::Artifact;
use crate::dispatch::naming::with_suffix;
use crate::storage::{Storage, WriteError};
use crate::{DownlinkError, Result};

/// Suffixes tried before giving up on a name.
const DEFAULT_MAX_SUFFIX: u32 = 10_000;

/// Writes artifacts through a [`Storage`], never overwriting.
pub struct Persister {
    storage: Arc<dyn Storage>,
    written: HashSet<String>,
    retries: u32,
    backoff: Duration,
    max_suffix: u32,
}

impl Persister {
    pub fn new(storage: Arc<dyn Storage>, retries: u32) -> Self {
        Self {
            storage,
            written: HashSet::new(),
            retries,
            backoff: Duration::from_millis(50),
            max_suffix: DEFAULT_MAX_SUFFIX,
        }
    }

    pub fn with_max_suffix(mut self, max_suffix: u32) -> Self {
        self.max_suffix = max_suffix;
        self
    }

    /// Base delay of the exponential retry backoff.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Write `artifact`, returning the name it was stored under.
    pub async fn persist(&mut self, artifact: &Artifact, counters: &mut PersistenceCounters) -> Result<String> {
        let mut suffix = 0;
        let mut name = self.free_name(&artifact.name, &mut suffix).await.map_err(|e| unnamed(e, counters))?;
        let mut attempt = 0u32;

        loop {
            match self.storage.write(&name, &artifact.bytes).await {
                Ok(()) => {
                    debug!(name = %name, bytes = artifact.bytes.len(), "Artifact persisted");
                    counters.written += 1;
                    if suffix > 0 {
                        counters.renamed += 1;
                    }
                    self.written.insert(name.clone());
                    return Ok(name);
                }
                Err(WriteError::Exists(_)) => {
                    // lost a race with another writer
                    self.written.insert(name);
                    suffix += 1;
                    name = self.free_name(&artifact.name, &mut suffix).await.map_err(|e| unnamed(e, counters))?;
                }
                Err(e) if e.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    counters.write_retries += 1;
                    let delay = self.backoff * (1 << attempt.min(5));
                    warn!(name = %name, attempt, retries = self.retries, error = %e, "Write failed; retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(name = %name, error = %e, "Write failed; artifact dropped");
                    counters.write_failures += 1;
                    return Err(DownlinkError::Write { name, source: Box::new(e) });
                }
            }
        }
    }

    /// First name at or after `suffix` not written this session and not in storage.
    async fn free_name(&self, base: &str, suffix: &mut u32) -> Result<String> {
        while *suffix <= self.max_suffix {
            let candidate = if *suffix == 0 { base.to_string() } else { with_suffix(base, *suffix) };
            if !self.written.contains(&candidate) {
                match self.storage.exists(&candidate).await {
                    Ok(false) => return Ok(candidate),
                    Ok(true) => {}
                    // let the write itself report the problem
                    Err(WriteError::Io { .. }) => return Ok(candidate),
                    Err(e) => {
                        return Err(DownlinkError::Write { name: candidate, source: Box::new(e) });
                    }
                }
            }
            *suffix += 1;
        }
        Err(DownlinkError::Write {
            name: base.to_string(),
            source: format!("no free name after {} suffixes", self.max_suffix).into(),
        })
    }
}

fn unnamed(err: DownlinkError, counters: &mut PersistenceCounters) -> DownlinkError {
    error!(error = %err, "No usable name; artifact dropped");
    counters.write_failures += 1;
    err
}
