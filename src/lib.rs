//! Transport demultiplexing and file reassembly for LRIT/HRIT weather-satellite
//! downlinks.
//!
//! Downlink takes the fixed-size transport units produced by a ground-station
//! receiver, splits them by virtual channel, rebuilds the variable-length
//! packets they carry, reassembles packets into files, checks each file's
//! integrity and hands the result to product handlers that name and store it.
//!
//! # Features
//!
//! - **Gap aware**: unit and packet counters are tracked per channel; lost,
//!   duplicated and reordered units are counted, never silently merged
//! - **Never lossy by surprise**: corrupt and truncated files are emitted with a
//!   status, unknown products are kept raw
//! - **Decoupled storage**: intake never waits on disk; a bounded queue sits
//!   between reassembly and persistence
//! - **Observable**: per-channel counters through a watch channel or a
//!   throttled stream
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use downlink::{Downlink, DownlinkConfig, UpdateRate};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DownlinkConfig::from_file("downlink.yaml")?;
//!     downlink::logging::init(&config.log_filter);
//!
//!     let connection = Downlink::connect("127.0.0.1:5004", config).await?;
//!     let mut updates = connection.diagnostics_updates(UpdateRate::Max(1));
//!     while let Some(diag) = updates.next().await {
//!         println!("files: {}, gaps: {}", diag.files_completed(), diag.total_gap_events());
//!     }
//!     Ok(())
//! }
//! ```

// Core types and error handling
pub mod config;
pub mod diagnostics;
mod error;
pub mod logging;
pub mod types;
pub mod wire;

// Reassembly and products
pub mod demux;
pub mod dispatch;
pub mod persist;
pub mod storage;

// Stream-based runtime
pub mod connection;
pub mod driver;
pub mod provider;
pub mod providers;
pub mod stream;

// Synthetic transport streams
pub mod sim;

pub use config::DownlinkConfig;
pub use connection::Connection;
pub use diagnostics::Diagnostics;
pub use error::*;
pub use types::UpdateRate;

use std::path::Path;
use std::sync::Arc;
use tracing::info;

use driver::Driver;
use provider::UnitSource;
use providers::{ReplaySource, SocketSource};
use storage::{FsStorage, Storage};

/// Unified entry point for downlink pipelines.
///
/// Every constructor validates the configuration, spawns the driver tasks on
/// the current Tokio runtime and returns a [`Connection`] handle. Artifacts
/// are written under `persistence.output_dir` unless a storage is supplied
/// through [`Downlink::spawn`].
///
/// ```rust
/// use downlink::{Downlink, DownlinkConfig};
/// use downlink::providers::ReplaySource;
/// use downlink::sim::{LritFileBuilder, Multiplexer, Packetizer};
/// use downlink::storage::MemoryStorage;
/// use downlink::types::FileType;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> downlink::Result<()> {
/// let file = LritFileBuilder::new(FileType::Text).annotation("hello.txt").data(b"hi").build();
/// let frames = Multiplexer::new(0, 892).frames(2, &Packetizer::new(5).packetize(&file, 1, 884));
///
/// let storage = MemoryStorage::new();
/// let source = ReplaySource::from_bytes(frames.concat(), 892);
/// let connection = Downlink::spawn(source, DownlinkConfig::default(), Arc::new(storage.clone()))?;
/// connection.finished().await;
/// let diagnostics = connection.diagnostics();
///
/// assert_eq!(diagnostics.persistence.written, 1);
/// assert_eq!(storage.get("text/notime_hello.txt").unwrap(), b"hi");
/// # Ok(())
/// # }
/// ```
pub struct Downlink;

impl Downlink {
    /// Connect to a receiver serving transport units over TCP.
    ///
    /// Connection loss is retried with backoff up to
    /// `receiver.max_reconnect_attempts`; every reconnect resets channel state.
    pub async fn connect(addr: impl Into<String>, config: DownlinkConfig) -> Result<Connection> {
        config.validate()?;
        let source =
            SocketSource::connect(addr, config.mission.frame_size, config.receiver.connect_timeout()).await?;
        Self::spawn_fs(source, config)
    }

    /// Replay a recording of concatenated transport units.
    pub async fn open<P: AsRef<Path>>(path: P, config: DownlinkConfig) -> Result<Connection> {
        config.validate()?;
        let source = ReplaySource::open(path, config.mission.frame_size).await?;
        Self::spawn_fs(source, config)
    }

    /// Replay transport units held in memory.
    pub fn from_bytes(bytes: Vec<u8>, config: DownlinkConfig) -> Result<Connection> {
        config.validate()?;
        let source = ReplaySource::from_bytes(bytes, config.mission.frame_size);
        Self::spawn_fs(source, config)
    }

    /// Run any source against any storage.
    pub fn spawn<S: UnitSource>(source: S, config: DownlinkConfig, storage: Arc<dyn Storage>) -> Result<Connection> {
        config.validate()?;
        let description = source.describe();
        info!(source = %description, mission = %config.mission.name, "Starting downlink");
        let channels = Driver::spawn(source, &config, storage);
        Ok(Connection::new(channels, description))
    }

    fn spawn_fs<S: UnitSource>(source: S, config: DownlinkConfig) -> Result<Connection> {
        let storage = Arc::new(FsStorage::new(config.persistence.output_dir.clone()));
        Self::spawn(source, config, storage)
    }
}
