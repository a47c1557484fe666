//! Runtime configuration.
//!
//! Configuration is a single YAML document; every section and field has a
//! default, so an empty document is a valid configuration for the GOES
//! HRIT/LRIT broadcast.
//!
//! ```rust
//! use downlink::DownlinkConfig;
//!
//! let config = DownlinkConfig::from_yaml_str(
//!     "mission:\n  spacecraft_ids: [64]\nreassembly:\n  stall_timeout_ms: 30000\n",
//! )
//! .unwrap();
//! assert_eq!(config.mission.frame_size, 892);
//! assert_eq!(config.mission.spacecraft_ids, vec![64]);
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dispatch::image::DEFAULT_MAX_IMAGE_PIXELS;
use crate::types::{PACKET_HEADER_SIZE, UNIT_HEADER_SIZE};
use crate::{DownlinkError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DownlinkConfig {
    pub mission: MissionProfile,
    pub reassembly: ReassemblyConfig,
    pub receiver: ReceiverConfig,
    pub persistence: PersistenceConfig,
    /// `tracing_subscriber::EnvFilter` directive used by [`crate::logging::init`].
    pub log_filter: String,
}

impl Default for DownlinkConfig {
    fn default() -> Self {
        Self {
            mission: MissionProfile::default(),
            reassembly: ReassemblyConfig::default(),
            receiver: ReceiverConfig::default(),
            persistence: PersistenceConfig::default(),
            log_filter: default_log_filter(),
        }
    }
}

/// Link-layer constants of the broadcast being received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MissionProfile {
    pub name: String,
    /// Size of one transport unit on the wire, header included.
    pub frame_size: usize,
    /// Accepted spacecraft ids. Empty accepts any.
    pub spacecraft_ids: Vec<u8>,
    /// Largest packet data field (CRC included) accepted before the packet is
    /// treated as corrupt.
    pub max_packet_length: usize,
    /// Largest declared file length accepted when a file is opened.
    pub max_file_length: usize,
}

impl Default for MissionProfile {
    fn default() -> Self {
        Self {
            name: "goes-hrit".to_string(),
            frame_size: 892,
            spacecraft_ids: Vec::new(),
            max_packet_length: 8192,
            max_file_length: 64 * 1024 * 1024,
        }
    }
}

impl MissionProfile {
    /// Payload bytes carried by each unit.
    pub fn payload_size(&self) -> usize {
        self.frame_size - UNIT_HEADER_SIZE
    }

    /// Whether a spacecraft id belongs to this mission.
    pub fn accepts_spacecraft(&self, id: u8) -> bool {
        self.spacecraft_ids.is_empty() || self.spacecraft_ids.contains(&id)
    }
}

/// File reassembly timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReassemblyConfig {
    /// An open file not extended for this long is flushed as incomplete.
    pub stall_timeout_ms: u64,
    /// How often open files are checked for stalls.
    pub sweep_interval_ms: u64,
    /// Segmented images held open at once before the oldest is emitted.
    pub pending_images: usize,
    /// Largest canvas, in pixels, a segmented image may claim. Segments
    /// declaring more are emitted unstitched.
    pub max_image_pixels: usize,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            stall_timeout_ms: 60_000,
            sweep_interval_ms: 1_000,
            pending_images: 3,
            max_image_pixels: DEFAULT_MAX_IMAGE_PIXELS,
        }
    }
}

impl ReassemblyConfig {
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Ingest source behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReceiverConfig {
    /// Consecutive failed reconnects before the source is abandoned.
    pub max_reconnect_attempts: u32,
    pub connect_timeout_ms: u64,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self { max_reconnect_attempts: 10, connect_timeout_ms: 5_000 }
    }
}

impl ReceiverConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Artifact queue and storage behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PersistenceConfig {
    pub output_dir: PathBuf,
    /// Artifacts queued for writing; the oldest is dropped when full.
    pub queue_capacity: usize,
    /// Retries after the first failed write.
    pub write_retries: u32,
    /// Time allowed to drain the queue on shutdown.
    pub drain_grace_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("downlink-out"),
            queue_capacity: 256,
            write_retries: 3,
            drain_grace_ms: 5_000,
        }
    }
}

impl PersistenceConfig {
    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }
}

fn default_log_filter() -> String {
    "downlink=info".to_string()
}

impl DownlinkConfig {
    /// Parse and validate a YAML configuration document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: DownlinkConfig =
            if yaml.trim().is_empty() { Self::default() } else { serde_yaml_ng::from_str(yaml)? };
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| DownlinkError::file_error(path.to_path_buf(), e))?;
        Self::from_yaml_str(&text)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let mission = &self.mission;
        // header + M_PDU pointer + at least one packet header
        let min_frame = UNIT_HEADER_SIZE + 2 + PACKET_HEADER_SIZE;
        if mission.frame_size < min_frame {
            return Err(DownlinkError::config(format!(
                "frame_size {} is below the minimum of {} bytes",
                mission.frame_size, min_frame
            )));
        }
        if !(2..=65_536).contains(&mission.max_packet_length) {
            return Err(DownlinkError::config(format!(
                "max_packet_length {} must be within 2..=65536",
                mission.max_packet_length
            )));
        }
        if mission.max_file_length == 0 {
            return Err(DownlinkError::config("max_file_length must be non-zero"));
        }
        if self.reassembly.sweep_interval_ms == 0 {
            return Err(DownlinkError::config("sweep_interval_ms must be non-zero"));
        }
        if self.reassembly.pending_images == 0 {
            return Err(DownlinkError::config("pending_images must be non-zero"));
        }
        if self.reassembly.max_image_pixels == 0 {
            return Err(DownlinkError::config("max_image_pixels must be non-zero"));
        }
        if self.persistence.queue_capacity == 0 {
            return Err(DownlinkError::config("queue_capacity must be non-zero"));
        }
        Ok(())
    }
}
