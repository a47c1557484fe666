//! Error types for downlink processing.
//!
//! Every fault the ingest path can observe has a variant here, but only a few of
//! them ever escape to the caller. Data faults (framing, gaps, overflows,
//! truncation, integrity) are logged as the `error` field of a warning where
//! they are detected and recorded on diagnostics and on the emitted files;
//! the pipeline keeps going. Losing the ingest source is the one condition that
//! surfaces as a reconnect-or-exit decision.
//!
//! ## Error Categories
//!
//! - **Data Errors**: framing, sequence gaps, packet overflow, truncation, CRC mismatch
//! - **Product Errors**: decode and write failures from collaborators
//! - **Source Errors**: connection loss and I/O failures on the ingest source
//! - **Configuration Errors**: invalid or unreadable configuration
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use downlink::DownlinkError;
//!
//! let error = DownlinkError::connection_failed("receiver closed the socket");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for downlink operations.
pub type Result<T, E = DownlinkError> = std::result::Result<T, E>;

/// Main error type for downlink operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DownlinkError {
    #[error("Framing error: {reason}")]
    Framing { reason: String },

    #[error("Sequence gap on VC {vcid}: {missing} unit(s) missing")]
    SequenceGap { vcid: u8, missing: u32 },

    #[error("Packet overflow on VC {vcid}: declared length {declared} exceeds limit {limit}")]
    PacketOverflow { vcid: u8, declared: usize, limit: usize },

    #[error("File truncated: received {received} of {declared} bytes")]
    FileTruncated { received: usize, declared: usize },

    #[error("Integrity mismatch in {context}: expected {expected:#x}, computed {computed:#x}")]
    IntegrityMismatch { context: String, expected: u32, computed: u32 },

    #[error("Decode failure for {artifact}: {reason}")]
    Decode { artifact: String, reason: String },

    #[error("Failed to write {name}")]
    Write {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Ingest source failure: {reason}")]
    Connection {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("I/O error on {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error in {context}: {details}")]
    Parse { context: String, details: String },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },
}

impl DownlinkError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownlinkError::Connection { .. } => true,
            DownlinkError::Timeout { .. } => true,
            DownlinkError::Write { .. } => true,
            DownlinkError::File { .. } => false,
            DownlinkError::Framing { .. } => false,
            DownlinkError::SequenceGap { .. } => false,
            DownlinkError::PacketOverflow { .. } => false,
            DownlinkError::FileTruncated { .. } => false,
            DownlinkError::IntegrityMismatch { .. } => false,
            DownlinkError::Decode { .. } => false,
            DownlinkError::Parse { .. } => false,
            DownlinkError::Config { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            DownlinkError::Connection { .. } => vec![
                "Check that the receiver process is running",
                "Verify the receiver address and port",
                "Increase the reconnect attempt budget",
            ],
            DownlinkError::File { .. } => vec![
                "Check the file exists and is readable",
                "Check the output directory is writable",
                "Ensure sufficient disk space",
            ],
            DownlinkError::Framing { .. } => vec![
                "Verify the receiver emits the configured frame size",
                "Check the spacecraft id list in the mission profile",
            ],
            DownlinkError::SequenceGap { .. } => vec![
                "Check antenna pointing and signal quality",
                "Inspect receiver logs for dropped frames",
            ],
            DownlinkError::PacketOverflow { .. } => vec![
                "Verify the mission maximum packet length",
                "Check the upstream decoder for bit errors",
            ],
            DownlinkError::FileTruncated { .. } => vec![
                "Increase the stall timeout",
                "Check signal quality during the affected pass",
            ],
            DownlinkError::IntegrityMismatch { .. } => vec![
                "Check signal quality and FEC statistics",
                "Treat the affected product as unreliable",
            ],
            DownlinkError::Decode { .. } => vec![
                "Check the codec supports the product compression",
                "Keep the raw artifact for offline decoding",
            ],
            DownlinkError::Write { .. } => vec![
                "Check storage permissions and free space",
                "Increase the write retry budget",
            ],
            DownlinkError::Parse { .. } => vec![
                "Check data format compatibility",
                "Verify source data integrity",
            ],
            DownlinkError::Config { .. } => vec![
                "Check the configuration file syntax",
                "Compare against the documented defaults",
            ],
            DownlinkError::Timeout { .. } => vec![
                "Increase the timeout duration",
                "Check system load",
            ],
        }
    }

    /// Helper constructor for file errors with path context.
    pub fn file_error(path: PathBuf, source: std::io::Error) -> Self {
        DownlinkError::File { path, source }
    }

    /// Helper constructor for source connection errors.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        DownlinkError::Connection { reason: reason.into(), source: None }
    }

    /// Helper constructor for source connection errors with source.
    pub fn connection_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        DownlinkError::Connection { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for framing errors.
    pub fn framing(reason: impl Into<String>) -> Self {
        DownlinkError::Framing { reason: reason.into() }
    }

    /// Helper constructor for parse errors.
    pub fn parse(context: impl Into<String>, details: impl Into<String>) -> Self {
        DownlinkError::Parse { context: context.into(), details: details.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config(reason: impl Into<String>) -> Self {
        DownlinkError::Config { reason: reason.into() }
    }

    /// Helper constructor for decode failures.
    pub fn decode(artifact: impl Into<String>, reason: impl Into<String>) -> Self {
        DownlinkError::Decode { artifact: artifact.into(), reason: reason.into() }
    }
}

impl From<std::io::Error> for DownlinkError {
    fn from(err: std::io::Error) -> Self {
        DownlinkError::File { path: PathBuf::from("<unknown>"), source: err }
    }
}

impl From<serde_yaml_ng::Error> for DownlinkError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        DownlinkError::Config { reason: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn messages_carry_their_context(
                reason in ".*",
                vcid in 0u8..64,
                missing in 1u32..1_000_000,
                declared in 0usize..100_000,
                received in 0usize..100_000,
            ) {
                let framing = DownlinkError::framing(reason.clone());
                prop_assert!(framing.to_string().contains(&reason));

                let gap = DownlinkError::SequenceGap { vcid, missing };
                let msg = gap.to_string();
                prop_assert!(msg.contains(&vcid.to_string()));
                prop_assert!(msg.contains(&missing.to_string()));

                let truncated = DownlinkError::FileTruncated { received, declared };
                let msg = truncated.to_string();
                prop_assert!(msg.contains(&received.to_string()));
                prop_assert!(msg.contains(&declared.to_string()));
            }

            #[test]
            fn integrity_mismatch_formats_both_checksums(
                expected in any::<u32>(),
                computed in any::<u32>(),
            ) {
                let err = DownlinkError::IntegrityMismatch {
                    context: "packet".to_string(),
                    expected,
                    computed,
                };
                let msg = err.to_string();
                let has_expected = msg.contains(&format!("{expected:#x}"));
                let has_computed = msg.contains(&format!("{computed:#x}"));
                prop_assert!(has_expected);
                prop_assert!(has_computed);
                prop_assert!(!err.is_retryable());
            }

            #[test]
            fn source_chain_preserves_io_reason(reason in ".*") {
                let io = std::io::Error::other(reason.clone());
                let err = DownlinkError::connection_failed_with_source("socket lost", Box::new(io));
                let source = std::error::Error::source(&err);
                prop_assert!(source.is_some());
                prop_assert_eq!(source.map(|s| s.to_string()), Some(reason));
            }
        }
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<DownlinkError>();

        let error = DownlinkError::connection_failed("test");
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn only_source_and_write_faults_are_retryable() {
        assert!(DownlinkError::connection_failed("x").is_retryable());
        assert!(DownlinkError::Timeout { duration: Duration::from_secs(1) }.is_retryable());
        assert!(!DownlinkError::framing("x").is_retryable());
        assert!(!DownlinkError::SequenceGap { vcid: 1, missing: 2 }.is_retryable());
        assert!(!DownlinkError::config("x").is_retryable());

        for suggestion in DownlinkError::decode("a", "b").recovery_suggestions() {
            assert!(suggestion.len() > 5);
        }
    }

    #[test]
    fn from_conversions_work() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing capture");
        match DownlinkError::from(io_err) {
            DownlinkError::File { source, .. } => assert_eq!(source.to_string(), "missing capture"),
            other => panic!("Expected File error variant, got {other:?}"),
        }

        let yaml_err = serde_yaml_ng::from_str::<u32>("not: [a number").unwrap_err();
        assert!(matches!(DownlinkError::from(yaml_err), DownlinkError::Config { .. }));
    }
}
