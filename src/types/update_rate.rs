//! Update rate control for diagnostics streams

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Update rate for diagnostics streams
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum UpdateRate {
    /// Every change as it is published
    Native,

    /// Throttled to at most this many updates per second
    Max(u32),
}

impl UpdateRate {
    /// Throttle interval, or `None` for native rate.
    ///
    /// `Max(0)` is treated as native.
    pub fn throttle_interval(self) -> Option<Duration> {
        match self {
            UpdateRate::Native | UpdateRate::Max(0) => None,
            UpdateRate::Max(hz) => Some(Duration::from_secs_f64(1.0 / hz as f64)),
        }
    }
}
