//! Stream combinators for diagnostics subscribers

mod throttle;

pub use throttle::{Throttle, ThrottleExt};
