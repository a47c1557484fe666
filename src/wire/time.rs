//! CCSDS day-segmented time (CDS) conversion.
//!
//! Time stamp records carry a one-byte P-field followed by a 16-bit day count
//! since 1958-01-01 and a 32-bit millisecond-of-day.

use chrono::{DateTime, Utc};

/// 1958-01-01T00:00:00Z as a Unix timestamp.
pub const CDS_EPOCH_UNIX: i64 = -378_691_200;

const SECONDS_PER_DAY: i64 = 86_400;
const MS_PER_DAY: u32 = 86_400_000;

/// Convert a CDS day/millisecond pair to UTC.
///
/// Returns `None` when the millisecond field is not a valid time of day.
pub fn cds_to_utc(days: u16, ms_of_day: u32) -> Option<DateTime<Utc>> {
    if ms_of_day >= MS_PER_DAY {
        return None;
    }
    let secs = CDS_EPOCH_UNIX + days as i64 * SECONDS_PER_DAY + (ms_of_day / 1000) as i64;
    DateTime::from_timestamp(secs, (ms_of_day % 1000) * 1_000_000)
}

/// Convert UTC to a CDS day/millisecond pair, if it falls within the 16-bit day range.
pub fn utc_to_cds(time: DateTime<Utc>) -> Option<(u16, u32)> {
    let since_epoch = time.timestamp_millis() - CDS_EPOCH_UNIX * 1000;
    if since_epoch < 0 {
        return None;
    }
    let ms_per_day = MS_PER_DAY as i64;
    let days = u16::try_from(since_epoch / ms_per_day).ok()?;
    Some((days, (since_epoch % ms_per_day) as u32))
}
