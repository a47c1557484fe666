//! EMWIN bulletin file names.
//!
//! A bulletin inside an EMWIN container is named
//! `A_TTAAIICCCCDDHHMM_C_KWIN_YYYYMMDDhhmmss_NNNNNN-P-AWIPSID.EXT`:
//!
//! | bytes | field |
//! |---|---|
//! | 0 | origin flag (`A` WMO heading, `Z` local identifier) |
//! | 2..8 | WMO data type and area (`TTAAii`) |
//! | 8..12 | issuing centre (`CCCC`) |
//! | 26..40 | issue time |
//! | 41..47 | sequence number |
//! | 48 | priority, 1 (highest) to 4 |
//! | 50.. | AWIPS id: three-letter product, then region |

use chrono::{DateTime, NaiveDateTime, Utc};

const MIN_LENGTH: usize = 51;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmwinName {
    pub origin: char,
    pub wmo_heading: String,
    pub originator: String,
    pub issued: DateTime<Utc>,
    pub sequence: u32,
    pub priority: u8,
    pub awips_id: String,
}

impl EmwinName {
    pub fn parse(name: &str) -> Option<Self> {
        // bulletins may be stored under a directory inside the container
        let name = name.rsplit('/').next().unwrap_or(name);
        if !name.is_ascii() || name.len() < MIN_LENGTH {
            return None;
        }
        let b = name.as_bytes();
        if b[1] != b'_' || b[40] != b'_' || b[47] != b'-' || b[49] != b'-' {
            return None;
        }
        let origin = b[0] as char;
        if !matches!(origin, 'A' | 'Z') {
            return None;
        }

        let issued = NaiveDateTime::parse_from_str(&name[26..40], "%Y%m%d%H%M%S").ok()?.and_utc();
        let sequence = name[41..47].parse().ok()?;
        let priority = name[48..49].parse().ok().filter(|p| (1..=4).contains(p))?;
        let awips = &name[50..];
        let awips_id = awips.split_once('.').map(|(stem, _)| stem).unwrap_or(awips).to_string();
        if awips_id.is_empty() {
            return None;
        }

        Some(Self {
            origin,
            wmo_heading: name[2..8].to_string(),
            originator: name[8..12].to_string(),
            issued,
            sequence,
            priority,
            awips_id,
        })
    }

    /// Three-letter product category of the AWIPS id.
    pub fn product(&self) -> &str {
        self.awips_id.get(..3).unwrap_or(&self.awips_id)
    }

    /// Region part of the AWIPS id, if any.
    pub fn region(&self) -> Option<&str> {
        self.awips_id.get(3..).filter(|r| !r.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_a_bulletin_name() {
        let n = EmwinName::parse("A_FXUS61KBOX151200_C_KWIN_20240115120000_123456-2-AFDBOX.TXT").unwrap();
        assert_eq!(n.origin, 'A');
        assert_eq!(n.wmo_heading, "FXUS61");
        assert_eq!(n.originator, "KBOX");
        assert_eq!(n.issued, Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap());
        assert_eq!(n.sequence, 123456);
        assert_eq!(n.priority, 2);
        assert_eq!(n.product(), "AFD");
        assert_eq!(n.region(), Some("BOX"));
    }

    #[test]
    fn short_awips_ids_have_no_region() {
        let n = EmwinName::parse("Z_QATA99KWIN010000_C_KWIN_20231231235959_000001-4-RAD.GIF").unwrap();
        assert_eq!(n.product(), "RAD");
        assert_eq!(n.region(), None);
    }

    #[test]
    fn rejects_other_names() {
        assert!(EmwinName::parse("AFDBOXMA.TXT").is_none());
        assert!(EmwinName::parse("A_FXUS61KBOX151200_C_KWIN_20241315120000_123456-2-AFDBOX.TXT").is_none());
        assert!(EmwinName::parse("A_FXUS61KBOX151200_C_KWIN_20240115120000_123456-9-AFDBOX.TXT").is_none());
        assert!(EmwinName::parse("A_FXUS61KBOX151200_C_KWIN_20240115120000_123456-2-é").is_none());
    }
}
