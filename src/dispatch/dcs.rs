//! DCS (Data Collection System) file validation.
//!
//! The data field starts with a 64-byte header:
//!
//! | offset | len | field |
//! |---|---|---|
//! | 0 | 32 | file name, space padded |
//! | 32 | 8 | total length, ASCII decimal |
//! | 40 | 4 | payload source |
//! | 44 | 4 | payload type, `DCSH` |
//! | 48 | 12 | reserved |
//! | 60 | 4 | CRC-32 of bytes 0..60, little-endian |
//!
//! The last four bytes of the data field are a CRC-32 of everything before
//! them, also little-endian.

use tracing::warn;

use crate::wire::crc::crc32;
use crate::wire::{parse_ascii, parse_u32_le};
use crate::{DownlinkError, Result};

pub const DCS_HEADER_SIZE: usize = 64;
const DCS_PAYLOAD_TYPE: &str = "DCSH";
const FILE_CRC_SIZE: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DcsHeader {
    pub name: String,
    pub payload_length: u64,
    pub source: String,
    pub payload_type: String,
    pub header_crc: u32,
}

impl DcsHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < DCS_HEADER_SIZE {
            return Err(DownlinkError::parse(
                "DCS header",
                format!("need {} bytes, have {}", DCS_HEADER_SIZE, data.len()),
            ));
        }
        let length = parse_ascii(data, 32, 8)?;
        let payload_length = length
            .parse()
            .map_err(|_| DownlinkError::parse("DCS header", format!("bad length field {:?}", length)))?;
        Ok(Self {
            name: parse_ascii(data, 0, 32)?,
            payload_length,
            source: parse_ascii(data, 40, 4)?,
            payload_type: parse_ascii(data, 44, 4)?,
            header_crc: parse_u32_le(data, 60)?,
        })
    }
}

/// Result of checking one DCS data field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DcsCheck {
    pub header: DcsHeader,
    pub header_crc_ok: bool,
    pub file_crc_ok: bool,
}

impl DcsCheck {
    pub fn is_intact(&self) -> bool {
        self.header_crc_ok && self.file_crc_ok
    }
}

/// Parse the header and check both CRCs.
pub fn verify(data: &[u8]) -> Result<DcsCheck> {
    let header = DcsHeader::parse(data)?;
    if header.payload_type != DCS_PAYLOAD_TYPE {
        return Err(DownlinkError::parse(
            "DCS header",
            format!("payload type {:?}, expected {}", header.payload_type, DCS_PAYLOAD_TYPE),
        ));
    }
    if data.len() < DCS_HEADER_SIZE + FILE_CRC_SIZE {
        return Err(DownlinkError::parse("DCS file", "no room for the file CRC"));
    }
    if header.payload_length != data.len() as u64 {
        warn!(declared = header.payload_length, actual = data.len(), "DCS length field disagrees");
    }

    let header_crc_ok = crc32(&data[..60]) == header.header_crc;
    let split = data.len() - FILE_CRC_SIZE;
    let file_crc_ok = crc32(&data[..split]) == parse_u32_le(data, split)?;
    Ok(DcsCheck { header, header_crc_ok, file_crc_ok })
}

#[cfg(test)]
pub(crate) fn dcs_payload(name: &str, blocks: &[u8]) -> Vec<u8> {
    let total = DCS_HEADER_SIZE + blocks.len() + FILE_CRC_SIZE;
    let mut out = format!("{:<32}{:<8}{:<4}{:<4}", name, total, "NOAA", DCS_PAYLOAD_TYPE).into_bytes();
    out.extend_from_slice(&[0u8; 12]);
    let header_crc = crc32(&out);
    out.extend_from_slice(&header_crc.to_le_bytes());
    out.extend_from_slice(blocks);
    let file_crc = crc32(&out);
    out.extend_from_slice(&file_crc.to_le_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_file_passes_both_crcs() {
        let data = dcs_payload("pF3240118025", b"platform messages");
        let check = verify(&data).unwrap();
        assert!(check.is_intact());
        assert_eq!(check.header.name, "pF3240118025");
        assert_eq!(check.header.payload_length, data.len() as u64);
        assert_eq!(check.header.source, "NOAA");
    }

    #[test]
    fn damaged_bytes_fail_the_file_crc() {
        let mut data = dcs_payload("pF1", b"platform messages");
        data[70] ^= 0x01;
        let check = verify(&data).unwrap();
        assert!(check.header_crc_ok);
        assert!(!check.file_crc_ok);

        data[0] ^= 0x01;
        assert!(!verify(&data).unwrap().header_crc_ok);
    }

    #[test]
    fn wrong_type_or_short_data_is_rejected() {
        let mut data = dcs_payload("pF1", b"x");
        data[44..48].copy_from_slice(b"XXXX");
        assert!(verify(&data).is_err());
        assert!(verify(&data[..40]).is_err());
    }
}
