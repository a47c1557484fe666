//! Checksums used on the downlink.

use crc::{CRC_16_IBM_3740, CRC_32_ISO_HDLC, Crc};

use crate::{DownlinkError, Result};

/// CRC-16/CCITT-FALSE (poly 0x1021, init 0xFFFF) trailing every packet data field.
pub const PACKET_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// CRC-32/ISO-HDLC used by DCS files.
pub const FILE_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub fn crc16(data: &[u8]) -> u16 {
    PACKET_CRC.checksum(data)
}

pub fn crc32(data: &[u8]) -> u32 {
    FILE_CRC.checksum(data)
}

/// Check a packet data field whose last two bytes are the big-endian CRC-16 of
/// everything before them.
pub fn verify_packet_crc(data_field: &[u8]) -> Result<()> {
    let Some(split) = data_field.len().checked_sub(2) else {
        return Err(DownlinkError::framing(format!(
            "packet data field of {} byte(s) cannot hold its CRC",
            data_field.len()
        )));
    };
    let (body, tail) = data_field.split_at(split);
    let expected = u16::from_be_bytes([tail[0], tail[1]]);
    let computed = crc16(body);
    if expected == computed {
        Ok(())
    } else {
        Err(DownlinkError::IntegrityMismatch {
            context: "packet data field".to_string(),
            expected: expected.into(),
            computed: computed.into(),
        })
    }
}

pub fn packet_crc_ok(data_field: &[u8]) -> bool {
    verify_packet_crc(data_field).is_ok()
}
