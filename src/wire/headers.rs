//! File header records.
//!
//! Every reassembled file starts with a 16-byte primary header followed by
//! secondary records. Each record begins with a type byte and a 16-bit record
//! length that includes those three bytes, so records this crate does not know
//! are skipped by length rather than rejected.

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use super::time::cds_to_utc;
use super::{parse_ascii, parse_i32_be, parse_u8, parse_u16_be, parse_u32_be, parse_u64_be};
use crate::types::FileType;
use crate::{DownlinkError, Result};

/// Size of the primary header record.
pub const PRIMARY_HEADER_SIZE: usize = 16;

/// Size of the common type + length prefix of every record.
pub const RECORD_PREFIX_SIZE: usize = 3;

pub const PRIMARY: u8 = 0;
pub const IMAGE_STRUCTURE: u8 = 1;
pub const IMAGE_NAVIGATION: u8 = 2;
pub const IMAGE_DATA_FUNCTION: u8 = 3;
pub const ANNOTATION: u8 = 4;
pub const TIME_STAMP: u8 = 5;
pub const ANCILLARY_TEXT: u8 = 6;
pub const KEY_HEADER: u8 = 7;
pub const SEGMENT_IDENTIFICATION: u8 = 128;
pub const NOAA_HEADER: u8 = 129;
pub const HEADER_STRUCTURE: u8 = 130;
pub const RICE_COMPRESSION: u8 = 131;

/// Primary header: file type and sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimaryHeader {
    pub file_type_code: u8,
    /// Length of all header records, this one included.
    pub total_header_length: u32,
    pub data_field_bits: u64,
}

impl PrimaryHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let record_type = parse_u8(data, 0)?;
        let record_length = parse_u16_be(data, 1)?;
        if record_type != PRIMARY || record_length as usize != PRIMARY_HEADER_SIZE {
            return Err(DownlinkError::parse(
                "Primary header",
                format!("expected type 0 length 16, found type {record_type} length {record_length}"),
            ));
        }
        let header = Self {
            file_type_code: parse_u8(data, 3)?,
            total_header_length: parse_u32_be(data, 4)?,
            data_field_bits: parse_u64_be(data, 8)?,
        };
        if (header.total_header_length as usize) < PRIMARY_HEADER_SIZE {
            return Err(DownlinkError::parse(
                "Primary header",
                format!("total header length {} is shorter than the primary header", header.total_header_length),
            ));
        }
        Ok(header)
    }

    pub fn file_type(&self) -> FileType {
        FileType::from_code(self.file_type_code)
    }

    /// Data field length in bytes, rounded up.
    pub fn data_length(&self) -> u64 {
        self.data_field_bits.div_ceil(8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageStructure {
    pub bits_per_pixel: u8,
    pub columns: u16,
    pub lines: u16,
    pub compression: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageNavigation {
    pub projection: String,
    pub column_scaling: i32,
    pub line_scaling: i32,
    pub column_offset: i32,
    pub line_offset: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeStamp {
    pub p_field: u8,
    pub days: u16,
    pub ms_of_day: u32,
}

impl TimeStamp {
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        cds_to_utc(self.days, self.ms_of_day)
    }
}

/// Position of one segment within a larger image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentIdentification {
    pub image_id: u16,
    pub segment_seq: u16,
    pub start_column: u16,
    pub start_line: u16,
    pub max_segment: u16,
    pub max_column: u16,
    pub max_row: u16,
}

/// Compression applied to the data field, from the NOAA product header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoaaCompression {
    None,
    Rice,
    Jpeg,
    Gif,
    Zip,
    Other(u8),
}

impl NoaaCompression {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => NoaaCompression::None,
            1 => NoaaCompression::Rice,
            2 => NoaaCompression::Jpeg,
            5 => NoaaCompression::Gif,
            10 => NoaaCompression::Zip,
            other => NoaaCompression::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            NoaaCompression::None => 0,
            NoaaCompression::Rice => 1,
            NoaaCompression::Jpeg => 2,
            NoaaCompression::Gif => 5,
            NoaaCompression::Zip => 10,
            NoaaCompression::Other(code) => code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoaaHeader {
    pub agency: String,
    pub product_id: u16,
    pub product_subid: u16,
    pub parameter: u16,
    pub compression: NoaaCompression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiceCompression {
    pub flags: u16,
    pub pixels_per_block: u8,
    pub scan_lines_per_packet: u8,
}

/// All header records of one file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FileHeaders {
    pub primary: Option<PrimaryHeader>,
    pub image_structure: Option<ImageStructure>,
    pub image_navigation: Option<ImageNavigation>,
    pub image_data_function: Option<Vec<u8>>,
    pub annotation: Option<String>,
    pub time_stamp: Option<TimeStamp>,
    pub ancillary_text: Option<String>,
    pub key_header: Option<Vec<u8>>,
    pub segment: Option<SegmentIdentification>,
    pub noaa: Option<NoaaHeader>,
    pub header_structure: Option<String>,
    pub rice: Option<RiceCompression>,
    /// Types of records skipped because they are not understood.
    pub skipped: Vec<u8>,
}

impl FileHeaders {
    /// Parse the complete header area at the start of `data`.
    ///
    /// `data` must hold at least `total_header_length` bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let primary = PrimaryHeader::parse(data)?;
        let total = primary.total_header_length as usize;
        if data.len() < total {
            return Err(DownlinkError::parse(
                "File headers",
                format!("need {} header bytes, have {}", total, data.len()),
            ));
        }

        let mut headers = FileHeaders { primary: Some(primary), ..Default::default() };
        let mut offset = PRIMARY_HEADER_SIZE;
        while offset < total {
            let record_type = parse_u8(data, offset)?;
            let record_length = parse_u16_be(data, offset + 1)? as usize;
            if record_length < RECORD_PREFIX_SIZE || offset + record_length > total {
                return Err(DownlinkError::parse(
                    "File headers",
                    format!(
                        "record type {} at offset {} has invalid length {}",
                        record_type, offset, record_length
                    ),
                ));
            }
            let record = &data[offset..offset + record_length];
            trace!(record_type, record_length, offset, "Header record");
            headers.apply(record_type, record)?;
            offset += record_length;
        }

        Ok(headers)
    }

    fn apply(&mut self, record_type: u8, record: &[u8]) -> Result<()> {
        let body = &record[RECORD_PREFIX_SIZE..];
        match record_type {
            IMAGE_STRUCTURE => {
                self.image_structure = Some(ImageStructure {
                    bits_per_pixel: parse_u8(record, 3)?,
                    columns: parse_u16_be(record, 4)?,
                    lines: parse_u16_be(record, 6)?,
                    compression: parse_u8(record, 8)?,
                });
            }
            IMAGE_NAVIGATION => {
                self.image_navigation = Some(ImageNavigation {
                    projection: parse_ascii(record, 3, 32)?,
                    column_scaling: parse_i32_be(record, 35)?,
                    line_scaling: parse_i32_be(record, 39)?,
                    column_offset: parse_i32_be(record, 43)?,
                    line_offset: parse_i32_be(record, 47)?,
                });
            }
            IMAGE_DATA_FUNCTION => self.image_data_function = Some(body.to_vec()),
            ANNOTATION => self.annotation = Some(text(body)),
            TIME_STAMP => {
                self.time_stamp = Some(TimeStamp {
                    p_field: parse_u8(record, 3)?,
                    days: parse_u16_be(record, 4)?,
                    ms_of_day: parse_u32_be(record, 6)?,
                });
            }
            ANCILLARY_TEXT => self.ancillary_text = Some(text(body)),
            KEY_HEADER => self.key_header = Some(body.to_vec()),
            SEGMENT_IDENTIFICATION => {
                self.segment = Some(SegmentIdentification {
                    image_id: parse_u16_be(record, 3)?,
                    segment_seq: parse_u16_be(record, 5)?,
                    start_column: parse_u16_be(record, 7)?,
                    start_line: parse_u16_be(record, 9)?,
                    max_segment: parse_u16_be(record, 11)?,
                    max_column: parse_u16_be(record, 13)?,
                    max_row: parse_u16_be(record, 15)?,
                });
            }
            NOAA_HEADER => {
                self.noaa = Some(NoaaHeader {
                    agency: parse_ascii(record, 3, 4)?,
                    product_id: parse_u16_be(record, 7)?,
                    product_subid: parse_u16_be(record, 9)?,
                    parameter: parse_u16_be(record, 11)?,
                    compression: NoaaCompression::from_code(parse_u8(record, 13)?),
                });
            }
            HEADER_STRUCTURE => self.header_structure = Some(text(body)),
            RICE_COMPRESSION => {
                self.rice = Some(RiceCompression {
                    flags: parse_u16_be(record, 3)?,
                    pixels_per_block: parse_u8(record, 5)?,
                    scan_lines_per_packet: parse_u8(record, 6)?,
                });
            }
            other => {
                debug!(record_type = other, "Skipping unknown header record");
                self.skipped.push(other);
            }
        }
        Ok(())
    }

    pub fn file_type(&self) -> FileType {
        self.primary.map(|p| p.file_type()).unwrap_or(FileType::Unknown(u8::MAX))
    }

    pub fn header_length(&self) -> usize {
        self.primary.map(|p| p.total_header_length as usize).unwrap_or(0)
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.time_stamp.as_ref().and_then(TimeStamp::to_utc)
    }

    pub fn compression(&self) -> NoaaCompression {
        self.noaa.as_ref().map(|n| n.compression).unwrap_or(NoaaCompression::None)
    }

    /// Whether the data field is Rice compressed packet by packet.
    pub fn is_rice_compressed(&self) -> bool {
        self.compression() == NoaaCompression::Rice
            || (self.rice.is_some() && self.image_structure.is_some_and(|s| s.compression != 0))
    }

    /// Value of a `key=value` entry in the ancillary text record.
    pub fn ancillary(&self, key: &str) -> Option<&str> {
        self.ancillary_text
            .as_deref()?
            .split(';')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| k.trim() == key)
            .map(|(_, v)| v.trim())
    }
}

fn text(body: &[u8]) -> String {
    String::from_utf8_lossy(body).trim_end_matches('\0').to_string()
}
