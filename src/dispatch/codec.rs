//! Codec collaborators.
//!
//! The core never decodes pixels. It hands image files to an [`ImageCodec`]
//! and EMWIN containers to a [`BulletinUnpacker`]; both are pure functions of
//! their input and fail per artifact.

use std::io::{Cursor, Read};
use thiserror::Error;

use crate::types::CompletedFile;
use crate::wire::headers::NoaaCompression;

/// Collaborator failures. Never fatal to the pipeline.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unsupported compression {0:?}")]
    Unsupported(NoaaCompression),

    #[error("malformed data: {0}")]
    Malformed(String),

    #[error("archive error")]
    Archive(#[from] zip::result::ZipError),

    #[error("read error")]
    Io(#[from] std::io::Error),
}

/// Output of an image codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub bytes: Vec<u8>,
    pub extension: String,
    /// One byte per pixel, row-major, safe to stitch with other segments.
    /// Deeper pixels are never stitched.
    pub raw_pixels: bool,
}

pub trait ImageCodec: Send {
    fn decode(&self, file: &CompletedFile) -> Result<DecodedImage, CodecError>;
}

/// Keeps the data field as transmitted and picks an extension from the
/// NOAA compression code. Uncompressed data counts as raw pixels only at
/// 8 bits per pixel.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCodec;

impl ImageCodec for PassthroughCodec {
    fn decode(&self, file: &CompletedFile) -> Result<DecodedImage, CodecError> {
        let headers = file.headers.as_ref();
        let compression = headers.map(|h| h.compression()).unwrap_or(NoaaCompression::None);
        let byte_pixels = headers.and_then(|h| h.image_structure).is_some_and(|s| s.bits_per_pixel == 8);
        let (extension, raw_pixels) = match compression {
            NoaaCompression::Jpeg => ("jpg", false),
            NoaaCompression::Gif => ("gif", false),
            NoaaCompression::None => ("raw", byte_pixels),
            _ => ("raw", false),
        };
        Ok(DecodedImage { bytes: file.body().to_vec(), extension: extension.to_string(), raw_pixels })
    }
}

/// One bulletin taken out of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bulletin {
    pub name: String,
    pub bytes: Vec<u8>,
}

pub trait BulletinUnpacker: Send {
    fn unpack(&self, container: &[u8]) -> Result<Vec<Bulletin>, CodecError>;
}

/// Unpacks ZIP containers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipUnpacker;

impl BulletinUnpacker for ZipUnpacker {
    fn unpack(&self, container: &[u8]) -> Result<Vec<Bulletin>, CodecError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(container))?;
        let mut bulletins = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut bytes)?;
            bulletins.push(Bulletin { name, bytes });
        }
        if bulletins.is_empty() {
            return Err(CodecError::Malformed("container holds no bulletins".into()));
        }
        Ok(bulletins)
    }
}

/// Whether `data` starts with a ZIP local file header.
pub fn looks_like_zip(data: &[u8]) -> bool {
    data.starts_with(b"PK\x03\x04")
}

#[cfg(test)]
pub(crate) fn zip_container(entries: &[(&str, &[u8])]) -> Vec<u8> {
    use std::io::Write;
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, bytes) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap().into_inner()
}
