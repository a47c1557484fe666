//! Product dispatch: completed files in, named artifacts out.
//!
//! Routing is a closed match over [`FileType`]. Anything the dispatcher does
//! not understand, or fails to decode, is still emitted with its raw bytes
//! under the `lrit` kind so nothing received is lost.
//!
//! ```rust
//! use downlink::diagnostics::DispatchCounters;
//! use downlink::dispatch::Dispatcher;
//! use downlink::types::{CloseReason, CompletedFile, IntegrityStatus, Quality};
//!
//! let file = CompletedFile {
//!     vcid: 2,
//!     apid: 7,
//!     file_counter: 11,
//!     data: vec![0u8; 4].into(),
//!     headers: None,
//!     declared_length: 4,
//!     packet_offsets: vec![0],
//!     status: IntegrityStatus::Truncated,
//!     quality: Quality::default(),
//!     close_reason: CloseReason::Stalled,
//!     received_at: chrono::Utc::now(),
//! };
//! let mut dispatcher = Dispatcher::new(3);
//! let artifacts = dispatcher.dispatch(&file, &mut DispatchCounters::default());
//! assert_eq!(artifacts[0].name, "lrit/notime_vc2-apid7-f11.lrit");
//! ```

pub mod codec;
pub mod dcs;
pub mod emwin;
pub mod image;
pub mod naming;

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::DownlinkError;
use crate::diagnostics::DispatchCounters;
use crate::types::{CompletedFile, FileType, IntegrityStatus, Quality};
use crate::wire::headers::NoaaCompression;
use codec::{BulletinUnpacker, ImageCodec, PassthroughCodec, ZipUnpacker, looks_like_zip};
use emwin::EmwinName;
use image::{ImageAssembler, ImageMeta, Segment, StitchedImage};
use naming::{artifact_name, fallback_product};

/// Top-level directory of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ProductKind {
    Image,
    Text,
    Bulletin,
    Dcs,
    Raw,
}

impl ProductKind {
    pub fn dir(self) -> &'static str {
        match self {
            ProductKind::Image => "image",
            ProductKind::Text => "text",
            ProductKind::Bulletin => "emwin",
            ProductKind::Dcs => "dcs",
            ProductKind::Raw => "lrit",
        }
    }
}

/// A named blob ready for storage.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub name: String,
    pub kind: ProductKind,
    pub bytes: Arc<[u8]>,
    pub status: IntegrityStatus,
    pub quality: Quality,
    pub vcid: u8,
    pub apid: u16,
    pub file_counter: u16,
}

impl Artifact {
    fn from_file(file: &CompletedFile, kind: ProductKind, name: String, bytes: Arc<[u8]>) -> Self {
        Self {
            name,
            kind,
            bytes,
            status: file.status,
            quality: file.quality,
            vcid: file.vcid,
            apid: file.apid,
            file_counter: file.file_counter,
        }
    }
}

/// Routes completed files to their handlers.
pub struct Dispatcher {
    codec: Box<dyn ImageCodec>,
    unpacker: Box<dyn BulletinUnpacker>,
    images: ImageAssembler,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").field("images", &self.images).finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Dispatcher with the passthrough image codec and ZIP bulletin unpacker.
    pub fn new(pending_images: usize) -> Self {
        Self::with_collaborators(pending_images, Box::new(PassthroughCodec), Box::new(ZipUnpacker))
    }

    pub fn with_collaborators(
        pending_images: usize,
        codec: Box<dyn ImageCodec>,
        unpacker: Box<dyn BulletinUnpacker>,
    ) -> Self {
        Self { codec, unpacker, images: ImageAssembler::new(pending_images) }
    }

    /// Cap the canvas a segmented image may allocate.
    pub fn with_max_image_pixels(mut self, max_pixels: usize) -> Self {
        self.images = self.images.with_max_pixels(max_pixels);
        self
    }

    pub fn pending_images(&self) -> usize {
        self.images.pending()
    }

    pub fn dispatch(&mut self, file: &CompletedFile, counters: &mut DispatchCounters) -> Vec<Artifact> {
        counters.files += 1;
        let artifacts = if file.headers.is_none() {
            debug!(vcid = file.vcid, apid = file.apid, "File without parsed headers kept raw");
            vec![raw_artifact(file)]
        } else {
            match file.file_type() {
                FileType::Image => self.image(file, counters),
                FileType::Text => self.text(file, counters),
                FileType::Dcs => dcs_artifact(file, counters),
                FileType::GtsMessage | FileType::EncryptionKey | FileType::Unknown(_) => {
                    vec![raw_artifact(file)]
                }
            }
        };
        counters.artifacts += artifacts.len() as u64;
        for a in &artifacts {
            info!(name = %a.name, status = ?a.status, bytes = a.bytes.len(), "Artifact ready");
        }
        artifacts
    }

    /// Emit images still waiting for segments.
    pub fn flush(&mut self, counters: &mut DispatchCounters) -> Vec<Artifact> {
        let artifacts: Vec<_> = self.images.drain().into_iter().map(stitched_artifact).collect();
        counters.images_evicted += artifacts.len() as u64;
        counters.artifacts += artifacts.len() as u64;
        artifacts
    }

    fn image(&mut self, file: &CompletedFile, counters: &mut DispatchCounters) -> Vec<Artifact> {
        let decoded = match self.codec.decode(file) {
            Ok(decoded) => decoded,
            Err(e) => return decode_failed(file, "image", e, counters),
        };
        let headers = file.headers.as_ref();
        let segment = headers.and_then(|h| h.segment).filter(|s| s.max_segment > 1);

        if let Some(id) = segment.filter(|id| decoded.raw_pixels && id.max_column > 0 && id.max_row > 0) {
            let segment = Segment {
                id,
                structure: headers.and_then(|h| h.image_structure),
                pixels: &decoded.bytes,
                status: file.status,
                quality: file.quality,
            };
            match self.images.add(segment, image_meta(file)) {
                Ok(outcome) => {
                    let mut out = Vec::new();
                    if let Some(evicted) = outcome.evicted {
                        counters.images_evicted += 1;
                        out.push(stitched_artifact(evicted));
                    }
                    if let Some(done) = outcome.completed {
                        counters.images_stitched += 1;
                        out.push(stitched_artifact(done));
                    }
                    return out;
                }
                Err(rejected) => {
                    warn!(
                        vcid = file.vcid,
                        apid = file.apid,
                        image_id = id.image_id,
                        error = %rejected,
                        "Segment cannot be stitched; keeping it as a single image"
                    );
                    counters.segments_rejected += 1;
                }
            }
        }

        let name = artifact_name(ProductKind::Image.dir(), file.timestamp(), &product(file), None, &decoded.extension);
        vec![Artifact::from_file(file, ProductKind::Image, name, decoded.bytes.into())]
    }

    fn text(&mut self, file: &CompletedFile, counters: &mut DispatchCounters) -> Vec<Artifact> {
        let body = file.body();
        let zipped = file.headers.as_ref().is_some_and(|h| h.compression() == NoaaCompression::Zip)
            || looks_like_zip(body);
        if !zipped {
            let name =
                artifact_name(ProductKind::Text.dir(), file.timestamp(), &product(file), None, "txt");
            return vec![Artifact::from_file(file, ProductKind::Text, name, body.into())];
        }

        let bulletins = match self.unpacker.unpack(body) {
            Ok(b) => b,
            Err(e) => return decode_failed(file, "bulletin container", e, counters),
        };
        let container = file.annotation().and_then(EmwinName::parse);
        bulletins
            .into_iter()
            .map(|bulletin| {
                counters.bulletins += 1;
                let parsed = EmwinName::parse(&bulletin.name).or_else(|| container.clone());
                let extension = bulletin
                    .name
                    .rsplit_once('.')
                    .map(|(_, ext)| ext.to_ascii_lowercase())
                    .unwrap_or_else(|| "txt".to_string());
                let name = match &parsed {
                    Some(emwin) => artifact_name(
                        ProductKind::Bulletin.dir(),
                        Some(emwin.issued),
                        emwin.product(),
                        emwin.region(),
                        &extension,
                    ),
                    None => {
                        let stem = bulletin.name.rsplit('/').next().unwrap_or(&bulletin.name);
                        let stem = stem.rsplit_once('.').map(|(s, _)| s).unwrap_or(stem);
                        artifact_name(ProductKind::Bulletin.dir(), file.timestamp(), stem, None, &extension)
                    }
                };
                Artifact::from_file(file, ProductKind::Bulletin, name, bulletin.bytes.into())
            })
            .collect()
    }
}

fn product(file: &CompletedFile) -> String {
    file.product_code().unwrap_or_else(|| fallback_product(file))
}

fn raw_artifact(file: &CompletedFile) -> Artifact {
    let name = artifact_name(ProductKind::Raw.dir(), file.timestamp(), &product(file), None, "lrit");
    Artifact::from_file(file, ProductKind::Raw, name, file.data.clone())
}

/// Fall back to the raw file after a handler could not read it.
fn decode_failed(
    file: &CompletedFile,
    handler: &str,
    reason: impl std::fmt::Display,
    counters: &mut DispatchCounters,
) -> Vec<Artifact> {
    let raw = raw_artifact(file);
    let fault = DownlinkError::decode(format!("{handler} {}", raw.name), reason.to_string());
    warn!(vcid = file.vcid, apid = file.apid, error = %fault, "Decode failed; keeping raw file");
    counters.decode_failures += 1;
    vec![raw]
}

fn dcs_artifact(file: &CompletedFile, counters: &mut DispatchCounters) -> Vec<Artifact> {
    let body = file.body();
    match dcs::verify(body) {
        Ok(check) => {
            let mut status = file.status;
            if !check.is_intact() {
                warn!(
                    name = %check.header.name,
                    header_crc_ok = check.header_crc_ok,
                    file_crc_ok = check.file_crc_ok,
                    "DCS CRC mismatch"
                );
                counters.dcs_crc_failures += 1;
                if status == IntegrityStatus::Ok {
                    status = IntegrityStatus::Corrupt;
                }
            }
            let label = if check.header.name.is_empty() { product(file) } else { check.header.name };
            let name = artifact_name(ProductKind::Dcs.dir(), file.timestamp(), &label, None, "dcs");
            let mut artifact = Artifact::from_file(file, ProductKind::Dcs, name, body.into());
            artifact.status = status;
            vec![artifact]
        }
        Err(e) => decode_failed(file, "DCS file", e, counters),
    }
}

fn image_meta(file: &CompletedFile) -> ImageMeta {
    ImageMeta {
        time: file.timestamp(),
        product: product(file),
        vcid: file.vcid,
        apid: file.apid,
        file_counter: file.file_counter,
    }
}

fn stitched_artifact(image: StitchedImage) -> Artifact {
    let name = artifact_name(ProductKind::Image.dir(), image.meta.time, &image.meta.product, None, "raw");
    Artifact {
        name,
        kind: ProductKind::Image,
        bytes: image.pixels.into(),
        status: image.status,
        quality: image.quality,
        vcid: image.meta.vcid,
        apid: image.meta.apid,
        file_counter: image.meta.file_counter,
    }
}

#[cfg(test)]
mod tests;
