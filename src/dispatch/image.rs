//! Segmented image stitching.
//!
//! Large images arrive as several files, each carrying an image segment
//! identification record. Raw pixel segments are copied into one canvas at
//! `start_line × max_column + start_column`. A few images may be in flight at
//! once; when a new image would exceed the limit the least recently updated
//! one is evicted and emitted incomplete.
//!
//! Canvas dimensions come straight from the segment header, so they are
//! checked against a pixel limit and the segment's own structure before any
//! allocation. A segment that fails the check is handed back to the caller.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, VecDeque};
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{IntegrityStatus, Quality};
use crate::wire::headers::{ImageStructure, SegmentIdentification};

/// Canvas limit used unless configured otherwise: 64 Mi pixels.
pub const DEFAULT_MAX_IMAGE_PIXELS: usize = 64 * 1024 * 1024;

/// Why a segment cannot join a canvas.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SegmentRejected {
    #[error("image {columns}x{rows} exceeds the {limit} pixel canvas limit")]
    TooLarge { columns: usize, rows: usize, limit: usize },

    #[error("segment is {segment} columns wide but the image only {image}")]
    WiderThanImage { segment: usize, image: usize },
}

/// Identification carried from the first segment to the stitched image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageMeta {
    pub time: Option<DateTime<Utc>>,
    pub product: String,
    pub vcid: u8,
    pub apid: u16,
    pub file_counter: u16,
}

/// One segment ready to be placed.
#[derive(Debug, Clone)]
pub struct Segment<'a> {
    pub id: SegmentIdentification,
    pub structure: Option<ImageStructure>,
    pub pixels: &'a [u8],
    pub status: IntegrityStatus,
    pub quality: Quality,
}

/// A finished or evicted image.
#[derive(Debug, Clone)]
pub struct StitchedImage {
    pub image_id: u16,
    pub pixels: Vec<u8>,
    pub columns: usize,
    pub rows: usize,
    pub segments_received: usize,
    pub segments_expected: usize,
    pub status: IntegrityStatus,
    pub quality: Quality,
    pub meta: ImageMeta,
}

#[derive(Debug)]
struct PendingImage {
    image_id: u16,
    expected: usize,
    columns: usize,
    rows: usize,
    canvas: Vec<u8>,
    seen: BTreeSet<u16>,
    corrupt: bool,
    truncated: bool,
    quality: Quality,
    meta: ImageMeta,
}

impl PendingImage {
    fn new(id: &SegmentIdentification, meta: ImageMeta) -> Self {
        let columns = id.max_column as usize;
        let rows = id.max_row as usize;
        Self {
            image_id: id.image_id,
            expected: id.max_segment as usize,
            columns,
            rows,
            canvas: vec![0; columns * rows],
            seen: BTreeSet::new(),
            corrupt: false,
            truncated: false,
            quality: Quality::default(),
            meta,
        }
    }

    fn place(&mut self, segment: &Segment<'_>) {
        let start_column = segment.id.start_column as usize;
        let start_line = segment.id.start_line as usize;
        let (seg_columns, seg_lines) = match segment.structure {
            Some(s) if s.columns > 0 => (s.columns as usize, s.lines as usize),
            _ => (self.columns, segment.pixels.len() / self.columns.max(1)),
        };
        if start_column >= self.columns || start_line >= self.rows {
            warn!(
                image_id = self.image_id,
                segment = segment.id.segment_seq,
                start_column,
                start_line,
                "Segment starts outside the image; pixels skipped"
            );
            self.corrupt = true;
        } else {
            let width = seg_columns.min(self.columns - start_column);
            for line in 0..seg_lines {
                let src = line * seg_columns;
                let dst = (start_line + line) * self.columns + start_column;
                let (Some(from), Some(to)) =
                    (segment.pixels.get(src..src + width), self.canvas.get_mut(dst..dst + width))
                else {
                    break;
                };
                to.copy_from_slice(from);
            }
        }

        if !self.seen.insert(segment.id.segment_seq) {
            debug!(image_id = self.image_id, segment = segment.id.segment_seq, "Segment received twice");
        }
        match segment.status {
            IntegrityStatus::Ok => {}
            IntegrityStatus::Corrupt => self.corrupt = true,
            IntegrityStatus::Truncated => self.truncated = true,
        }
        let q = &mut self.quality;
        q.gap_units += segment.quality.gap_units;
        q.missing_packets += segment.quality.missing_packets;
        q.flagged_units += segment.quality.flagged_units;
        q.crc_failures += segment.quality.crc_failures;
        q.units += segment.quality.units;
    }

    fn is_complete(&self) -> bool {
        self.seen.len() >= self.expected
    }

    fn finish(self) -> StitchedImage {
        let status = if self.truncated || !self.is_complete() {
            IntegrityStatus::Truncated
        } else if self.corrupt {
            IntegrityStatus::Corrupt
        } else {
            IntegrityStatus::Ok
        };
        StitchedImage {
            image_id: self.image_id,
            pixels: self.canvas,
            columns: self.columns,
            rows: self.rows,
            segments_received: self.seen.len(),
            segments_expected: self.expected,
            status,
            quality: self.quality,
            meta: self.meta,
        }
    }
}

/// What adding a segment produced.
#[derive(Debug, Default)]
pub struct AddOutcome {
    pub completed: Option<StitchedImage>,
    pub evicted: Option<StitchedImage>,
}

/// Images waiting for more segments, least recently updated first.
#[derive(Debug)]
pub struct ImageAssembler {
    capacity: usize,
    max_pixels: usize,
    pending: VecDeque<PendingImage>,
}

impl ImageAssembler {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), max_pixels: DEFAULT_MAX_IMAGE_PIXELS, pending: VecDeque::new() }
    }

    pub fn with_max_pixels(mut self, max_pixels: usize) -> Self {
        self.max_pixels = max_pixels;
        self
    }

    fn check(&self, segment: &Segment<'_>) -> Result<(), SegmentRejected> {
        let columns = segment.id.max_column as usize;
        let rows = segment.id.max_row as usize;
        if columns.checked_mul(rows).is_none_or(|pixels| pixels > self.max_pixels) {
            return Err(SegmentRejected::TooLarge { columns, rows, limit: self.max_pixels });
        }
        if let Some(structure) = segment.structure {
            if structure.columns as usize > columns {
                return Err(SegmentRejected::WiderThanImage { segment: structure.columns as usize, image: columns });
            }
        }
        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Place a segment, opening its image if needed.
    ///
    /// A rejected segment leaves every pending image untouched.
    pub fn add(&mut self, segment: Segment<'_>, meta: ImageMeta) -> Result<AddOutcome, SegmentRejected> {
        self.check(&segment)?;
        let mut outcome = AddOutcome::default();
        let image_id = segment.id.image_id;

        let mut image = match self.pending.iter().position(|p| p.image_id == image_id) {
            Some(index) => match self.pending.remove(index) {
                Some(image) => image,
                None => PendingImage::new(&segment.id, meta),
            },
            None => {
                if self.pending.len() >= self.capacity {
                    if let Some(oldest) = self.pending.pop_front() {
                        warn!(
                            image_id = oldest.image_id,
                            received = oldest.seen.len(),
                            expected = oldest.expected,
                            "Evicting incomplete image"
                        );
                        outcome.evicted = Some(oldest.finish());
                    }
                }
                PendingImage::new(&segment.id, meta)
            }
        };

        image.place(&segment);
        if image.is_complete() {
            debug!(image_id, segments = image.expected, "Image complete");
            outcome.completed = Some(image.finish());
        } else {
            self.pending.push_back(image);
        }
        Ok(outcome)
    }

    /// Emit every pending image as incomplete.
    pub fn drain(&mut self) -> Vec<StitchedImage> {
        self.pending.drain(..).map(PendingImage::finish).collect()
    }
}
