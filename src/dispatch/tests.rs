use chrono::{TimeZone, Utc};

use super::codec::{CodecError, DecodedImage, ZipUnpacker, zip_container};
use super::dcs::dcs_payload;
use super::*;
use crate::sim::LritFileBuilder;
use crate::types::CloseReason;
use crate::wire::headers::{FileHeaders, SegmentIdentification};

fn completed(bytes: Vec<u8>) -> CompletedFile {
    CompletedFile {
        vcid: 1,
        apid: 20,
        file_counter: 5,
        headers: FileHeaders::parse(&bytes).ok(),
        declared_length: bytes.len(),
        data: bytes.into(),
        packet_offsets: vec![0],
        status: IntegrityStatus::Ok,
        quality: Quality::default(),
        close_reason: CloseReason::Completed,
        received_at: Utc::now(),
    }
}

#[test]
fn compressed_image_keeps_its_format() {
    let t = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
    let file = LritFileBuilder::new(FileType::Image)
        .noaa(16, 3, NoaaCompression::Jpeg)
        .time_stamp(t)
        .data(b"\xff\xd8jpeg")
        .build();
    let mut counters = DispatchCounters::default();
    let artifacts = Dispatcher::new(3).dispatch(&completed(file), &mut counters);

    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].name, "image/20240506T070809Z_p16-3.jpg");
    assert_eq!(&artifacts[0].bytes[..], b"\xff\xd8jpeg");
    assert_eq!(artifacts[0].kind, ProductKind::Image);
    assert_eq!(counters.files, 1);
    assert_eq!(counters.artifacts, 1);
}

fn segment_id(seq: u16, start_line: u16) -> SegmentIdentification {
    SegmentIdentification {
        image_id: 42,
        segment_seq: seq,
        start_column: 0,
        start_line,
        max_segment: 2,
        max_column: 4,
        max_row: 4,
    }
}

fn segment_file(seq: u16, start_line: u16, fill: u8) -> Vec<u8> {
    LritFileBuilder::new(FileType::Image)
        .noaa(1, 1, NoaaCompression::None)
        .image_structure(8, 4, 2)
        .segment(segment_id(seq, start_line))
        .data(&[fill; 8])
        .build()
}

#[test]
fn raw_segments_are_stitched_into_one_image() {
    let mut dispatcher = Dispatcher::new(3);
    let mut counters = DispatchCounters::default();

    assert!(dispatcher.dispatch(&completed(segment_file(1, 2, 0xbb)), &mut counters).is_empty());
    assert_eq!(dispatcher.pending_images(), 1);
    let artifacts = dispatcher.dispatch(&completed(segment_file(0, 0, 0xaa)), &mut counters);

    assert_eq!(artifacts.len(), 1);
    let image = &artifacts[0];
    assert_eq!(image.name, "image/notime_p1-1.raw");
    assert_eq!(&image.bytes[..8], &[0xaa; 8]);
    assert_eq!(&image.bytes[8..], &[0xbb; 8]);
    assert_eq!(image.status, IntegrityStatus::Ok);
    assert_eq!(counters.images_stitched, 1);
    assert_eq!(counters.files, 2);
    assert_eq!(counters.artifacts, 1);
}

#[test]
fn ten_bit_segments_pass_through_unstitched() {
    let file = LritFileBuilder::new(FileType::Image)
        .noaa(1, 1, NoaaCompression::None)
        .image_structure(10, 4, 2)
        .segment(segment_id(0, 0))
        .data(&[0x3f; 10])
        .build();
    let mut dispatcher = Dispatcher::new(3);
    let mut counters = DispatchCounters::default();
    let artifacts = dispatcher.dispatch(&completed(file), &mut counters);

    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].name, "image/notime_p1-1.raw");
    assert_eq!(&artifacts[0].bytes[..], &[0x3f; 10]);
    assert_eq!(dispatcher.pending_images(), 0);
    assert_eq!(counters.images_stitched, 0);
}

#[test]
fn oversized_segment_is_kept_as_a_single_image() {
    let file = LritFileBuilder::new(FileType::Image)
        .noaa(1, 1, NoaaCompression::None)
        .image_structure(8, 4, 2)
        .segment(SegmentIdentification { max_column: u16::MAX, max_row: u16::MAX, ..segment_id(0, 0) })
        .data(&[7; 8])
        .build();
    let mut dispatcher = Dispatcher::new(3).with_max_image_pixels(1 << 20);
    let mut counters = DispatchCounters::default();
    let artifacts = dispatcher.dispatch(&completed(file), &mut counters);

    assert_eq!(artifacts.len(), 1);
    assert_eq!(&artifacts[0].bytes[..], &[7; 8]);
    assert_eq!(dispatcher.pending_images(), 0);
    assert_eq!(counters.segments_rejected, 1);
    assert_eq!(counters.artifacts, 1);
}

#[test]
fn unfinished_images_flush_as_truncated() {
    let mut dispatcher = Dispatcher::new(3);
    let mut counters = DispatchCounters::default();
    dispatcher.dispatch(&completed(segment_file(0, 0, 1)), &mut counters);

    let flushed = dispatcher.flush(&mut counters);
    assert_eq!(flushed.len(), 1);
    assert_eq!(flushed[0].status, IntegrityStatus::Truncated);
    assert_eq!(counters.images_evicted, 1);
    assert!(dispatcher.flush(&mut counters).is_empty());
}

#[test]
fn plain_text_is_one_artifact() {
    let file = LritFileBuilder::new(FileType::Text).annotation("ADMIN notice.txt").data(b"hello").build();
    let artifacts = Dispatcher::new(3).dispatch(&completed(file), &mut DispatchCounters::default());
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].name, "text/notime_ADMIN_notice.txt");
    assert_eq!(&artifacts[0].bytes[..], b"hello");
}

#[test]
fn emwin_container_yields_one_artifact_per_bulletin() {
    let container = zip_container(&[
        ("A_FXUS61KBOX151200_C_KWIN_20240115120000_123456-2-AFDBOX.TXT", b"discussion"),
        ("A_WWUS81KALY151201_C_KWIN_20240115120100_123457-1-SPSALY.TXT", b"statement"),
    ]);
    let file = LritFileBuilder::new(FileType::Text)
        .noaa(9, 0, NoaaCompression::Zip)
        .annotation("bulletins.zip")
        .data(&container)
        .build();
    let mut counters = DispatchCounters::default();
    let artifacts = Dispatcher::new(3).dispatch(&completed(file), &mut counters);

    let names: Vec<_> = artifacts.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["emwin/20240115T120000Z_AFD_BOX.txt", "emwin/20240115T120100Z_SPS_ALY.txt"]);
    assert_eq!(&artifacts[1].bytes[..], b"statement");
    assert!(artifacts.iter().all(|a| a.kind == ProductKind::Bulletin));
    assert_eq!(counters.bulletins, 2);
}

#[test]
fn bulletins_fall_back_to_the_container_name() {
    let container = zip_container(&[("AFDBOXMA.TXT", b"discussion")]);
    let file = LritFileBuilder::new(FileType::Text)
        .annotation("A_FXUS61KBOX151200_C_KWIN_20240115120000_123456-2-AFDBOX.ZIS")
        .data(&container)
        .build();
    let artifacts = Dispatcher::new(3).dispatch(&completed(file), &mut DispatchCounters::default());
    assert_eq!(artifacts[0].name, "emwin/20240115T120000Z_AFD_BOX.txt");
}

#[test]
fn broken_container_is_kept_raw() {
    let file = LritFileBuilder::new(FileType::Text)
        .noaa(9, 0, NoaaCompression::Zip)
        .data(b"PK\x03\x04 truncated")
        .build();
    let mut counters = DispatchCounters::default();
    let artifacts = Dispatcher::new(3).dispatch(&completed(file.clone()), &mut counters);
    assert_eq!(artifacts[0].kind, ProductKind::Raw);
    assert_eq!(artifacts[0].name, "lrit/notime_p9-0.lrit");
    assert_eq!(&artifacts[0].bytes[..], &file[..]);
    assert_eq!(counters.decode_failures, 1);
}

#[test]
fn dcs_files_are_checked() {
    let payload = dcs_payload("pF3240118025", b"messages");
    let file = LritFileBuilder::new(FileType::Dcs).data(&payload).build();
    let mut counters = DispatchCounters::default();
    let ok = Dispatcher::new(3).dispatch(&completed(file), &mut counters);
    assert_eq!(ok[0].name, "dcs/notime_pF3240118025.dcs");
    assert_eq!(ok[0].status, IntegrityStatus::Ok);

    let mut damaged = payload.clone();
    damaged[66] ^= 0x80;
    let file = LritFileBuilder::new(FileType::Dcs).data(&damaged).build();
    let bad = Dispatcher::new(3).dispatch(&completed(file), &mut counters);
    assert_eq!(bad[0].status, IntegrityStatus::Corrupt);
    assert_eq!(counters.dcs_crc_failures, 1);
}

#[test]
fn unknown_types_are_persisted_raw() {
    let file = LritFileBuilder::new(FileType::Unknown(77)).data(b"future").build();
    let artifacts = Dispatcher::new(3).dispatch(&completed(file.clone()), &mut DispatchCounters::default());
    assert_eq!(artifacts[0].name, "lrit/notime_vc1-apid20-f5.lrit");
    assert_eq!(&artifacts[0].bytes[..], &file[..]);
}

struct FailingCodec;

impl ImageCodec for FailingCodec {
    fn decode(&self, _file: &CompletedFile) -> Result<DecodedImage, CodecError> {
        Err(CodecError::Unsupported(NoaaCompression::Rice))
    }
}

#[test]
fn decode_failure_falls_back_to_raw() {
    let file = LritFileBuilder::new(FileType::Image).annotation("IMG.lrit").data(&[1, 2, 3]).build();
    let mut dispatcher = Dispatcher::with_collaborators(3, Box::new(FailingCodec), Box::new(ZipUnpacker));
    let mut counters = DispatchCounters::default();
    let (artifacts, errors) = crate::logging::capture_errors(|| dispatcher.dispatch(&completed(file), &mut counters));
    assert_eq!(artifacts[0].name, "lrit/notime_IMG.lrit");
    assert_eq!(counters.decode_failures, 1);
    assert_eq!(errors, vec!["Decode failure for image lrit/notime_IMG.lrit: unsupported compression Rice"]);
}
