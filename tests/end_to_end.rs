//! End-to-end tests: synthetic broadcast in, stored artifacts out.

use chrono::{TimeZone, Utc};
use downlink::providers::ReplaySource;
use downlink::sim::{LritFileBuilder, Multiplexer, Packetizer};
use downlink::storage::MemoryStorage;
use downlink::types::FileType;
use downlink::wire::headers::NoaaCompression;
use downlink::{Downlink, DownlinkConfig};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

const FRAME: usize = 892;

fn zip_container(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, bytes) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Alternate frames from two channels, keeping each channel's order.
fn interleave(a: Vec<Vec<u8>>, b: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut a, mut b) = (a.into_iter(), b.into_iter());
    loop {
        match (a.next(), b.next()) {
            (None, None) => break,
            (x, y) => out.extend(x.into_iter().chain(y)),
        }
    }
    out
}

fn init_logging() {
    downlink::logging::init("downlink=debug");
}

#[tokio::test]
async fn mixed_broadcast_is_reassembled_and_stored() -> anyhow::Result<()> {
    init_logging();
    let mut mux = Multiplexer::new(0, FRAME);

    let jpeg: Vec<u8> = [b"\xff\xd8".as_slice(), &[0x5a; 5000]].concat();
    let image = LritFileBuilder::new(FileType::Image)
        .noaa(16, 3, NoaaCompression::Jpeg)
        .time_stamp(Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap())
        .data(&jpeg)
        .build();
    let image_frames = mux.frames(2, &Packetizer::new(100).packetize(&image, 1, 884));

    let mut text_packets = Packetizer::new(200);
    let notice = LritFileBuilder::new(FileType::Text).annotation("status.txt").data(b"all nominal").build();
    let bulletins = LritFileBuilder::new(FileType::Text)
        .noaa(9, 0, NoaaCompression::Zip)
        .data(&zip_container(&[("A_FXUS61KBOX151200_C_KWIN_20240115120000_123456-2-AFDBOX.TXT", b"discussion")]))
        .build();
    let mut text_frames = mux.frames(20, &text_packets.packetize(&notice, 1, 884));
    text_frames.extend(mux.frames(20, &text_packets.packetize(&bulletins, 2, 884)));

    let mut stream = interleave(image_frames, text_frames).concat();
    stream.extend(mux.fill_frame());
    stream.extend_from_slice(&[0u8; 17]);

    let storage = MemoryStorage::new();
    let source = ReplaySource::from_bytes(stream, FRAME);
    let connection = Downlink::spawn(source, DownlinkConfig::default(), Arc::new(storage.clone()))?;
    connection.finished().await;
    let diag = connection.diagnostics();

    assert_eq!(
        storage.names(),
        vec!["emwin/20240115T120000Z_AFD_BOX.txt", "image/20240506T070809Z_p16-3.jpg", "text/notime_status.txt"]
    );
    assert_eq!(storage.get("image/20240506T070809Z_p16-3.jpg").unwrap(), jpeg);
    assert_eq!(storage.get("text/notime_status.txt").unwrap(), b"all nominal");
    assert_eq!(storage.get("emwin/20240115T120000Z_AFD_BOX.txt").unwrap(), b"discussion");

    assert_eq!(diag.channel(2).unwrap().files_ok, 1);
    assert_eq!(diag.channel(20).unwrap().files_ok, 2);
    assert_eq!(diag.total_gap_events(), 0);
    assert_eq!(diag.intake.fill_units, 1);
    assert_eq!(diag.intake.discarded_tail_bytes, 17);
    assert_eq!(diag.dispatch.bulletins, 1);
    assert_eq!(diag.persistence.written, 3);
    Ok(())
}

#[tokio::test]
async fn lost_unit_flags_one_file_and_the_next_recovers() -> anyhow::Result<()> {
    init_logging();
    let mut mux = Multiplexer::new(0, FRAME);
    let mut packetizer = Packetizer::new(7);
    let big = LritFileBuilder::new(FileType::Text).annotation("big.txt").data(&[b'b'; 4000]).build();
    let small = LritFileBuilder::new(FileType::Text).annotation("small.txt").data(b"intact").build();

    let mut frames = mux.frames(5, &packetizer.packetize(&big, 1, 884));
    frames.remove(2);
    frames.extend(mux.frames(5, &packetizer.packetize(&small, 2, 884)));

    let storage = MemoryStorage::new();
    let source = ReplaySource::from_bytes(frames.concat(), FRAME);
    let connection = Downlink::spawn(source, DownlinkConfig::default(), Arc::new(storage.clone()))?;
    connection.finished().await;
    let diag = connection.shutdown().await;

    let vc = diag.channel(5).unwrap();
    assert_eq!(vc.gap_events, 1);
    assert_eq!(vc.missing_units, 1);
    assert_eq!(vc.files_ok, 1);
    assert_eq!(vc.files_completed, 2);
    assert_eq!(storage.get("text/notime_small.txt").unwrap(), b"intact");
    assert_ne!(storage.get("text/notime_big.txt").unwrap(), vec![b'b'; 4000]);
    Ok(())
}

#[tokio::test]
async fn tcp_receiver_feeds_the_filesystem() -> anyhow::Result<()> {
    init_logging();
    let output = std::env::temp_dir().join(format!("downlink-e2e-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&output);

    let file = LritFileBuilder::new(FileType::Unknown(42)).annotation("opaque.bin").data(&[1, 2, 3]).build();
    let frames = Multiplexer::new(0, FRAME).frames(9, &Packetizer::new(3).packetize(&file, 4, 884));

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?.to_string();
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await?;
        socket.write_all(&frames.concat()).await?;
        anyhow::Ok(())
    });

    let mut config = DownlinkConfig::default();
    config.receiver.max_reconnect_attempts = 1;
    config.persistence.output_dir = output.clone();
    let connection = Downlink::connect(addr, config).await?;
    server.await??;

    tokio::time::timeout(Duration::from_secs(10), connection.finished()).await?;
    let diag = connection.diagnostics();
    assert_eq!(diag.source.errors, 2);
    assert_eq!(diag.persistence.written, 1);

    let stored = std::fs::read(output.join("lrit/notime_opaque.lrit"))?;
    assert_eq!(stored, file);
    std::fs::remove_dir_all(&output)?;
    Ok(())
}
