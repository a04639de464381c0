#![cfg(all(unix, feature = "cli"))]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Duration;

use gpspod::frame::Request;
use gpspod::link::sim::SimulatedPod;
use gpspod::link::{Communicator, Link, LinkConfig, Recorder};
use gpspod::pmem::{
    Lap, LapEvent, Sample, Timestamp, TrackFormat, TrackHeader, END_OF_CHAIN, FILESYSTEM_SIZE,
    LOG_AREA_OFFSET,
};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "gpspod-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn gpspod(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_gpspod"))
        .arg("--log-level")
        .arg("error")
        .args(args)
        .env_remove("GPSPOD_LOG")
        .env_remove("GPSPOD_DEVICE")
        .output()
        .expect("gpspod should run")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn header(offset: u32, next: u32, day: u8, samples: u32) -> TrackHeader {
    TrackHeader {
        offset,
        format: TrackFormat::GPS | TrackFormat::HEARTRATE,
        next,
        start: Timestamp {
            year: 2018,
            month: 3,
            day,
            hour: 7,
            minute: 15,
            second: 30,
        },
        sample_count: samples,
        log_interval: 1,
        lap_count: 0,
        distance: 1500,
    }
}

fn write_flash(dir: &Path) -> PathBuf {
    let mut flash = vec![0xFFu8; FILESYSTEM_SIZE];
    let second = LOG_AREA_OFFSET + 0x400;
    let first = TrackHeader {
        lap_count: 1,
        ..header(LOG_AREA_OFFSET, second, 2, 4)
    };
    for h in [first, header(second, END_OF_CHAIN, 9, 1)] {
        let mut bytes = h.encode().to_vec();
        for i in 0..h.sample_count {
            let sample = Sample {
                time_offset_ms: i * 1000,
                latitude: 510_000_000,
                longitude: 10_000_000 + i as i32,
                altitude: 100,
                heading: None,
                speed: None,
                heartrate: Some(130),
                ehpe: None,
                distance: None,
            };
            bytes.extend_from_slice(&sample.encode());
        }
        for i in 0..u32::from(h.lap_count) {
            let lap = Lap {
                sample_index: i + 1,
                event: LapEvent::Manual,
            };
            bytes.extend_from_slice(&lap.encode());
        }
        let start = h.offset as usize;
        flash[start..start + bytes.len()].copy_from_slice(&bytes);
    }
    let path = dir.join("flash.bin");
    std::fs::write(&path, flash).expect("flash should be writable");
    path
}

fn record_session(dir: &Path) -> PathBuf {
    record_session_to(dir.join("session.json"))
}

fn record_session_to(path: PathBuf) -> PathBuf {
    let mut flash = vec![0u8; 2048];
    flash[512..516].copy_from_slice(b"PMEM");
    let mut link = Link::with_config(
        Recorder::new(SimulatedPod::new(flash), &path),
        LinkConfig {
            timeout: Duration::from_millis(50),
            verbose: false,
        },
    );
    link.exchange(&Request::DeviceInfo).expect("device info should succeed");
    link.exchange(&Request::ReadData { offset: 0 }).expect("block 0 should succeed");
    link.exchange(&Request::ReadData { offset: 512 }).expect("block 1 should succeed");
    link.transport_mut().finish().expect("session should be saved");
    path
}

#[test]
fn tracks_from_dump_as_json() {
    let dir = unique_temp_dir("tracks");
    let flash = write_flash(&dir);

    let output = gpspod(&["--format", "json", "--fs", flash.to_str().unwrap(), "tracks"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json: serde_json::Value =
        serde_json::from_str(stdout(&output).trim()).expect("tracks output should be json");
    let tracks = json.as_array().expect("tracks should be an array");
    assert_eq!(tracks.len(), 2);
    assert_eq!(tracks[0]["index"], 0);
    assert_eq!(tracks[0]["sample_count"], 4);
    assert_eq!(tracks[0]["start"]["day"], 2);
    assert_eq!(tracks[1]["start"]["day"], 9);
    assert_eq!(tracks[0]["format"], serde_json::json!(["gps", "heartrate"]));
}

#[test]
fn retrieve_writes_gpx() {
    let dir = unique_temp_dir("retrieve");
    let flash = write_flash(&dir);
    let out = dir.join("first.gpx");

    let output = gpspod(&[
        "--fs",
        flash.to_str().unwrap(),
        "retrieve",
        "0",
        out.to_str().unwrap(),
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let gpx = std::fs::read_to_string(&out).expect("gpx should be written");
    assert_eq!(gpx.matches("<trkpt ").count(), 4);
    assert!(gpx.contains("<time>2018-03-02T07:15:33Z</time>"));
    assert!(gpx.contains("<gpxdata:hr>130</gpxdata:hr>"));
    assert_eq!(gpx.matches("<trkseg>").count(), 2);
    assert!(gpx.contains("<gpxdata:event>lap_manual</gpxdata:event>"));
}

#[test]
fn retrieve_unknown_track_is_usage_error() {
    let dir = unique_temp_dir("retrieve-missing");
    let flash = write_flash(&dir);
    let output = gpspod(&["--fs", flash.to_str().unwrap(), "retrieve", "7"]);
    assert_eq!(output.status.code(), Some(64));
    assert!(String::from_utf8_lossy(&output.stderr).contains("no track 7"));
}

#[test]
fn dump_alone_cannot_answer_device_commands() {
    let dir = unique_temp_dir("fs-info");
    let flash = write_flash(&dir);
    let output = gpspod(&["--fs", flash.to_str().unwrap(), "info"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn wrong_sized_dump_is_data_invalid() {
    let dir = unique_temp_dir("fs-size");
    let flash = dir.join("short.bin");
    std::fs::write(&flash, [0u8; 100]).unwrap();
    let output = gpspod(&["--fs", flash.to_str().unwrap(), "tracks"]);
    assert_eq!(output.status.code(), Some(60));
}

#[test]
fn replayed_info() {
    let dir = unique_temp_dir("replay");
    let session = record_session(&dir);

    let output = gpspod(&["--format", "json", "--replay", session.to_str().unwrap(), "info"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let json: serde_json::Value = serde_json::from_str(stdout(&output).trim()).unwrap();
    assert_eq!(json["model"], "GpsPod");
    assert_eq!(json["fw_version"], "1.6.39.0");
}

#[test]
fn replay_divergence_is_data_invalid() {
    let dir = unique_temp_dir("diverge");
    let session = record_session(&dir);
    let output = gpspod(&["--replay", session.to_str().unwrap(), "status"]);
    assert_eq!(output.status.code(), Some(60));
}

#[test]
fn view_decodes_session() {
    let dir = unique_temp_dir("view");
    let session = record_session(&dir);

    let output = gpspod(&["debug", "view", session.to_str().unwrap()]);
    assert!(output.status.success());
    let text = stdout(&output);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 6, "{text}");
    assert!(lines[0].contains("-> [seq 0] device-info request"), "{text}");
    assert!(lines[1].contains("<- [seq 0] model: GpsPod"), "{text}");
    assert!(lines[4].contains("-> [seq 2] read-data request 0x000200"), "{text}");
}

#[test]
fn reconstruct_rebuilds_image() {
    let dir = unique_temp_dir("reconstruct");
    let session = record_session(&dir);

    let output = gpspod(&["debug", "reconstruct", session.to_str().unwrap()]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout(&output).contains("missing 0x000400 up to 0x3c0000"));

    let image = std::fs::read(dir.join("session.binfs")).expect("image should be written");
    assert_eq!(image.len(), FILESYSTEM_SIZE);
    assert_eq!(&image[512..516], b"PMEM");
}

/// Two block reads, as the start of a dump would issue them.
fn record_first_blocks(dir: &Path) -> PathBuf {
    let path = dir.join("blocks.json");
    let mut flash = vec![0u8; 2048];
    flash[512..516].copy_from_slice(b"PMEM");
    let mut link = Link::new(Recorder::new(SimulatedPod::new(flash), &path));
    link.exchange(&Request::ReadData { offset: 0 }).expect("block 0 should succeed");
    link.exchange(&Request::ReadData { offset: 512 }).expect("block 1 should succeed");
    link.transport_mut().finish().expect("session should be saved");
    path
}

#[test]
fn interrupted_dump_saves_partial_image() {
    let dir = unique_temp_dir("dump-partial");
    let session = record_first_blocks(&dir);
    let out = dir.join("flash.bin");

    let output = gpspod(&[
        "--replay",
        session.to_str().unwrap(),
        "debug",
        "dump",
        out.to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(60));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("last block read: 0x000200"), "{stderr}");

    assert!(!out.exists());
    let partial = std::fs::read(dir.join("flash.bin.partial")).expect("partial image should be written");
    assert_eq!(partial.len(), FILESYSTEM_SIZE);
    assert_eq!(&partial[512..516], b"PMEM");
}

#[test]
fn dump_upto_reads_only_the_prefix() {
    let dir = unique_temp_dir("dump-upto");
    let session = record_first_blocks(&dir);
    let out = dir.join("flash.bin");

    let output = gpspod(&[
        "--replay",
        session.to_str().unwrap(),
        "debug",
        "dump",
        "--upto",
        "0x400",
        out.to_str().unwrap(),
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let image = std::fs::read(&out).expect("image should be written");
    assert_eq!(image.len(), FILESYSTEM_SIZE);
    assert_eq!(&image[512..516], b"PMEM");
}

#[test]
fn compressed_session_replays() {
    let dir = unique_temp_dir("zst");
    let session = record_session_to(dir.join("session.json.zst"));
    assert!(std::fs::read_to_string(&session).is_err());

    let output = gpspod(&["--format", "json", "--replay", session.to_str().unwrap(), "info"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let json: serde_json::Value = serde_json::from_str(stdout(&output).trim()).unwrap();
    assert_eq!(json["model"], "GpsPod");
}

#[test]
fn version_prints_name() {
    let output = gpspod(&["version"]);
    assert!(output.status.success());
    assert!(stdout(&output).starts_with("gpspod "));
}
