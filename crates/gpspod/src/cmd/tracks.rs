use std::path::PathBuf;

use gpspod::gpx::to_gpx;
use gpspod::pmem::TrackHeader;
use serde::Serialize;
use tracing::warn;

use crate::cmd::device::{finish, open_mounted, CliSession};
use crate::cmd::{DeviceArgs, RetrieveArgs};
use crate::exit::{io_error, pmem_error, CliResult, SUCCESS};
use crate::output::{print_json, table, OutputFormat};

#[derive(Serialize)]
struct TrackOutput<'a> {
    index: usize,
    #[serde(flatten)]
    header: &'a TrackHeader,
}

fn load_tracks(session: &mut CliSession) -> CliResult<()> {
    let corrupt = session
        .load_tracks()
        .map_err(|err| pmem_error("load tracks", err))?;
    if !corrupt.is_empty() {
        warn!(count = corrupt.len(), "some tracks were skipped");
    }
    Ok(())
}

pub fn run(args: &DeviceArgs, format: OutputFormat) -> CliResult<i32> {
    let mut session = open_mounted(args)?;
    load_tracks(&mut session)?;
    let tracks = session
        .get_tracks()
        .map_err(|err| pmem_error("list tracks", err))?;

    match format {
        OutputFormat::Json => {
            let out: Vec<TrackOutput<'_>> = tracks
                .iter()
                .enumerate()
                .map(|(index, track)| TrackOutput {
                    index,
                    header: track.get_header(),
                })
                .collect();
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut t = table(vec![
                "INDEX", "START", "SAMPLES", "INTERVAL", "DISTANCE", "FORMAT", "OFFSET",
            ]);
            for (index, track) in tracks.iter().enumerate() {
                let h = track.get_header();
                t.add_row(vec![
                    index.to_string(),
                    h.start.to_string(),
                    h.sample_count.to_string(),
                    format!("{}s", h.log_interval),
                    format!("{}m", h.distance),
                    format_names(h),
                    format!("{:#08x}", h.offset),
                ]);
            }
            println!("{t}");
        }
        OutputFormat::Pretty => {
            for (index, track) in tracks.iter().enumerate() {
                let h = track.get_header();
                println!(
                    "{index: >2}: {} {} samples every {}s, {}m",
                    h.start, h.sample_count, h.log_interval, h.distance
                );
            }
        }
    }

    finish(session)?;
    Ok(SUCCESS)
}

fn format_names(header: &TrackHeader) -> String {
    header
        .format
        .iter_names()
        .map(|(name, _)| name.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join(",")
}

pub fn retrieve(args: RetrieveArgs, device: &DeviceArgs) -> CliResult<i32> {
    let mut session = open_mounted(device)?;
    load_tracks(&mut session)?;

    let header = session
        .get_header(args.index)
        .map_err(|err| pmem_error("retrieve", err))?
        .clone();
    let path = args
        .outfile
        .unwrap_or_else(|| PathBuf::from(header.start.format("track_%Y_%m_%d_%H_%M_%S.gpx")));
    eprintln!(
        "retrieving track {} ({} samples) to {}",
        args.index,
        header.sample_count,
        path.display()
    );

    session
        .load_entries(args.index)
        .map_err(|err| pmem_error("retrieve", err))?;
    let samples = session
        .get_entries(args.index)
        .map_err(|err| pmem_error("retrieve", err))?;
    let laps = session
        .get_laps(args.index)
        .map_err(|err| pmem_error("retrieve", err))?;
    let document = to_gpx(&header, samples, laps);
    std::fs::write(&path, document)
        .map_err(|err| io_error(&format!("write {}", path.display()), err))?;

    finish(session)?;
    Ok(SUCCESS)
}
