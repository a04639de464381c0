use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod debug;
pub mod device;
pub mod headers;
pub mod info;
pub mod settings;
pub mod status;
pub mod tracks;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print device info.
    Info,
    /// Print device status.
    Status,
    /// Print device settings.
    Settings,
    /// List the tracks on the device.
    Tracks,
    /// Retrieve a track as GPX.
    Retrieve(RetrieveArgs),
    /// Walk the device's log-header list.
    Headers,
    /// Debug tools.
    #[command(subcommand)]
    Debug(DebugCommand),
    /// Show version information.
    Version(VersionArgs),
}

#[derive(Subcommand, Debug)]
pub enum DebugCommand {
    /// Read the whole flash into a file.
    Dump(DumpArgs),
    /// Show the messages in a recorded session.
    View(ViewArgs),
    /// Rebuild a flash image from a recorded session.
    Reconstruct(ReconstructArgs),
}

pub fn run(command: Command, device: &DeviceArgs, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Info => info::run(device, format),
        Command::Status => status::run(device, format),
        Command::Settings => settings::run(device, format),
        Command::Tracks => tracks::run(device, format),
        Command::Retrieve(args) => tracks::retrieve(args, device),
        Command::Headers => headers::run(device, format),
        Command::Debug(DebugCommand::Dump(args)) => debug::dump(args, device),
        Command::Debug(DebugCommand::View(args)) => debug::view(args),
        Command::Debug(DebugCommand::Reconstruct(args)) => debug::reconstruct(args),
        Command::Version(args) => version::run(args),
    }
}

/// How to reach the pod; shared by every device command.
#[derive(Args, Debug)]
pub struct DeviceArgs {
    /// hidraw node of the pod. Default: discover by USB id.
    #[arg(long, env = "GPSPOD_DEVICE", global = true)]
    pub device: Option<PathBuf>,
    /// Reply timeout (e.g. 1s, 500ms).
    #[arg(long, default_value = "1s", global = true)]
    pub timeout: String,
    /// Failed block reads tolerated before giving up.
    #[arg(long, default_value_t = 10, global = true)]
    pub max_errors: u32,
    /// Log every frame on the wire.
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
    /// Record the USB traffic of this run.
    #[arg(long, global = true)]
    pub record: bool,
    /// Session log to record to; `.zst` compresses. Default: %Y_%m_%d_%H_%M_%S.json.zst
    #[arg(long, value_name = "FILE", global = true)]
    pub record_file: Option<PathBuf>,
    /// Replay a recorded session (JSON or PDML) instead of using the device.
    #[arg(long, value_name = "FILE", conflicts_with = "record", global = true)]
    pub replay: Option<PathBuf>,
    /// Read tracks from a flash dump instead of the device.
    #[arg(long, value_name = "FILE", global = true)]
    pub fs: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RetrieveArgs {
    /// Index of the track, as listed by `tracks`.
    pub index: usize,
    /// Output file. Default: track_%Y_%m_%d_%H_%M_%S.gpx
    pub outfile: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct DumpArgs {
    /// File to write the flash image to.
    pub file: PathBuf,
    /// Read only the flash below this offset (decimal or 0x hex).
    #[arg(long, value_parser = parse_offset)]
    pub upto: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ViewArgs {
    /// Recorded session: JSON or a Wireshark PDML export, optionally zstd-compressed.
    pub file: PathBuf,
}

#[derive(Args, Debug)]
pub struct ReconstructArgs {
    /// Recorded session: JSON or a Wireshark PDML export, optionally zstd-compressed.
    pub file: PathBuf,
    /// Output image. Default: the session file name with a .binfs extension.
    pub outfile: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_offset(input: &str) -> Result<usize, String> {
    let input = input.trim();
    let parsed = match input.strip_prefix("0x").or_else(|| input.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => input.parse(),
    };
    parsed.map_err(|_| format!("invalid offset: {input}"))
}

pub fn parse_timeout(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "timeout must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid timeout value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "timeout must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
