use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use gpspod::link::{
    Link, LinkConfig, Recorder, Replayer, RetryPolicy, SessionLog, COMPRESSED_EXTENSION,
};
use gpspod::pmem::{MemoryImage, Timestamp};
use gpspod::transport::PacketTransport;
#[cfg(unix)]
use gpspod::transport::HidrawDevice;
use gpspod::{Session, SessionConfig};
use tracing::info;

use crate::cmd::{parse_timeout, DeviceArgs};
use crate::exit::{link_error, pmem_error, transport_error, CliError, CliResult};

/// The packet transport selected on the command line.
pub enum Wire {
    #[cfg(unix)]
    Live(HidrawDevice),
    #[cfg(unix)]
    Recording(Recorder<HidrawDevice>),
    /// A recorded session, or no traffic at all when reading a dump.
    Replay(Replayer),
}

impl Wire {
    /// Save the session log when recording.
    pub fn finish(&mut self) -> gpspod::link::Result<()> {
        match self {
            #[cfg(unix)]
            Wire::Recording(recorder) => recorder.finish(),
            _ => Ok(()),
        }
    }
}

impl PacketTransport for Wire {
    fn send_packet(&mut self, packet: &[u8]) -> gpspod::transport::Result<()> {
        match self {
            #[cfg(unix)]
            Wire::Live(dev) => dev.send_packet(packet),
            #[cfg(unix)]
            Wire::Recording(rec) => rec.send_packet(packet),
            Wire::Replay(replay) => replay.send_packet(packet),
        }
    }

    fn recv_packet(&mut self, timeout: Duration) -> gpspod::transport::Result<Option<Bytes>> {
        match self {
            #[cfg(unix)]
            Wire::Live(dev) => dev.recv_packet(timeout),
            #[cfg(unix)]
            Wire::Recording(rec) => rec.recv_packet(timeout),
            Wire::Replay(replay) => replay.recv_packet(timeout),
        }
    }
}

pub type CliSession = Session<Link<Wire>>;

fn default_record_path() -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let name = Timestamp::from_unix(now).format("%Y_%m_%d_%H_%M_%S.json");
    PathBuf::from(format!("{name}.{COMPRESSED_EXTENSION}"))
}

#[cfg(unix)]
fn open_live(args: &DeviceArgs) -> CliResult<Wire> {
    let mut dev = match &args.device {
        Some(path) => HidrawDevice::open(path),
        None => HidrawDevice::discover(),
    }
    .map_err(|err| transport_error("open device", err))?;
    let stale = dev
        .drain()
        .map_err(|err| transport_error("open device", err))?;
    info!(path = %dev.path().display(), stale, "device opened");

    if args.record || args.record_file.is_some() {
        let path = args.record_file.clone().unwrap_or_else(default_record_path);
        return Ok(Wire::Recording(Recorder::new(dev, path)));
    }
    Ok(Wire::Live(dev))
}

#[cfg(not(unix))]
fn open_live(_args: &DeviceArgs) -> CliResult<Wire> {
    Err(CliError::new(
        crate::exit::TRANSPORT_ERROR,
        "live devices need a hidraw node; use --replay or --fs",
    ))
}

fn open_wire(args: &DeviceArgs, needs_device: bool) -> CliResult<Wire> {
    if let Some(path) = &args.replay {
        let replay = Replayer::open(path).map_err(|err| link_error("load session", err))?;
        return Ok(Wire::Replay(replay));
    }
    if args.fs.is_some() {
        if needs_device {
            return Err(CliError::usage("--fs provides no device; use --replay or drop --fs"));
        }
        return Ok(Wire::Replay(Replayer::new(SessionLog::default())));
    }
    open_live(args)
}

/// Build a session from the global device flags.
pub fn open_session(args: &DeviceArgs, needs_device: bool) -> CliResult<CliSession> {
    let config = LinkConfig {
        timeout: parse_timeout(&args.timeout)?,
        verbose: args.verbose,
    };
    let link = Link::with_config(open_wire(args, needs_device)?, config);
    let session_config = SessionConfig {
        retry: RetryPolicy {
            max_failures: args.max_errors,
            ..RetryPolicy::default()
        },
        ..SessionConfig::default()
    };
    Ok(Session::new(link, session_config))
}

/// Open a session and mount either the `--fs` dump or the device flash.
pub fn open_mounted(args: &DeviceArgs) -> CliResult<CliSession> {
    let mut session = open_session(args, false)?;
    let image = match &args.fs {
        Some(path) => Some(load_image(path)?),
        None => None,
    };
    session.mount(image);
    Ok(session)
}

pub fn load_image(path: &Path) -> CliResult<MemoryImage> {
    MemoryImage::load(path).map_err(|err| pmem_error(&format!("load {}", path.display()), err))
}

/// Close the session, saving the recording if there is one.
pub fn finish(session: CliSession) -> CliResult<()> {
    let (mut link, _) = session.into_parts();
    link.transport_mut()
        .finish()
        .map_err(|err| link_error("save session log", err))
}
