use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use gpspod::frame::{decode_reply, decode_request, Assembler, Message};
use gpspod::link::{Direction, SessionLog};
use gpspod::pmem::{reconstruct as rebuild, MemoryImage};
use tracing::info;

use crate::cmd::device::{finish, open_session};
use crate::cmd::{DeviceArgs, DumpArgs, ReconstructArgs, ViewArgs};
use crate::exit::{link_error, pmem_error, CliError, CliResult, INTERNAL, SUCCESS};

pub fn dump(args: DumpArgs, device: &DeviceArgs) -> CliResult<i32> {
    let mut session = open_session(device, true)?;
    let cancel = Arc::new(AtomicBool::new(false));
    install_ctrlc_handler(cancel.clone())?;
    session.set_cancel_flag(cancel);

    let outcome = match args.upto {
        Some(limit) => session.dump_upto(limit),
        None => session.dump(),
    }
    .map(|_| ());
    let path = write_image(session.image(), &args.file, outcome.is_ok())?;
    info!(round_trips = session.round_trips(), "dump finished");

    if let Err(err) = outcome {
        let last = session
            .last_fetched()
            .map_or_else(|| "none".to_string(), |offset| format!("{offset:#08x}"));
        let mut cli = pmem_error("dump", err);
        cli.message = format!(
            "{} (last block read: {last}; partial image in {})",
            cli.message,
            path.display()
        );
        return Err(cli);
    }
    finish(session)?;
    Ok(SUCCESS)
}

/// Save what was read: to `file` after a clean read, to `file.partial`
/// after a failed one.
fn write_image(image: &MemoryImage, file: &Path, clean: bool) -> CliResult<PathBuf> {
    let path = if clean {
        file.to_path_buf()
    } else {
        let mut name = file.as_os_str().to_owned();
        name.push(".partial");
        PathBuf::from(name)
    };
    image
        .save(&path)
        .map_err(|err| pmem_error(&format!("write {}", path.display()), err))?;

    let missing = image.missing_ranges();
    for range in &missing {
        info!(
            start = format_args!("{:#08x}", range.start),
            end = format_args!("{:#08x}", range.end),
            "not read"
        );
    }
    info!(
        path = %path.display(),
        present = image.present_blocks(),
        missing = missing.len(),
        "flash image written"
    );
    Ok(path)
}

fn install_ctrlc_handler(cancel: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        cancel.store(true, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

fn load_log(path: &Path) -> CliResult<SessionLog> {
    SessionLog::load(path).map_err(|err| link_error(&format!("load {}", path.display()), err))
}

/// One decoded message per line, in capture order.
pub fn view(args: ViewArgs) -> CliResult<i32> {
    let log = load_log(&args.file)?;
    let mut outgoing = Assembler::new();
    let mut incoming = Assembler::new();

    for entry in &log.entries {
        let (assembler, arrow) = match entry.direction {
            Direction::Out => (&mut outgoing, "->"),
            Direction::In => (&mut incoming, "<-"),
        };
        let message = match assembler.push_raw(&entry.data) {
            Ok(Some(message)) => message,
            Ok(None) => continue,
            Err(err) => {
                println!("#{:07.3} {arrow} damaged packet: {err}", entry.time);
                continue;
            }
        };
        println!("#{:07.3} {arrow} {}", entry.time, describe(entry.direction, &message));
    }
    Ok(SUCCESS)
}

fn describe(direction: Direction, message: &[u8]) -> String {
    let decoded = match direction {
        Direction::Out => decode_request(message).map(|r| r.to_string()),
        Direction::In => decode_reply(message).map(|r| r.to_string()),
    };
    match (decoded, Message::decode(message)) {
        (Ok(text), Ok(m)) => format!("[seq {}] {text}", m.header.sequence),
        (Ok(text), Err(_)) => text,
        (Err(_), Ok(m)) => format!("unknown message {}", m.header),
        (Err(err), Err(_)) => format!("undecodable message: {err}"),
    }
}

pub fn reconstruct(args: ReconstructArgs) -> CliResult<i32> {
    let log = load_log(&args.file)?;
    let rebuilt = rebuild(&log);
    for range in &rebuilt.missing {
        println!("missing {:#08x} up to {:#08x}", range.start, range.end);
    }

    let path = args
        .outfile
        .unwrap_or_else(|| default_image_path(&args.file));
    std::fs::write(&path, rebuilt.to_dump())
        .map_err(|err| crate::exit::io_error(&format!("write {}", path.display()), err))?;
    info!(
        path = %path.display(),
        blocks = rebuilt.blocks,
        skipped = rebuilt.skipped,
        "image reconstructed"
    );
    Ok(SUCCESS)
}

/// `dir/name.ext...` becomes `dir/name.binfs`.
fn default_image_path(session: &Path) -> PathBuf {
    let name = session
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("session");
    let stem = name.split('.').next().unwrap_or(name);
    session.with_file_name(format!("{stem}.binfs"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use gpspod::link::sim::{Fault, SimulatedPod};
    use gpspod::link::{Link, LinkConfig, RetryPolicy};
    use gpspod::pmem::{BLOCK_SIZE, FILESYSTEM_SIZE};
    use gpspod::{Session, SessionConfig};

    use super::*;

    fn temp_file(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("gpspod-debug-{name}-{}.bin", std::process::id()))
    }

    #[test]
    fn failed_dump_keeps_blocks_read_so_far() {
        let mut flash = vec![0u8; 4 * BLOCK_SIZE];
        flash[BLOCK_SIZE..BLOCK_SIZE + 4].copy_from_slice(b"PMEM");
        let link = Link::with_config(
            SimulatedPod::new(flash),
            LinkConfig {
                timeout: Duration::from_millis(20),
                verbose: false,
            },
        );
        let config = SessionConfig {
            retry: RetryPolicy {
                max_failures: 10,
                delay: Duration::ZERO,
            },
            ..SessionConfig::default()
        };
        let mut session = Session::new(link, config);
        session.dump_upto(2 * BLOCK_SIZE).expect("first blocks should read");
        session.communicator_mut().transport_mut().push_fault(Fault::Silent);
        assert!(session.dump().is_err());

        let file = temp_file("partial");
        let path = write_image(session.image(), &file, false).expect("partial image should save");
        assert_eq!(path, PathBuf::from(format!("{}.partial", file.display())));
        assert!(!file.exists());

        let saved = std::fs::read(&path).expect("partial image should exist");
        assert_eq!(saved.len(), FILESYSTEM_SIZE);
        assert_eq!(&saved[BLOCK_SIZE..BLOCK_SIZE + 4], b"PMEM");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn clean_dump_is_written_in_place() {
        let file = temp_file("clean");
        let path = write_image(&MemoryImage::new(), &file, true).expect("image should save");
        assert_eq!(path, file);
        assert!(file.exists());
        let _ = std::fs::remove_file(&file);
    }

    #[test]
    fn image_path_replaces_every_extension() {
        assert_eq!(
            default_image_path(Path::new("/tmp/logs/2017_06_01.json.zst")),
            PathBuf::from("/tmp/logs/2017_06_01.binfs")
        );
        assert_eq!(
            default_image_path(Path::new("capture")),
            PathBuf::from("capture.binfs")
        );
    }
}
