use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{PacketTransport, REPORT_SIZE};

/// Live pod connection over a Linux `hidraw` device node.
///
/// The first byte of every pod packet (`0x3F`) doubles as the HID report id,
/// so packets are written to the node as-is, padded to a full report.
/// The node is closed when the value is dropped.
pub struct HidrawDevice {
    file: File,
    path: PathBuf,
}

impl HidrawDevice {
    /// USB vendor id of the pod.
    pub const VENDOR_ID: u16 = 0x1493;
    /// USB product id of the pod.
    pub const PRODUCT_ID: u16 = 0x0020;

    const SYSFS_CLASS: &'static str = "/sys/class/hidraw";

    /// Open a specific `hidraw` node.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| TransportError::Open {
                path: path.clone(),
                source,
            })?;
        info!(?path, "opened hidraw device");
        Ok(Self { file, path })
    }

    /// Find the first attached pod and open it.
    pub fn discover() -> Result<Self> {
        let path = Self::find_node(Path::new(Self::SYSFS_CLASS))?;
        Self::open(path)
    }

    /// Wrap an already opened file (used for tests and pre-opened nodes).
    pub fn from_file(file: File, path: impl Into<PathBuf>) -> Self {
        Self {
            file,
            path: path.into(),
        }
    }

    /// Scan a sysfs `hidraw` class directory for a node with the pod's USB id.
    pub fn find_node(class_dir: &Path) -> Result<PathBuf> {
        let not_found = TransportError::NotFound {
            vendor: Self::VENDOR_ID,
            product: Self::PRODUCT_ID,
        };
        let entries = match std::fs::read_dir(class_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Err(not_found),
            Err(err) => return Err(TransportError::Io(err)),
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();

        for name in names {
            let uevent = class_dir.join(&name).join("device").join("uevent");
            let Ok(text) = std::fs::read_to_string(&uevent) else {
                continue;
            };
            if parse_hid_id(&text) == Some((Self::VENDOR_ID, Self::PRODUCT_ID)) {
                debug!(node = %name, "found pod");
                return Ok(Path::new("/dev").join(name));
            }
        }
        Err(not_found)
    }

    /// Discard reports the device queued before this session started.
    pub fn drain(&mut self) -> Result<usize> {
        let mut dropped = 0;
        while self.recv_packet(Duration::from_millis(10))?.is_some() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "drained stale reports");
        }
        Ok(dropped)
    }

    /// The device node path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn wait_readable(&self, timeout: Duration) -> Result<bool> {
        let mut pfd = libc::pollfd {
            fd: self.file.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
        loop {
            // SAFETY: `pfd` is a valid pollfd for one open descriptor owned by `self.file`.
            let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
            if rc < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(TransportError::Io(err));
            }
            return Ok(rc > 0);
        }
    }
}

impl PacketTransport for HidrawDevice {
    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        if packet.len() > REPORT_SIZE {
            return Err(TransportError::PacketTooLarge {
                size: packet.len(),
                max: REPORT_SIZE,
            });
        }
        let mut report = [0u8; REPORT_SIZE];
        report[..packet.len()].copy_from_slice(packet);
        loop {
            match self.file.write_all(&report) {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }

    fn recv_packet(&mut self, timeout: Duration) -> Result<Option<Bytes>> {
        if !self.wait_readable(timeout)? {
            return Ok(None);
        }
        let mut report = [0u8; REPORT_SIZE];
        loop {
            match self.file.read(&mut report) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => return Ok(Some(Bytes::copy_from_slice(&report[..n]))),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }
}

impl std::fmt::Debug for HidrawDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HidrawDevice")
            .field("path", &self.path)
            .finish()
    }
}

/// Parse the `HID_ID=bus:vendor:product` line of a sysfs uevent file.
fn parse_hid_id(uevent: &str) -> Option<(u16, u16)> {
    let value = uevent
        .lines()
        .find_map(|line| line.strip_prefix("HID_ID="))?;
    let mut parts = value.trim().split(':');
    let _bus = parts.next()?;
    let vendor = u32::from_str_radix(parts.next()?, 16).ok()?;
    let product = u32::from_str_radix(parts.next()?, 16).ok()?;
    Some((u16::try_from(vendor).ok()?, u16::try_from(product).ok()?))
}

#[cfg(test)]
mod tests {
    use std::os::fd::OwnedFd;
    use std::os::unix::net::UnixStream;

    use super::*;

    fn socket_device() -> (HidrawDevice, UnixStream) {
        let (left, right) = UnixStream::pair().unwrap();
        let file = File::from(OwnedFd::from(left));
        (HidrawDevice::from_file(file, "/dev/hidraw-test"), right)
    }

    #[test]
    fn parses_hid_id_from_uevent() {
        let uevent = "DRIVER=hid-generic\nHID_ID=0003:00001493:00000020\nHID_NAME=Suunto\n";
        assert_eq!(parse_hid_id(uevent), Some((0x1493, 0x0020)));
        assert_eq!(parse_hid_id("HID_NAME=x\n"), None);
        assert_eq!(parse_hid_id("HID_ID=0003:zz:0020\n"), None);
    }

    #[test]
    fn find_node_matches_vendor_and_product() {
        let dir = std::env::temp_dir().join(format!("gpspod-sysfs-{}", std::process::id()));
        for (node, id) in [
            ("hidraw0", "0003:0000046D:0000C52B"),
            ("hidraw3", "0003:00001493:00000020"),
        ] {
            let device = dir.join(node).join("device");
            std::fs::create_dir_all(&device).unwrap();
            std::fs::write(device.join("uevent"), format!("HID_ID={id}\n")).unwrap();
        }

        let found = HidrawDevice::find_node(&dir).unwrap();
        assert_eq!(found, PathBuf::from("/dev/hidraw3"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn find_node_reports_missing_device() {
        let dir = std::env::temp_dir().join(format!("gpspod-sysfs-none-{}", std::process::id()));
        let result = HidrawDevice::find_node(&dir);
        assert!(matches!(result, Err(TransportError::NotFound { .. })));
    }

    #[test]
    fn send_pads_to_full_report() {
        let (mut device, mut peer) = socket_device();
        device.send_packet(&[0x3F, 0x01, 0x02]).unwrap();

        let mut report = [0xAAu8; REPORT_SIZE];
        peer.read_exact(&mut report).unwrap();
        assert_eq!(&report[..3], &[0x3F, 0x01, 0x02]);
        assert!(report[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn send_rejects_oversized_packet() {
        let (mut device, _peer) = socket_device();
        let result = device.send_packet(&[0u8; REPORT_SIZE + 1]);
        assert!(matches!(result, Err(TransportError::PacketTooLarge { .. })));
    }

    #[test]
    fn recv_times_out_without_data() {
        let (mut device, _peer) = socket_device();
        let packet = device.recv_packet(Duration::from_millis(5)).unwrap();
        assert!(packet.is_none());
    }

    #[test]
    fn recv_returns_one_report() {
        let (mut device, mut peer) = socket_device();
        let mut report = [0u8; REPORT_SIZE];
        report[0] = 0x3F;
        report[1] = 0x08;
        peer.write_all(&report).unwrap();

        let packet = device.recv_packet(Duration::from_millis(100)).unwrap().unwrap();
        assert_eq!(packet.len(), REPORT_SIZE);
        assert_eq!(packet[0], 0x3F);
    }

    #[test]
    fn recv_reports_closed_device() {
        let (mut device, peer) = socket_device();
        drop(peer);
        let result = device.recv_packet(Duration::from_millis(100));
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[test]
    fn drain_discards_queued_reports() {
        let (mut device, mut peer) = socket_device();
        peer.write_all(&[0u8; REPORT_SIZE * 2]).unwrap();
        // Stream sockets may coalesce; at least one report is dropped.
        assert!(device.drain().unwrap() >= 1);
        assert!(device.recv_packet(Duration::from_millis(5)).unwrap().is_none());
    }
}
