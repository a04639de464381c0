use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use bytes::Bytes;
use gpspod_transport::{PacketTransport, TransportError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{LinkError, Result};

/// Current session log format version.
pub const SESSION_LOG_VERSION: u32 = 1;

/// Extension of zstd-compressed session logs.
pub const COMPRESSED_EXTENSION: &str = "zst";

const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];
const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Host to device.
    Out,
    /// Device to host.
    In,
}

/// One USB packet as it crossed the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub direction: Direction,
    /// Seconds since the session started.
    pub time: f64,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

/// Recorded traffic of one session, in capture order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionLog {
    pub version: u32,
    pub entries: Vec<LogEntry>,
}

impl Default for SessionLog {
    fn default() -> Self {
        Self {
            version: SESSION_LOG_VERSION,
            entries: Vec::new(),
        }
    }
}

impl SessionLog {
    pub fn from_json(text: &str) -> Result<Self> {
        let log: Self = serde_json::from_str(text)?;
        if log.version != SESSION_LOG_VERSION {
            return Err(LinkError::SessionLog(format!(
                "unsupported version {} (expected {SESSION_LOG_VERSION})",
                log.version
            )));
        }
        Ok(log)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a session file: JSON or a Wireshark PDML capture, either one
    /// optionally zstd-compressed.
    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        let decompressed;
        let raw = if raw.starts_with(&ZSTD_MAGIC) {
            decompressed = zstd::decode_all(raw)?;
            decompressed.as_slice()
        } else {
            raw
        };
        let text = std::str::from_utf8(raw)
            .map_err(|err| LinkError::SessionLog(format!("not utf-8: {err}")))?;
        if text.trim_start().starts_with('<') {
            return crate::pdml::parse(text);
        }
        Self::from_json(text)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_slice(&std::fs::read(path.as_ref())?)
    }

    /// Write as JSON, compressed when the path ends in `.zst`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = self.to_json()?;
        if path.extension().is_some_and(|ext| ext == COMPRESSED_EXTENSION) {
            std::fs::write(path, zstd::encode_all(json.as_bytes(), ZSTD_LEVEL)?)?;
        } else {
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    pub fn incoming(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(|e| e.direction == Direction::In)
    }
}

mod hex_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        let mut text = String::with_capacity(data.len() * 2);
        for byte in data {
            text.push_str(&format!("{byte:02x}"));
        }
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::decode_hex(&text).ok_or_else(|| D::Error::custom(format!("invalid hex data {text:?}")))
    }
}

/// Decode a string of hex digit pairs.
pub(crate) fn decode_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| text.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect()
}

/// Transport wrapper that records every packet and saves the log.
///
/// The log is written on [`Recorder::finish`], or on drop if `finish` was
/// never called.
pub struct Recorder<T> {
    inner: T,
    path: PathBuf,
    log: SessionLog,
    started: Instant,
    saved: bool,
}

impl<T: PacketTransport> Recorder<T> {
    pub fn new(inner: T, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        info!(path = %path.display(), "recording session");
        Self {
            inner,
            path,
            log: SessionLog::default(),
            started: Instant::now(),
            saved: false,
        }
    }
}

impl<T> Recorder<T> {
    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    /// Write the session log now.
    pub fn finish(&mut self) -> Result<()> {
        self.log.save(&self.path)?;
        self.saved = true;
        info!(
            path = %self.path.display(),
            entries = self.log.entries.len(),
            "session log saved"
        );
        Ok(())
    }

    fn push(&mut self, direction: Direction, data: &[u8]) {
        self.saved = false;
        self.log.entries.push(LogEntry {
            direction,
            time: self.started.elapsed().as_secs_f64(),
            data: data.to_vec(),
        });
    }
}

impl<T: PacketTransport> PacketTransport for Recorder<T> {
    fn send_packet(&mut self, packet: &[u8]) -> gpspod_transport::Result<()> {
        self.inner.send_packet(packet)?;
        self.push(Direction::Out, packet);
        Ok(())
    }

    fn recv_packet(&mut self, timeout: Duration) -> gpspod_transport::Result<Option<Bytes>> {
        let packet = self.inner.recv_packet(timeout)?;
        if let Some(packet) = &packet {
            self.push(Direction::In, packet);
        }
        Ok(packet)
    }
}

impl<T> Drop for Recorder<T> {
    fn drop(&mut self) {
        if self.saved {
            return;
        }
        if let Err(err) = self.finish() {
            warn!(path = %self.path.display(), %err, "failed to save session log");
        }
    }
}

/// Offline transport that plays back a recorded session.
///
/// Outgoing packets must match the recording byte for byte. An incoming
/// read with an outgoing entry next behaves like a timeout, as it did when
/// the session was recorded.
#[derive(Debug)]
pub struct Replayer {
    log: SessionLog,
    position: usize,
}

impl Replayer {
    pub fn new(log: SessionLog) -> Self {
        debug!(entries = log.entries.len(), "replaying session");
        Self { log, position: 0 }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(SessionLog::load(path)?))
    }

    /// Entries not yet consumed.
    pub fn remaining(&self) -> usize {
        self.log.entries.len() - self.position
    }
}

impl PacketTransport for Replayer {
    fn send_packet(&mut self, packet: &[u8]) -> gpspod_transport::Result<()> {
        let index = self.position;
        let entry = self
            .log
            .entries
            .get(index)
            .ok_or(TransportError::Exhausted)?;
        if entry.direction != Direction::Out || entry.data != packet {
            return Err(TransportError::Diverged { index });
        }
        self.position += 1;
        Ok(())
    }

    fn recv_packet(&mut self, _timeout: Duration) -> gpspod_transport::Result<Option<Bytes>> {
        let entry = self
            .log
            .entries
            .get(self.position)
            .ok_or(TransportError::Exhausted)?;
        if entry.direction != Direction::In {
            return Ok(None);
        }
        self.position += 1;
        Ok(Some(Bytes::copy_from_slice(&entry.data)))
    }
}

#[cfg(test)]
mod tests {
    use gpspod_frame::{Reply, Request};

    use super::*;
    use crate::communicator::Communicator;
    use crate::link::{Link, LinkConfig};
    use crate::sim::SimulatedPod;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("gpspod-{name}-{}.json", std::process::id()))
    }

    fn quick() -> LinkConfig {
        LinkConfig {
            timeout: Duration::from_millis(50),
            verbose: false,
        }
    }

    #[test]
    fn session_log_json_shape() {
        let log = SessionLog {
            version: 1,
            entries: vec![LogEntry {
                direction: Direction::Out,
                time: 0.5,
                data: vec![0x3f, 0x0a, 0xff],
            }],
        };
        let json: serde_json::Value =
            serde_json::from_str(&log.to_json().expect("log should serialize")).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["entries"][0]["direction"], "out");
        assert_eq!(json["entries"][0]["data"], "3f0aff");

        let parsed = SessionLog::from_json(&log.to_json().unwrap()).expect("log should parse");
        assert_eq!(parsed, log);
    }

    #[test]
    fn rejects_bad_version_and_hex() {
        let err = SessionLog::from_json(r#"{"version":2,"entries":[]}"#).unwrap_err();
        assert!(matches!(err, LinkError::SessionLog(_)));

        let err = SessionLog::from_json(
            r#"{"version":1,"entries":[{"direction":"in","time":0.0,"data":"3g"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, LinkError::Json(_)));
    }

    #[test]
    fn compressed_log_round_trips() {
        let path = std::env::temp_dir().join(format!(
            "gpspod-compressed-{}.json.{COMPRESSED_EXTENSION}",
            std::process::id()
        ));
        let mut recorder = Recorder::new(SimulatedPod::new(vec![0; 1024]), &path);
        {
            let mut link = Link::with_config(&mut recorder, quick());
            link.exchange(&Request::ReadData { offset: 512 })
                .expect("recorded exchange should succeed");
        }
        recorder.finish().expect("log should be written");
        let recorded = recorder.log().clone();
        assert!(recorded.entries.len() > 1);

        let raw = std::fs::read(&path).expect("log should exist");
        assert!(raw.starts_with(&ZSTD_MAGIC));
        assert!(serde_json::from_slice::<serde_json::Value>(&raw).is_err());
        assert_eq!(SessionLog::load(&path).expect("compressed log should load"), recorded);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn plain_json_is_written_uncompressed() {
        let path = temp_path("plain");
        let log = SessionLog::default();
        log.save(&path).expect("log should be written");
        let text = std::fs::read_to_string(&path).expect("plain log should be text");
        assert!(text.contains("\"version\": 1"));
        assert_eq!(SessionLog::load(&path).unwrap(), log);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn garbage_is_not_a_session_log() {
        assert!(SessionLog::from_slice(&[0xFF, 0xFE, 0x00]).is_err());
        assert!(SessionLog::from_slice(&ZSTD_MAGIC).is_err());
    }

    #[test]
    fn replay_reproduces_recorded_replies() {
        let path = temp_path("replay");
        let requests = [
            Request::DeviceInfo,
            Request::DeviceStatus,
            Request::ReadData { offset: 0 },
            Request::LogCount,
        ];

        let mut image = vec![0u8; 2048];
        image[..4].copy_from_slice(b"PMEM");
        let mut recording = Link::with_config(
            Recorder::new(SimulatedPod::new(image), &path),
            quick(),
        );
        let recorded: Vec<Reply> = requests
            .iter()
            .map(|r| recording.exchange(r).expect("recorded exchange should succeed"))
            .collect();
        recording
            .transport_mut()
            .finish()
            .expect("log should be written");
        drop(recording);

        let mut offline = Link::with_config(Replayer::open(&path).expect("log should load"), quick());
        let replayed: Vec<Reply> = requests
            .iter()
            .map(|r| offline.exchange(r).expect("replayed exchange should succeed"))
            .collect();
        assert_eq!(replayed, recorded);
        assert_eq!(offline.transport().remaining(), 0);

        let err = offline.exchange(&Request::DeviceStatus).unwrap_err();
        assert!(matches!(err, LinkError::ReplayExhausted));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn replay_detects_divergent_request() {
        let path = temp_path("diverge");
        {
            let mut recording = Link::new(Recorder::new(SimulatedPod::new(vec![0; 1024]), &path));
            recording
                .exchange(&Request::DeviceStatus)
                .expect("recorded exchange should succeed");
        }

        let mut offline = Link::new(Replayer::open(&path).expect("log should load"));
        let err = offline.write(&Request::LogCount).unwrap_err();
        assert!(matches!(err, LinkError::ReplayMismatch { index: 0 }));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn replayed_timeout_stays_a_timeout() {
        let message = gpspod_frame::encode_request(&Request::DeviceStatus, 0);
        let packets = gpspod_frame::packetize(&message).unwrap();
        let out = |time: f64, data: Vec<u8>| LogEntry {
            direction: Direction::Out,
            time,
            data,
        };
        let log = SessionLog {
            version: 1,
            entries: vec![out(0.0, packets[0].to_vec()), out(1.0, vec![0x3f])],
        };

        let mut offline = Link::with_config(Replayer::new(log), quick());
        offline.write(&Request::DeviceStatus).expect("write should match");
        assert!(matches!(offline.read(), Err(LinkError::Timeout(_))));
    }
}
