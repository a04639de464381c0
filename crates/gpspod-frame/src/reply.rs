use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::message::Message;
use crate::opcode::Opcode;

const MODEL_SIZE: usize = 16;
const SERIAL_SIZE: usize = 16;
const DEVICE_INFO_SIZE: usize = MODEL_SIZE + SERIAL_SIZE + 12;

/// Size of the settings block returned by read settings.
pub const SETTINGS_SIZE: usize = 70;
const SOUNDS_OFFSET: usize = 26;

/// A four-part version number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Version(pub [u8; 4]);

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{a}.{b}.{c}.{d}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub model: String,
    pub serial: String,
    pub fw_version: Version,
    pub hw_version: Version,
    pub bsl_version: Version,
    /// Trailing bytes the device appends after the version fields.
    pub extra: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStatus {
    /// Battery charge in percent.
    pub charge: u8,
}

/// The raw settings block; only the sounds flag is interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub raw: Bytes,
}

impl Settings {
    /// `Some(true)` when sounds are on, `None` for an unrecognised value.
    pub fn sounds(&self) -> Option<bool> {
        match self.raw.get(SOUNDS_OFFSET) {
            Some(1) => Some(true),
            Some(2) => Some(false),
            _ => None,
        }
    }
}

/// Navigation result of the log-header rewind, peek and step commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderStep {
    pub step: u32,
}

impl HeaderStep {
    /// Peek value reporting further entries.
    pub const MORE: u32 = 0x0400;
    /// Peek value reporting the end of the entries.
    pub const END: u32 = 0x0C00;

    pub fn is_end(&self) -> bool {
        self.step == Self::END
    }
}

/// One part of a log header as read through the header navigation commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogHeaderEntry {
    pub kind: u16,
    pub header_part: u16,
    pub data: Bytes,
}

/// One block of flash contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBlock {
    pub position: u32,
    pub data: Bytes,
}

impl DataBlock {
    pub fn length(&self) -> u32 {
        self.data.len() as u32
    }
}

/// A message outside the known reply catalog, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub command: u16,
    pub direction: u16,
    pub format: u16,
    pub payload: Bytes,
}

/// A decoded reply: one variant per known opcode plus [`Reply::Raw`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    DeviceInfo(DeviceInfo),
    DeviceStatus(DeviceStatus),
    Reset,
    Settings(Settings),
    LogCount(u16),
    LogHeaderRewind(HeaderStep),
    LogHeaderPeek(HeaderStep),
    LogHeaderStep(HeaderStep),
    LogHeaderEntry(LogHeaderEntry),
    Data(DataBlock),
    Raw(RawMessage),
}

fn need(body: &[u8], len: usize) -> Result<()> {
    if body.len() < len {
        return Err(FrameError::ShortFrame {
            expected: len,
            actual: body.len(),
        });
    }
    Ok(())
}

fn u16_at(body: &[u8], i: usize) -> u16 {
    u16::from_le_bytes([body[i], body[i + 1]])
}

fn u32_at(body: &[u8], i: usize) -> u32 {
    u32::from_le_bytes([body[i], body[i + 1], body[i + 2], body[i + 3]])
}

fn fixed_string(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

fn put_fixed_string(buf: &mut BytesMut, value: &str, size: usize) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(size);
    buf.put_slice(&bytes[..len]);
    buf.put_bytes(0, size - len);
}

fn version_at(body: &[u8], i: usize) -> Version {
    Version([body[i], body[i + 1], body[i + 2], body[i + 3]])
}

impl Reply {
    /// The catalog entry of this reply, `None` for [`Reply::Raw`].
    pub fn opcode(&self) -> Option<Opcode> {
        self.classify().ok()
    }

    fn classify(&self) -> std::result::Result<Opcode, &RawMessage> {
        Ok(match self {
            Self::DeviceInfo(_) => Opcode::DeviceInfo,
            Self::DeviceStatus(_) => Opcode::DeviceStatus,
            Self::Reset => Opcode::Reset,
            Self::Settings(_) => Opcode::ReadSettings,
            Self::LogCount(_) => Opcode::LogCount,
            Self::LogHeaderRewind(_) => Opcode::LogHeaderRewind,
            Self::LogHeaderPeek(_) => Opcode::LogHeaderPeek,
            Self::LogHeaderStep(_) => Opcode::LogHeaderStep,
            Self::LogHeaderEntry(_) => Opcode::LogHeaderEntry,
            Self::Data(_) => Opcode::ReadData,
            Self::Raw(raw) => return Err(raw),
        })
    }

    /// Interpret a reassembled message.
    pub fn from_message(message: &Message) -> Result<Self> {
        let header = &message.header;
        let Some(op) = Opcode::from_reply(header.command, header.direction) else {
            return Ok(Self::Raw(RawMessage {
                command: header.command,
                direction: header.direction,
                format: header.format,
                payload: message.payload.clone(),
            }));
        };

        let body = message.payload.as_ref();
        Ok(match op {
            Opcode::DeviceInfo => {
                need(body, DEVICE_INFO_SIZE)?;
                Self::DeviceInfo(DeviceInfo {
                    model: fixed_string(&body[..MODEL_SIZE]),
                    serial: fixed_string(&body[MODEL_SIZE..MODEL_SIZE + SERIAL_SIZE]),
                    fw_version: version_at(body, 32),
                    hw_version: version_at(body, 36),
                    bsl_version: version_at(body, 40),
                    extra: message.payload.slice(DEVICE_INFO_SIZE..),
                })
            }
            Opcode::DeviceStatus => {
                need(body, 2)?;
                Self::DeviceStatus(DeviceStatus { charge: body[1] })
            }
            Opcode::Reset => Self::Reset,
            Opcode::ReadSettings => Self::Settings(Settings {
                raw: message.payload.clone(),
            }),
            Opcode::LogCount => {
                need(body, 4)?;
                Self::LogCount(u16_at(body, 2))
            }
            Opcode::LogHeaderRewind | Opcode::LogHeaderPeek | Opcode::LogHeaderStep => {
                need(body, 4)?;
                let step = HeaderStep {
                    step: u32_at(body, 0),
                };
                match op {
                    Opcode::LogHeaderRewind => Self::LogHeaderRewind(step),
                    Opcode::LogHeaderPeek => Self::LogHeaderPeek(step),
                    _ => Self::LogHeaderStep(step),
                }
            }
            Opcode::LogHeaderEntry => {
                need(body, 8)?;
                let length = u32_at(body, 4) as usize;
                need(body, 8 + length)?;
                Self::LogHeaderEntry(LogHeaderEntry {
                    kind: u16_at(body, 0),
                    header_part: u16_at(body, 2),
                    data: message.payload.slice(8..8 + length),
                })
            }
            Opcode::ReadData => {
                need(body, 8)?;
                let length = u32_at(body, 4) as usize;
                need(body, 8 + length)?;
                Self::Data(DataBlock {
                    position: u32_at(body, 0),
                    data: message.payload.slice(8..8 + length),
                })
            }
        })
    }

    pub fn payload(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            Self::DeviceInfo(info) => {
                put_fixed_string(&mut buf, &info.model, MODEL_SIZE);
                put_fixed_string(&mut buf, &info.serial, SERIAL_SIZE);
                buf.put_slice(&info.fw_version.0);
                buf.put_slice(&info.hw_version.0);
                buf.put_slice(&info.bsl_version.0);
                buf.put_slice(&info.extra);
            }
            Self::DeviceStatus(status) => {
                buf.put_u8(0);
                buf.put_u8(status.charge);
                buf.put_u16_le(0);
            }
            Self::Reset => {}
            Self::Settings(settings) => buf.put_slice(&settings.raw),
            Self::LogCount(count) => {
                buf.put_u16_le(0);
                buf.put_u16_le(*count);
            }
            Self::LogHeaderRewind(step) | Self::LogHeaderPeek(step) | Self::LogHeaderStep(step) => {
                buf.put_u32_le(step.step)
            }
            Self::LogHeaderEntry(entry) => {
                buf.put_u16_le(entry.kind);
                buf.put_u16_le(entry.header_part);
                buf.put_u32_le(entry.data.len() as u32);
                buf.put_slice(&entry.data);
            }
            Self::Data(block) => {
                buf.put_u32_le(block.position);
                buf.put_u32_le(block.length());
                buf.put_slice(&block.data);
            }
            Self::Raw(raw) => buf.put_slice(&raw.payload),
        }
        buf.freeze()
    }

    pub fn to_message(&self, sequence: u16) -> Message {
        let (command, direction, format) = match self.classify() {
            Ok(op) => (op.reply_command(), op.reply_direction(), op.reply_format()),
            Err(raw) => (raw.command, raw.direction, raw.format),
        };
        Message::new(command, direction, format, sequence, self.payload())
    }
}

fn write_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            f.write_str(" ")?;
        }
        write!(f, "{byte:02X}")?;
    }
    Ok(())
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceInfo(info) => write!(
                f,
                "model: {}, serial: {}, fw: {} hw: {} bsl: {}",
                info.model, info.serial, info.fw_version, info.hw_version, info.bsl_version
            ),
            Self::DeviceStatus(status) => write!(f, "charge: {}%", status.charge),
            Self::Reset => f.write_str("reset acknowledged"),
            Self::Settings(settings) => match settings.sounds() {
                Some(true) => f.write_str("sounds: on"),
                Some(false) => f.write_str("sounds: off"),
                None => f.write_str("sounds: unknown"),
            },
            Self::LogCount(count) => write!(f, "log count: {count}"),
            Self::LogHeaderRewind(step) => write!(f, "rewind: {:#06x}", step.step),
            Self::LogHeaderPeek(step) => write!(f, "peek: {:#06x}", step.step),
            Self::LogHeaderStep(step) => write!(f, "step: {:#06x}", step.step),
            Self::LogHeaderEntry(entry) => {
                write!(
                    f,
                    "header entry type {} part {}, length {}: ",
                    entry.kind,
                    entry.header_part,
                    entry.data.len()
                )?;
                write_hex(f, &entry.data)
            }
            Self::Data(block) => write!(f, "data {:#08x}+{:#x}", block.position, block.length()),
            Self::Raw(raw) => {
                write!(
                    f,
                    "raw cmd {:#06x} dir {:#06x}: ",
                    raw.command, raw.direction
                )?;
                write_hex(f, &raw.payload)
            }
        }
    }
}
