use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::message::Message;
use crate::opcode::Opcode;

/// Bytes returned by one data-block read.
pub const DATA_BLOCK_SIZE: u32 = 512;

/// Host version sent with the device info request.
const HOST_VERSION: [u8; 4] = [2, 4, 89, 0];

/// A typed request. Every variant maps to exactly one [`Opcode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    DeviceInfo,
    DeviceStatus,
    Reset,
    ReadSettings,
    LogCount,
    LogHeaderRewind,
    LogHeaderPeek,
    LogHeaderStep,
    LogHeaderEntry,
    /// Read one [`DATA_BLOCK_SIZE`] block starting at a block-aligned offset.
    ReadData { offset: u32 },
}

impl Request {
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::DeviceInfo => Opcode::DeviceInfo,
            Self::DeviceStatus => Opcode::DeviceStatus,
            Self::Reset => Opcode::Reset,
            Self::ReadSettings => Opcode::ReadSettings,
            Self::LogCount => Opcode::LogCount,
            Self::LogHeaderRewind => Opcode::LogHeaderRewind,
            Self::LogHeaderPeek => Opcode::LogHeaderPeek,
            Self::LogHeaderStep => Opcode::LogHeaderStep,
            Self::LogHeaderEntry => Opcode::LogHeaderEntry,
            Self::ReadData { .. } => Opcode::ReadData,
        }
    }

    pub fn payload(&self) -> Bytes {
        match self {
            Self::DeviceInfo => Bytes::from_static(&HOST_VERSION),
            Self::ReadData { offset } => {
                let mut buf = BytesMut::with_capacity(8);
                buf.put_u32_le(*offset);
                buf.put_u32_le(DATA_BLOCK_SIZE);
                buf.freeze()
            }
            _ => Bytes::new(),
        }
    }

    pub fn to_message(&self, sequence: u16) -> Message {
        let op = self.opcode();
        Message::new(
            op.request_command(),
            op.request_direction(),
            op.request_format(),
            sequence,
            self.payload(),
        )
    }

    /// Interpret a recorded outgoing message.
    pub fn from_message(message: &Message) -> Result<Self> {
        let header = &message.header;
        let op = Opcode::from_request(header.command, header.direction).ok_or(
            FrameError::UnknownOpcode {
                command: header.command,
                direction: header.direction,
            },
        )?;
        Ok(match op {
            Opcode::DeviceInfo => Self::DeviceInfo,
            Opcode::DeviceStatus => Self::DeviceStatus,
            Opcode::Reset => Self::Reset,
            Opcode::ReadSettings => Self::ReadSettings,
            Opcode::LogCount => Self::LogCount,
            Opcode::LogHeaderRewind => Self::LogHeaderRewind,
            Opcode::LogHeaderPeek => Self::LogHeaderPeek,
            Opcode::LogHeaderStep => Self::LogHeaderStep,
            Opcode::LogHeaderEntry => Self::LogHeaderEntry,
            Opcode::ReadData => {
                let body = &message.payload;
                if body.len() < 8 {
                    return Err(FrameError::ShortFrame {
                        expected: 8,
                        actual: body.len(),
                    });
                }
                Self::ReadData {
                    offset: u32::from_le_bytes([body[0], body[1], body[2], body[3]]),
                }
            }
        })
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceInfo => {
                let [a, b, c, d] = HOST_VERSION;
                write!(f, "device-info request (host {a}.{b}.{c}.{d})")
            }
            Self::ReadData { offset } => {
                write!(f, "read-data request {offset:#08x}+{DATA_BLOCK_SIZE:#x}")
            }
            other => write!(f, "{} request", other.opcode()),
        }
    }
}
