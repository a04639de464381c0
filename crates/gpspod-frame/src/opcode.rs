use std::fmt;

use crate::message::MessageHeader;

/// Direction field of device info requests.
pub const DIRECTION_DEVICE_INFO_REQUEST: u16 = 0x0001;
/// Direction field of device info replies.
pub const DIRECTION_DEVICE_INFO_REPLY: u16 = 0x0002;
/// Direction field of every other request.
pub const DIRECTION_REQUEST: u16 = 0x0005;
/// Direction field of every other reply.
pub const DIRECTION_REPLY: u16 = 0x000A;

/// Format field of device info requests.
pub const FORMAT_DEVICE_INFO: u16 = 0x0000;
/// Format field of every other message.
pub const FORMAT_DEFAULT: u16 = 0x0009;

/// The closed catalog of commands this client speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    DeviceInfo,
    DeviceStatus,
    Reset,
    ReadSettings,
    LogCount,
    LogHeaderRewind,
    LogHeaderPeek,
    LogHeaderStep,
    LogHeaderEntry,
    ReadData,
}

impl Opcode {
    pub const ALL: [Opcode; 10] = [
        Opcode::DeviceInfo,
        Opcode::DeviceStatus,
        Opcode::Reset,
        Opcode::ReadSettings,
        Opcode::LogCount,
        Opcode::LogHeaderRewind,
        Opcode::LogHeaderPeek,
        Opcode::LogHeaderStep,
        Opcode::LogHeaderEntry,
        Opcode::ReadData,
    ];

    pub const fn request_command(self) -> u16 {
        match self {
            Self::DeviceInfo => 0x0000,
            Self::DeviceStatus => 0x0603,
            Self::Reset => 0x0002,
            Self::ReadSettings => 0x000B,
            Self::LogCount => 0x060B,
            Self::LogHeaderRewind => 0x070B,
            Self::LogHeaderPeek => 0x080B,
            Self::LogHeaderStep => 0x0A0B,
            Self::LogHeaderEntry => 0x0B0B,
            Self::ReadData => 0x0007,
        }
    }

    pub const fn reply_command(self) -> u16 {
        match self {
            Self::DeviceInfo => 0x0200,
            other => other.request_command(),
        }
    }

    pub const fn request_direction(self) -> u16 {
        match self {
            Self::DeviceInfo => DIRECTION_DEVICE_INFO_REQUEST,
            _ => DIRECTION_REQUEST,
        }
    }

    pub const fn reply_direction(self) -> u16 {
        match self {
            Self::DeviceInfo => DIRECTION_DEVICE_INFO_REPLY,
            _ => DIRECTION_REPLY,
        }
    }

    pub const fn request_format(self) -> u16 {
        match self {
            Self::DeviceInfo => FORMAT_DEVICE_INFO,
            _ => FORMAT_DEFAULT,
        }
    }

    pub const fn reply_format(self) -> u16 {
        FORMAT_DEFAULT
    }

    pub fn from_request(command: u16, direction: u16) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|op| op.request_command() == command && op.request_direction() == direction)
    }

    pub fn from_reply(command: u16, direction: u16) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|op| op.reply_command() == command && op.reply_direction() == direction)
    }

    /// Whether `header` is the reply counterpart of this opcode.
    pub fn matches_reply(self, header: &MessageHeader) -> bool {
        header.command == self.reply_command() && header.direction == self.reply_direction()
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::DeviceInfo => "device-info",
            Self::DeviceStatus => "device-status",
            Self::Reset => "reset",
            Self::ReadSettings => "read-settings",
            Self::LogCount => "log-count",
            Self::LogHeaderRewind => "log-header-rewind",
            Self::LogHeaderPeek => "log-header-peek",
            Self::LogHeaderStep => "log-header-step",
            Self::LogHeaderEntry => "log-header-entry",
            Self::ReadData => "read-data",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
