/// Errors that can occur while encoding or decoding pod traffic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// A packet header or data checksum did not validate.
    #[error("{part} checksum mismatch (expected {expected:#06x}, got {actual:#06x})")]
    Checksum {
        part: &'static str,
        expected: u16,
        actual: u16,
    },

    /// Fewer bytes were present than the declared length requires.
    #[error("short frame (expected {expected} bytes, got {actual})")]
    ShortFrame { expected: usize, actual: usize },

    /// The `(command, direction)` pair is not in the opcode catalog.
    #[error("unknown opcode (command {command:#06x}, direction {direction:#06x})")]
    UnknownOpcode { command: u16, direction: u16 },

    /// The packet did not start with the `0x3F` magic byte.
    #[error("invalid packet magic {found:#04x} (expected 0x3f)")]
    InvalidMagic { found: u8 },

    /// The packet sequence could not be reassembled into one message.
    #[error("invalid message fragment: {0}")]
    Fragment(&'static str),

    /// The message or packet data exceeds the protocol maximum.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
