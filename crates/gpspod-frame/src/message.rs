use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// command (2) + direction (2) + format (2) + sequence (2) + length (4).
pub const MESSAGE_HEADER_SIZE: usize = 12;

/// Largest reassembled message the pod exchanges.
pub const MAX_MESSAGE_SIZE: usize = 540;

/// The 12-byte command header at the start of every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub command: u16,
    pub direction: u16,
    pub format: u16,
    /// Request counter; replies echo the sequence of their request.
    pub sequence: u16,
    /// Declared payload length.
    pub length: u32,
}

impl fmt::Display for MessageHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cmd {:#06x}, dir {:#06x}, fmt {:#04x}, seq {}, len {}",
            self.command, self.direction, self.format, self.sequence, self.length
        )
    }
}

/// A complete message: header plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: MessageHeader,
    pub payload: Bytes,
}

impl Message {
    pub fn new(
        command: u16,
        direction: u16,
        format: u16,
        sequence: u16,
        payload: impl Into<Bytes>,
    ) -> Self {
        let payload = payload.into();
        Self {
            header: MessageHeader {
                command,
                direction,
                format,
                sequence,
                length: payload.len() as u32,
            },
            payload,
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(MESSAGE_HEADER_SIZE + self.payload.len());
        buf.put_u16_le(self.header.command);
        buf.put_u16_le(self.header.direction);
        buf.put_u16_le(self.header.format);
        buf.put_u16_le(self.header.sequence);
        buf.put_u32_le(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Parse a reassembled message. The declared length must match exactly.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MESSAGE_HEADER_SIZE {
            return Err(FrameError::ShortFrame {
                expected: MESSAGE_HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        let u16_at = |i: usize| u16::from_le_bytes([bytes[i], bytes[i + 1]]);
        let header = MessageHeader {
            command: u16_at(0),
            direction: u16_at(2),
            format: u16_at(4),
            sequence: u16_at(6),
            length: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        };

        let expected = MESSAGE_HEADER_SIZE + header.length as usize;
        if bytes.len() != expected {
            return Err(FrameError::ShortFrame {
                expected,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            header,
            payload: Bytes::copy_from_slice(&bytes[MESSAGE_HEADER_SIZE..]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let msg = Message::new(0x0007, 0x0005, 0x0009, 3, vec![0xAA; 8]);
        let bytes = msg.to_bytes();
        assert_eq!(
            &bytes[..MESSAGE_HEADER_SIZE],
            &[0x07, 0x00, 0x05, 0x00, 0x09, 0x00, 0x03, 0x00, 0x08, 0x00, 0x00, 0x00]
        );
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn declared_length_must_match() {
        let mut bytes = Message::new(0x0603, 0x000A, 0x0009, 1, vec![0, 55, 0, 0])
            .to_bytes()
            .to_vec();
        bytes.pop();
        assert_eq!(
            Message::decode(&bytes).unwrap_err(),
            FrameError::ShortFrame {
                expected: 16,
                actual: 15
            }
        );

        bytes.extend_from_slice(&[0, 0]);
        assert!(Message::decode(&bytes).is_err());
    }

    #[test]
    fn truncated_header() {
        assert!(matches!(
            Message::decode(&[0x00, 0x02]),
            Err(FrameError::ShortFrame { expected: 12, actual: 2 })
        ));
    }
}
