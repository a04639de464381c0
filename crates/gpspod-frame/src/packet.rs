use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::crc::{crc16, crc16_with};
use crate::error::{FrameError, Result};
use crate::message::MAX_MESSAGE_SIZE;

/// First byte of every USB packet (also the HID report id).
pub const PACKET_MAGIC: u8 = 0x3F;

/// magic (1) + usb length (1) + part (1) + data length (1) + sequence (2) + header crc (2).
pub const PACKET_HEADER_SIZE: usize = 8;

/// Trailing data checksum.
pub const PACKET_CRC_SIZE: usize = 2;

/// Maximum message bytes carried by one packet.
pub const MAX_PART_DATA: usize = 54;

/// Position of a packet within its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Part {
    /// First packet; its sequence field holds the total packet count.
    First,
    /// Continuation packet; its sequence field holds its index.
    Next,
}

impl Part {
    pub const FIRST_BYTE: u8 = 0x5D;
    pub const NEXT_BYTE: u8 = 0x5E;

    pub fn to_byte(self) -> u8 {
        match self {
            Self::First => Self::FIRST_BYTE,
            Self::Next => Self::NEXT_BYTE,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            Self::FIRST_BYTE => Some(Self::First),
            Self::NEXT_BYTE => Some(Self::Next),
            _ => None,
        }
    }
}

/// One validated USB packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    part: Part,
    sequence: u16,
    data: Bytes,
}

impl Packet {
    pub fn new(part: Part, sequence: u16, data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        if data.len() > MAX_PART_DATA {
            return Err(FrameError::PayloadTooLarge {
                size: data.len(),
                max: MAX_PART_DATA,
            });
        }
        Ok(Self {
            part,
            sequence,
            data,
        })
    }

    pub fn part(&self) -> Part {
        self.part
    }

    /// Packet count for [`Part::First`], part index for [`Part::Next`].
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// Exact wire size; the transport pads to a full report.
    pub fn wire_size(&self) -> usize {
        PACKET_HEADER_SIZE + self.data.len() + PACKET_CRC_SIZE
    }

    /// Encode into wire bytes.
    ///
    /// ```text
    /// ┌───────┬─────────┬──────┬─────────┬──────────┬────────────┬──────────┬──────────┐
    /// │ 0x3F  │ len + 8 │ part │ len     │ sequence │ header crc │ data     │ data crc │
    /// │ (1B)  │ (1B)    │ (1B) │ (1B)    │ (2B LE)  │ (2B LE)    │ (len B)  │ (2B LE)  │
    /// └───────┴─────────┴──────┴─────────┴──────────┴────────────┴──────────┴──────────┘
    /// ```
    ///
    /// The header crc covers part, length and sequence; the data crc is seeded
    /// with the header crc.
    pub fn encode(&self) -> Bytes {
        let len = self.data.len() as u8;
        let mut buf = BytesMut::with_capacity(self.wire_size());
        buf.put_u8(PACKET_MAGIC);
        buf.put_u8(len + PACKET_HEADER_SIZE as u8);
        buf.put_u8(self.part.to_byte());
        buf.put_u8(len);
        buf.put_u16_le(self.sequence);
        let header_crc = crc16(&buf[2..6]);
        buf.put_u16_le(header_crc);
        buf.put_slice(&self.data);
        buf.put_u16_le(crc16_with(header_crc, &self.data));
        buf.freeze()
    }

    /// Decode and validate one packet. Trailing report padding is ignored.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() < PACKET_HEADER_SIZE {
            return Err(FrameError::ShortFrame {
                expected: PACKET_HEADER_SIZE,
                actual: raw.len(),
            });
        }
        if raw[0] != PACKET_MAGIC {
            return Err(FrameError::InvalidMagic { found: raw[0] });
        }

        let declared = u16::from_le_bytes([raw[6], raw[7]]);
        let computed = crc16(&raw[2..6]);
        if declared != computed {
            return Err(FrameError::Checksum {
                part: "header",
                expected: computed,
                actual: declared,
            });
        }

        let data_len = raw[3] as usize;
        if raw[1] as usize != data_len + PACKET_HEADER_SIZE {
            return Err(FrameError::Fragment("usb length does not match data length"));
        }
        if data_len > MAX_PART_DATA {
            return Err(FrameError::PayloadTooLarge {
                size: data_len,
                max: MAX_PART_DATA,
            });
        }
        let part =
            Part::from_byte(raw[2]).ok_or(FrameError::Fragment("unknown message part marker"))?;

        let end = PACKET_HEADER_SIZE + data_len;
        if raw.len() < end + PACKET_CRC_SIZE {
            return Err(FrameError::ShortFrame {
                expected: end + PACKET_CRC_SIZE,
                actual: raw.len(),
            });
        }
        let data = &raw[PACKET_HEADER_SIZE..end];
        let declared = u16::from_le_bytes([raw[end], raw[end + 1]]);
        let computed = crc16_with(computed, data);
        if declared != computed {
            return Err(FrameError::Checksum {
                part: "data",
                expected: computed,
                actual: declared,
            });
        }

        Ok(Self {
            part,
            sequence: u16::from_le_bytes([raw[4], raw[5]]),
            data: Bytes::copy_from_slice(data),
        })
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.part {
            Part::First => "start",
            Part::Next => "part",
        };
        write!(f, "{label}({}) len: {:>3}", self.sequence, self.data.len())
    }
}

/// Split a message into wire-encoded USB packets.
pub fn packetize(message: &[u8]) -> Result<Vec<Bytes>> {
    if message.is_empty() {
        return Err(FrameError::Fragment("empty message"));
    }
    if message.len() > MAX_MESSAGE_SIZE {
        return Err(FrameError::PayloadTooLarge {
            size: message.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    let chunks: Vec<&[u8]> = message.chunks(MAX_PART_DATA).collect();
    let count = chunks.len() as u16;
    chunks
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| {
            let (part, sequence) = if index == 0 {
                (Part::First, count)
            } else {
                (Part::Next, index as u16)
            };
            Packet::new(part, sequence, Bytes::copy_from_slice(chunk)).map(|p| p.encode())
        })
        .collect()
}
