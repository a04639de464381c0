//! Wire codec for the GPS Track Pod.
//!
//! Every message travels as one or more USB packets:
//! - an 8-byte packet header with its own CRC-16
//! - up to 54 bytes of message data, followed by a data CRC-16
//!
//! Reassembled messages start with a 12-byte command header (command,
//! direction, format, sequence, length). The opcode catalog is closed:
//! requests outside it are rejected and replies outside it decode to
//! [`Reply::Raw`].

pub mod assembler;
pub mod codec;
pub mod crc;
pub mod error;
pub mod message;
pub mod opcode;
pub mod packet;
pub mod reply;
pub mod request;

pub use assembler::Assembler;
pub use codec::{decode_reply, decode_request, encode_reply, encode_request, packetize};
pub use error::{FrameError, Result};
pub use message::{Message, MessageHeader, MAX_MESSAGE_SIZE, MESSAGE_HEADER_SIZE};
pub use opcode::Opcode;
pub use packet::{Packet, Part, MAX_PART_DATA, PACKET_MAGIC};
pub use reply::{
    DataBlock, DeviceInfo, DeviceStatus, HeaderStep, LogHeaderEntry, RawMessage, Reply, Settings,
    Version,
};
pub use request::{Request, DATA_BLOCK_SIZE};
