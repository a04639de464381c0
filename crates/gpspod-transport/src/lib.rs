//! Packet transport for the GPS Track Pod.
//!
//! The pod talks over fixed-size 64-byte HID reports. This crate provides:
//! - the [`PacketTransport`] trait every higher layer is written against
//! - a live Linux backend over `/dev/hidrawN` ([`HidrawDevice`])
//!
//! This is the lowest layer of gpspod. Recording and replaying transports
//! live in `gpspod-link`.

pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod hidraw;

pub use error::{Result, TransportError};
pub use traits::{PacketTransport, REPORT_SIZE};

#[cfg(unix)]
pub use hidraw::HidrawDevice;
