//! Client for the GPS Track Pod.
//!
//! The pod is a USB HID device that logs GPS tracks into its flash. This crate
//! ties the layers together:
//!
//! - [`transport`]: 64-byte HID report transport (hidraw on Linux)
//! - [`frame`]: packet framing, CRC, message codec and the opcode catalog
//! - [`link`]: request/reply communicator with recording and replay
//! - [`pmem`]: paged flash reader and the track catalog
//! - [`Session`]: one device (or dump) with its mounted catalog
//! - [`gpx`]: track export

mod session;

pub mod gpx;

pub use session::{Session, SessionConfig};

/// Re-export transport types.
pub mod transport {
    pub use gpspod_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use gpspod_frame::*;
}

/// Re-export link types.
pub mod link {
    pub use gpspod_link::*;
}

/// Re-export flash and catalog types.
pub mod pmem {
    pub use gpspod_pmem::*;
}
