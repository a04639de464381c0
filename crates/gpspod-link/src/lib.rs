//! Request/reply communication with the GPS Track Pod.
//!
//! [`Link`] drives one strictly alternating exchange at a time over any
//! [`PacketTransport`](gpspod_transport::PacketTransport). Swapping the
//! transport selects the backend:
//! - live: `Link<HidrawDevice>`
//! - recording: `Link<Recorder<T>>`
//! - offline: `Link<Replayer>`
//!
//! [`sim::SimulatedPod`] answers the full opcode catalog in-process.

pub mod communicator;
pub mod error;
pub mod link;
pub mod pdml;
pub mod record;
pub mod retry;
pub mod sim;

pub use communicator::Communicator;
pub use error::{LinkError, Result};
pub use link::{Link, LinkConfig, WIRE_TARGET};
pub use record::{Direction, LogEntry, Recorder, Replayer, SessionLog, COMPRESSED_EXTENSION};
pub use retry::{retry, Attempt, RetryBudget, RetryError, RetryPolicy};
