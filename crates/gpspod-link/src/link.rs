use std::time::{Duration, Instant};

use gpspod_frame::{encode_request, packetize, Assembler, Message, Opcode, Packet, Reply, Request};
use gpspod_transport::PacketTransport;
use tracing::{debug, info, trace, warn};

use crate::communicator::Communicator;
use crate::error::{LinkError, Result};

/// Tracing target for mirrored wire traffic.
pub const WIRE_TARGET: &str = "gpspod::wire";

/// Configuration for a [`Link`].
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// How long `read` waits for a complete reply.
    pub timeout: Duration,
    /// Mirror every frame to [`WIRE_TARGET`] at INFO instead of TRACE.
    pub verbose: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    opcode: Opcode,
    sequence: u16,
}

/// The communicator over a packet transport.
///
/// Owns the transport for its whole lifetime; dropping the link releases it.
pub struct Link<T> {
    transport: T,
    config: LinkConfig,
    assembler: Assembler,
    sequence: u16,
    pending: Option<Pending>,
}

macro_rules! wire {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            info!(target: WIRE_TARGET, $($arg)+);
        } else {
            trace!(target: WIRE_TARGET, $($arg)+);
        }
    };
}

impl<T: PacketTransport> Link<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, LinkConfig::default())
    }

    pub fn with_config(transport: T, config: LinkConfig) -> Self {
        Self {
            transport,
            config,
            assembler: Assembler::new(),
            sequence: 0,
            pending: None,
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Sequence number the next request will carry.
    pub fn next_sequence(&self) -> u16 {
        self.sequence
    }

    /// A request was written and its reply not yet read.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn timeout(&mut self) -> LinkError {
        self.assembler.reset();
        LinkError::Timeout(self.config.timeout)
    }
}

impl<T: PacketTransport> Communicator for Link<T> {
    fn write(&mut self, request: &Request) -> Result<()> {
        if self.pending.is_some() {
            return Err(LinkError::OutOfOrder("write while a reply is outstanding"));
        }

        let sequence = self.sequence;
        let message = encode_request(request, sequence);
        let packets = packetize(&message)?;
        wire!(self.config.verbose, seq = sequence, "-> {request}");
        for packet in &packets {
            if let Ok(decoded) = Packet::decode(packet) {
                wire!(self.config.verbose, "-> {decoded}");
            }
            self.transport.send_packet(packet)?;
        }

        self.sequence = self.sequence.wrapping_add(1);
        self.pending = Some(Pending {
            opcode: request.opcode(),
            sequence,
        });
        Ok(())
    }

    fn read(&mut self) -> Result<Reply> {
        let pending = self
            .pending
            .take()
            .ok_or(LinkError::OutOfOrder("read without an outstanding request"))?;

        let deadline = Instant::now() + self.config.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.timeout());
            }
            let Some(raw) = self.transport.recv_packet(remaining)? else {
                debug!(expected = %pending.opcode, "no reply before deadline");
                return Err(self.timeout());
            };

            let assembled = match self.assembler.push_raw(&raw) {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(err) => {
                    wire!(self.config.verbose, "<- damaged packet: {err}");
                    return Err(LinkError::Malformed(err));
                }
            };

            let message = Message::decode(&assembled).map_err(LinkError::Malformed)?;
            if message.header.sequence != pending.sequence {
                warn!(
                    expected = pending.sequence,
                    got = message.header.sequence,
                    "discarding reply to an earlier request"
                );
                continue;
            }

            let reply = Reply::from_message(&message).map_err(LinkError::Malformed)?;
            wire!(
                self.config.verbose,
                seq = message.header.sequence,
                "<- {reply}"
            );
            return Ok(reply);
        }
    }
}

impl<T> std::fmt::Debug for Link<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("config", &self.config)
            .field("sequence", &self.sequence)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}
