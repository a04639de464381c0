use std::time::Duration;

use bytes::Bytes;

use crate::error::Result;

/// Size of one HID report exchanged with the pod.
pub const REPORT_SIZE: usize = 64;

/// A duplex channel of whole HID reports.
///
/// Implementations never split or merge packets: one `send_packet` is one
/// report on the wire, one `recv_packet` yields one report.
pub trait PacketTransport {
    /// Send one packet. Packets shorter than [`REPORT_SIZE`] are zero padded
    /// by the backend where the medium requires it.
    fn send_packet(&mut self, packet: &[u8]) -> Result<()>;

    /// Wait up to `timeout` for the next packet.
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    fn recv_packet(&mut self, timeout: Duration) -> Result<Option<Bytes>>;
}

impl<T: PacketTransport + ?Sized> PacketTransport for &mut T {
    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        (**self).send_packet(packet)
    }

    fn recv_packet(&mut self, timeout: Duration) -> Result<Option<Bytes>> {
        (**self).recv_packet(timeout)
    }
}

impl<T: PacketTransport + ?Sized> PacketTransport for Box<T> {
    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        (**self).send_packet(packet)
    }

    fn recv_packet(&mut self, timeout: Duration) -> Result<Option<Bytes>> {
        (**self).recv_packet(timeout)
    }
}
