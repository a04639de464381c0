use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use crate::error::{FrameError, Result};
use crate::packet::{Packet, Part};

/// Reassembles USB packets into complete messages.
///
/// Continuation parts may arrive in any order; they are joined by index.
/// Continuation parts with no message in progress are dropped, which lets a
/// reader resynchronize after a corrupted reply.
#[derive(Debug, Default)]
pub struct Assembler {
    first: Option<(u16, Bytes)>,
    parts: Vec<(u16, Bytes)>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// No message is partially assembled.
    pub fn is_idle(&self) -> bool {
        self.first.is_none()
    }

    /// Drop any partially assembled message.
    pub fn reset(&mut self) {
        self.first = None;
        self.parts.clear();
    }

    /// Decode one raw packet and feed it.
    pub fn push_raw(&mut self, raw: &[u8]) -> Result<Option<Bytes>> {
        match Packet::decode(raw) {
            Ok(packet) => self.push(packet),
            Err(err) => {
                self.reset();
                Err(err)
            }
        }
    }

    /// Feed one packet; returns the message once every part has arrived.
    pub fn push(&mut self, packet: Packet) -> Result<Option<Bytes>> {
        match packet.part() {
            Part::First => {
                if !self.is_idle() {
                    warn!("new message started before the previous one completed");
                    self.reset();
                }
                let count = packet.sequence();
                if count == 0 {
                    return Err(FrameError::Fragment("first part announces zero packets"));
                }
                self.first = Some((count, packet.into_data()));
            }
            Part::Next => {
                let Some(count) = self.first.as_ref().map(|(count, _)| *count) else {
                    debug!(index = packet.sequence(), "dropping orphan continuation part");
                    return Ok(None);
                };
                let index = packet.sequence();
                if index == 0 || index >= count {
                    self.reset();
                    return Err(FrameError::Fragment("part index out of range"));
                }
                if self.parts.iter().any(|(i, _)| *i == index) {
                    self.reset();
                    return Err(FrameError::Fragment("duplicate part"));
                }
                self.parts.push((index, packet.into_data()));
            }
        }
        Ok(self.try_complete())
    }

    fn try_complete(&mut self) -> Option<Bytes> {
        let (count, _) = self.first.as_ref()?;
        if self.parts.len() + 1 != *count as usize {
            return None;
        }
        let (_, first) = self.first.take()?;
        self.parts.sort_by_key(|(index, _)| *index);

        let total = first.len() + self.parts.iter().map(|(_, d)| d.len()).sum::<usize>();
        let mut message = BytesMut::with_capacity(total);
        message.extend_from_slice(&first);
        for (_, data) in self.parts.drain(..) {
            message.extend_from_slice(&data);
        }
        Some(message.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::packetize;

    fn message(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn single_packet_message() {
        let mut assembler = Assembler::new();
        let packets = packetize(&message(20)).unwrap();
        let out = assembler.push_raw(&packets[0]).unwrap().unwrap();
        assert_eq!(out.as_ref(), message(20).as_slice());
        assert!(assembler.is_idle());
    }

    #[test]
    fn multi_packet_message() {
        let mut assembler = Assembler::new();
        let packets = packetize(&message(532)).unwrap();
        assert_eq!(packets.len(), 10);

        let (last, rest) = packets.split_last().unwrap();
        for packet in rest {
            assert!(assembler.push_raw(packet).unwrap().is_none());
        }
        let out = assembler.push_raw(last).unwrap().unwrap();
        assert_eq!(out.as_ref(), message(532).as_slice());
    }

    #[test]
    fn continuation_parts_are_sorted() {
        let mut assembler = Assembler::new();
        let packets = packetize(&message(150)).unwrap();
        assert!(assembler.push_raw(&packets[0]).unwrap().is_none());
        assert!(assembler.push_raw(&packets[2]).unwrap().is_none());
        let out = assembler.push_raw(&packets[1]).unwrap().unwrap();
        assert_eq!(out.as_ref(), message(150).as_slice());
    }

    #[test]
    fn orphan_parts_are_dropped() {
        let mut assembler = Assembler::new();
        let stale = packetize(&message(100)).unwrap();
        assert!(assembler.push_raw(&stale[1]).unwrap().is_none());
        assert!(assembler.is_idle());

        let fresh = packetize(&message(10)).unwrap();
        assert!(assembler.push_raw(&fresh[0]).unwrap().is_some());
    }

    #[test]
    fn new_first_part_restarts() {
        let mut assembler = Assembler::new();
        let abandoned = packetize(&message(100)).unwrap();
        assembler.push_raw(&abandoned[0]).unwrap();

        let fresh = packetize(&message(30)).unwrap();
        let out = assembler.push_raw(&fresh[0]).unwrap().unwrap();
        assert_eq!(out.len(), 30);
    }

    #[test]
    fn duplicate_part_is_rejected() {
        let mut assembler = Assembler::new();
        let packets = packetize(&message(150)).unwrap();
        assembler.push_raw(&packets[0]).unwrap();
        assembler.push_raw(&packets[1]).unwrap();
        let err = assembler.push_raw(&packets[1]).unwrap_err();
        assert_eq!(err, FrameError::Fragment("duplicate part"));
        assert!(assembler.is_idle());
    }

    #[test]
    fn corrupt_packet_resets_progress() {
        let mut assembler = Assembler::new();
        let packets = packetize(&message(100)).unwrap();
        assembler.push_raw(&packets[0]).unwrap();

        let mut broken = packets[1].to_vec();
        broken[12] ^= 0x55;
        assert!(matches!(
            assembler.push_raw(&broken),
            Err(FrameError::Checksum { .. })
        ));
        assert!(assembler.is_idle());
    }
}
