//! In-process stand-in for a pod, used by tests and demos.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use gpspod_frame::{
    packetize, Assembler, DataBlock, DeviceInfo, DeviceStatus, HeaderStep, LogHeaderEntry, Message,
    Reply, Request, Settings, Version, DATA_BLOCK_SIZE,
};
use gpspod_transport::{PacketTransport, TransportError};
use tracing::debug;

/// Misbehaviour applied to the next reply, in the order queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Answer with a device status reply instead.
    WrongReply,
    /// Flip a data byte so the first packet fails its checksum.
    Corrupt,
    /// Answer a data request with the block after the one asked for.
    Misplaced,
    /// Send nothing.
    Silent,
}

/// A simulated pod serving flash contents from memory.
#[derive(Debug)]
pub struct SimulatedPod {
    image: Vec<u8>,
    info: DeviceInfo,
    charge: u8,
    settings: Bytes,
    log_headers: Vec<LogHeaderEntry>,
    header_cursor: usize,
    assembler: Assembler,
    outbox: VecDeque<Bytes>,
    faults: VecDeque<Fault>,
    requests: Vec<Request>,
}

impl SimulatedPod {
    pub fn new(image: Vec<u8>) -> Self {
        let mut settings = vec![0u8; 70];
        settings[26] = 1;
        Self {
            image,
            info: DeviceInfo {
                model: "GpsPod".to_string(),
                serial: "8761994617001000".to_string(),
                fw_version: Version([1, 6, 39, 0]),
                hw_version: Version([66, 2, 0, 0]),
                bsl_version: Version([1, 4, 3, 0]),
                extra: Bytes::from_static(&[0, 2, 0, 0]),
            },
            charge: 100,
            settings: Bytes::from(settings),
            log_headers: Vec::new(),
            header_cursor: 0,
            assembler: Assembler::new(),
            outbox: VecDeque::new(),
            faults: VecDeque::new(),
            requests: Vec::new(),
        }
    }

    pub fn with_log_headers(mut self, headers: Vec<LogHeaderEntry>) -> Self {
        self.log_headers = headers;
        self
    }

    pub fn push_fault(&mut self, fault: Fault) {
        self.faults.push_back(fault);
    }

    /// Every request received, in order.
    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    /// Offsets of every data request received, in order.
    pub fn data_requests(&self) -> Vec<u32> {
        self.requests
            .iter()
            .filter_map(|r| match r {
                Request::ReadData { offset } => Some(*offset),
                _ => None,
            })
            .collect()
    }

    fn block(&self, position: u32) -> Bytes {
        let start = position as usize;
        let mut data = vec![0u8; DATA_BLOCK_SIZE as usize];
        if start < self.image.len() {
            let end = (start + data.len()).min(self.image.len());
            data[..end - start].copy_from_slice(&self.image[start..end]);
        }
        Bytes::from(data)
    }

    fn reply_to(&mut self, request: &Request) -> Reply {
        match request {
            Request::DeviceInfo => Reply::DeviceInfo(self.info.clone()),
            Request::DeviceStatus => Reply::DeviceStatus(DeviceStatus {
                charge: self.charge,
            }),
            Request::Reset => Reply::Reset,
            Request::ReadSettings => Reply::Settings(Settings {
                raw: self.settings.clone(),
            }),
            Request::LogCount => Reply::LogCount(self.log_headers.len() as u16),
            Request::LogHeaderRewind => {
                self.header_cursor = 0;
                Reply::LogHeaderRewind(HeaderStep { step: 0 })
            }
            Request::LogHeaderStep => Reply::LogHeaderStep(HeaderStep { step: 0x0200 }),
            Request::LogHeaderEntry => Reply::LogHeaderEntry(
                self.log_headers
                    .get(self.header_cursor)
                    .cloned()
                    .unwrap_or(LogHeaderEntry {
                        kind: 0,
                        header_part: 0,
                        data: Bytes::new(),
                    }),
            ),
            Request::LogHeaderPeek => {
                let step = if self.header_cursor + 1 < self.log_headers.len() {
                    self.header_cursor += 1;
                    HeaderStep::MORE
                } else {
                    HeaderStep::END
                };
                Reply::LogHeaderPeek(HeaderStep { step })
            }
            Request::ReadData { offset } => Reply::Data(DataBlock {
                position: *offset,
                data: self.block(*offset),
            }),
        }
    }

    fn respond(&mut self, message: &[u8]) -> gpspod_transport::Result<()> {
        let message = Message::decode(message).map_err(invalid)?;
        let sequence = message.header.sequence;
        let request = Request::from_message(&message).map_err(invalid)?;
        self.requests.push(request);

        let mut reply = self.reply_to(&request);
        let fault = self.faults.pop_front();
        match fault {
            Some(Fault::Silent) => {
                debug!(%request, "simulated pod stays silent");
                return Ok(());
            }
            Some(Fault::WrongReply) => {
                reply = Reply::DeviceStatus(DeviceStatus {
                    charge: self.charge,
                });
            }
            Some(Fault::Misplaced) => {
                if let Reply::Data(block) = &mut reply {
                    block.position = block.position.wrapping_add(DATA_BLOCK_SIZE);
                }
            }
            Some(Fault::Corrupt) | None => {}
        }

        let encoded = reply.to_message(sequence).to_bytes();
        let mut packets = packetize(&encoded).map_err(invalid)?;
        if let (Some(Fault::Corrupt), Some(first)) = (fault, packets.first_mut()) {
            let mut damaged = first.to_vec();
            let last = damaged.len() - 3;
            damaged[last] ^= 0xFF;
            *first = Bytes::from(damaged);
        }
        self.outbox.extend(packets);
        Ok(())
    }
}

fn invalid(err: gpspod_frame::FrameError) -> TransportError {
    TransportError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, err))
}

impl PacketTransport for SimulatedPod {
    fn send_packet(&mut self, packet: &[u8]) -> gpspod_transport::Result<()> {
        match self.assembler.push_raw(packet).map_err(invalid)? {
            Some(message) => self.respond(&message),
            None => Ok(()),
        }
    }

    fn recv_packet(&mut self, _timeout: Duration) -> gpspod_transport::Result<Option<Bytes>> {
        Ok(self.outbox.pop_front())
    }
}
