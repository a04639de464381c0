//! Import of Wireshark PDML exports (`tshark -T pdml`) of usbmon captures.
//!
//! A transfer is taken from the completion of each submitted URB: IN data
//! comes from the completion, OUT data from the submission.

use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::debug;

use crate::error::{LinkError, Result};
use crate::record::{decode_hex, Direction, LogEntry, SessionLog};

const URB_SUBMIT: u64 = 0x53;
const URB_COMPLETE: u64 = 0x43;

#[derive(Debug, Default)]
struct UsbPacket {
    urb_id: Option<u64>,
    urb_type: Option<u64>,
    inbound: bool,
    time: Option<f64>,
    data: Option<Vec<u8>>,
}

impl UsbPacket {
    fn field(&mut self, element: &BytesStart<'_>) -> Result<()> {
        let mut name = None;
        let mut show = None;
        let mut value = None;
        for attr in element.attributes() {
            let attr = attr.map_err(xml_error)?;
            let text = attr.unescape_value().map_err(xml_error)?.into_owned();
            match attr.key.as_ref() {
                b"name" => name = Some(text),
                b"show" => show = Some(text),
                b"value" => value = Some(text),
                _ => {}
            }
        }
        let Some(name) = name else {
            return Ok(());
        };
        let raw = value.as_deref().or(show.as_deref());

        match name.as_str() {
            "usb.urb_id" => self.urb_id = raw.and_then(parse_hex_u64),
            "usb.urb_type" => self.urb_type = raw.and_then(parse_hex_u64),
            "usb.endpoint_number.direction" | "usb.endpoint_address.direction" => {
                self.inbound = raw.is_some_and(|v| v.trim() == "1");
            }
            "frame.time_epoch" => {
                self.time = show
                    .as_deref()
                    .and_then(|v| v.split_whitespace().next())
                    .and_then(|v| v.parse().ok());
            }
            "usb.capdata" => {
                self.data = raw.and_then(|v| decode_hex(&v.replace(':', "")));
            }
            _ => {}
        }
        Ok(())
    }
}

#[derive(Default)]
struct Capture {
    log: SessionLog,
    submitted: HashMap<u64, UsbPacket>,
    start: Option<f64>,
}

impl Capture {
    fn packet(&mut self, packet: UsbPacket) {
        let Some(urb_id) = packet.urb_id else {
            return;
        };
        match packet.urb_type {
            Some(URB_SUBMIT) => {
                self.submitted.insert(urb_id, packet);
            }
            Some(URB_COMPLETE) => {
                let Some(submit) = self.submitted.remove(&urb_id) else {
                    debug!(urb_id = format_args!("{urb_id:x}"), "completion without submission");
                    return;
                };
                let (direction, transfer) = if packet.inbound {
                    (Direction::In, packet)
                } else {
                    (Direction::Out, submit)
                };
                let Some(data) = transfer.data else {
                    return;
                };
                let time = transfer.time.unwrap_or(0.0);
                let start = *self.start.get_or_insert(time);
                self.log.entries.push(LogEntry {
                    direction,
                    time: time - start,
                    data,
                });
            }
            _ => {}
        }
    }
}

fn parse_hex_u64(text: &str) -> Option<u64> {
    let text = text.trim();
    u64::from_str_radix(text.strip_prefix("0x").unwrap_or(text), 16).ok()
}

fn xml_error(err: impl std::fmt::Display) -> LinkError {
    LinkError::SessionLog(format!("pdml: {err}"))
}

/// Transfers with payload data, in the order they completed.
pub fn parse(text: &str) -> Result<SessionLog> {
    let mut reader = Reader::from_str(text);
    let mut capture = Capture::default();
    let mut current: Option<UsbPacket> = None;

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(element) | Event::Empty(element) => match element.name().as_ref() {
                b"packet" => current = Some(UsbPacket::default()),
                b"field" => {
                    if let Some(packet) = current.as_mut() {
                        packet.field(&element)?;
                    }
                }
                _ => {}
            },
            Event::End(element) if element.name().as_ref() == b"packet" => {
                if let Some(packet) = current.take() {
                    capture.packet(packet);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    debug!(entries = capture.log.entries.len(), "pdml capture imported");
    Ok(capture.log)
}
