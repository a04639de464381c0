use bytes::Bytes;

use crate::error::Result;
use crate::message::Message;
use crate::reply::Reply;
use crate::request::Request;

pub use crate::packet::packetize;

/// Encode a request into message bytes. Encoding is deterministic.
pub fn encode_request(request: &Request, sequence: u16) -> Bytes {
    request.to_message(sequence).to_bytes()
}

/// Encode a reply into message bytes, as a device would send it.
pub fn encode_reply(reply: &Reply, sequence: u16) -> Bytes {
    reply.to_message(sequence).to_bytes()
}

/// Decode a reassembled reply message.
pub fn decode_reply(message: &[u8]) -> Result<Reply> {
    Reply::from_message(&Message::decode(message)?)
}

/// Decode a reassembled request message; requests outside the catalog are rejected.
pub fn decode_request(message: &[u8]) -> Result<Request> {
    Request::from_message(&Message::decode(message)?)
}
