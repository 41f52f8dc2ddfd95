//! Tagged, length prefixed control channel messages
//!
//! Every message is a `u32` little endian body length followed by the body,
//! the first body byte is a tag identifying the message.
//!
//! | Message                  | Tag  | Payload                                  |
//! |--------------------------|------|------------------------------------------|
//! | `PhyRequest::Tail`       | 0x01 | kind byte                                |
//! | `PhyRequest::Pkt`        | 0x02 | encoding u8, timestamp µs u64, frame     |
//! | `PhyRequest::Cca`        | 0x03 |                                          |
//! | `PhyResponse::Yes`       | 0x10 | frame (or node id / sample rate)         |
//! | `PhyResponse::No`        | 0x11 |                                          |
//! | `PhyResponse::Cca`       | 0x12 | f32 power in dBW                         |
//! | `UpperRequest::NoPacket` | 0x20 |                                          |
//! | `UpperRequest::Remove`   | 0x21 |                                          |
//! | `UpperRequest::Copy`     | 0x22 | payload                                  |
//! | `UpperRequest::Payload`  | 0x23 | payload                                  |
//! | `UpperRequest::Beacon`   | 0x24 | payload                                  |
//! | `UpperResponse::Yes`     | 0x30 | payload                                  |
//! | `UpperResponse::Beacon`  | 0x31 |                                          |
//! | `UpperResponse::No`      | 0x32 |                                          |

use core::convert::TryFrom;
use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::{Buf, BufMut, BytesMut};

use crate::error::LinkError;
use super::TailKind;

/// Largest accepted message body
pub const MAX_BODY_LEN: usize = 64 * 1024;

const TAG_TAIL: u8 = 0x01;
const TAG_PKT: u8 = 0x02;
const TAG_CCA: u8 = 0x03;

const TAG_PHY_YES: u8 = 0x10;
const TAG_PHY_NO: u8 = 0x11;
const TAG_PHY_CCA: u8 = 0x12;

const TAG_NO_PACKET: u8 = 0x20;
const TAG_REMOVE: u8 = 0x21;
const TAG_COPY: u8 = 0x22;
const TAG_PAYLOAD: u8 = 0x23;
const TAG_BEACON: u8 = 0x24;

const TAG_UPPER_YES: u8 = 0x30;
const TAG_UPPER_BEACON: u8 = 0x31;
const TAG_UPPER_NO: u8 = 0x32;

/// Requests from the MAC to the PHY
#[derive(Debug, Clone, PartialEq)]
pub enum PhyRequest {
    Tail(TailKind),
    Pkt {
        encoding: u8,
        timestamp_us: u64,
        frame: Vec<u8>,
    },
    Cca,
}

/// PHY responses
#[derive(Debug, Clone, PartialEq)]
pub enum PhyResponse {
    Yes(Vec<u8>),
    No,
    Cca(f32),
}

/// Requests to the upper layer buffer
#[derive(Debug, Clone, PartialEq)]
pub enum UpperRequest {
    /// Peek the transmit queue
    NoPacket,
    /// Pop the transmit queue
    Remove,
    /// Push to the receive queue
    Copy(Vec<u8>),
    /// Push to the transmit queue
    Payload(Vec<u8>),
    /// Push a beacon marker to the transmit queue
    Beacon(Vec<u8>),
}

/// Upper layer buffer responses
#[derive(Debug, Clone, PartialEq)]
pub enum UpperResponse {
    Yes(Vec<u8>),
    Beacon,
    No,
}

/// A control channel message
pub trait Message: Sized {
    /// Write the message body (tag and payload)
    fn encode_body(&self, buf: &mut BytesMut);

    /// Parse a message body
    fn decode_body(body: &[u8]) -> Result<Self, LinkError>;
}

impl Message for PhyRequest {
    fn encode_body(&self, buf: &mut BytesMut) {
        match self {
            PhyRequest::Tail(k) => {
                buf.put_u8(TAG_TAIL);
                buf.put_u8((*k).into());
            },
            PhyRequest::Pkt{ encoding, timestamp_us, frame } => {
                buf.put_u8(TAG_PKT);
                buf.put_u8(*encoding);
                buf.put_u64_le(*timestamp_us);
                buf.put_slice(frame);
            },
            PhyRequest::Cca => buf.put_u8(TAG_CCA),
        }
    }

    fn decode_body(body: &[u8]) -> Result<Self, LinkError> {
        let (tag, mut rest) = split_tag(body)?;
        match tag {
            TAG_TAIL if rest.len() == 1 => Ok(PhyRequest::Tail(TailKind::try_from(rest[0])?)),
            TAG_PKT if rest.len() >= 9 => {
                let encoding = rest.get_u8();
                let timestamp_us = rest.get_u64_le();
                Ok(PhyRequest::Pkt{ encoding, timestamp_us, frame: rest.to_vec() })
            },
            TAG_CCA => Ok(PhyRequest::Cca),
            _ => Err(LinkError::Protocol),
        }
    }
}

impl Message for PhyResponse {
    fn encode_body(&self, buf: &mut BytesMut) {
        match self {
            PhyResponse::Yes(d) => {
                buf.put_u8(TAG_PHY_YES);
                buf.put_slice(d);
            },
            PhyResponse::No => buf.put_u8(TAG_PHY_NO),
            PhyResponse::Cca(p) => {
                buf.put_u8(TAG_PHY_CCA);
                buf.put_f32_le(*p);
            },
        }
    }

    fn decode_body(body: &[u8]) -> Result<Self, LinkError> {
        let (tag, mut rest) = split_tag(body)?;
        match tag {
            TAG_PHY_YES => Ok(PhyResponse::Yes(rest.to_vec())),
            TAG_PHY_NO => Ok(PhyResponse::No),
            TAG_PHY_CCA if rest.len() == 4 => Ok(PhyResponse::Cca(rest.get_f32_le())),
            _ => Err(LinkError::Protocol),
        }
    }
}

impl Message for UpperRequest {
    fn encode_body(&self, buf: &mut BytesMut) {
        match self {
            UpperRequest::NoPacket => buf.put_u8(TAG_NO_PACKET),
            UpperRequest::Remove => buf.put_u8(TAG_REMOVE),
            UpperRequest::Copy(p) => {
                buf.put_u8(TAG_COPY);
                buf.put_slice(p);
            },
            UpperRequest::Payload(p) => {
                buf.put_u8(TAG_PAYLOAD);
                buf.put_slice(p);
            },
            UpperRequest::Beacon(p) => {
                buf.put_u8(TAG_BEACON);
                buf.put_slice(p);
            },
        }
    }

    fn decode_body(body: &[u8]) -> Result<Self, LinkError> {
        let (tag, rest) = split_tag(body)?;
        match tag {
            TAG_NO_PACKET => Ok(UpperRequest::NoPacket),
            TAG_REMOVE => Ok(UpperRequest::Remove),
            TAG_COPY => Ok(UpperRequest::Copy(rest.to_vec())),
            TAG_PAYLOAD => Ok(UpperRequest::Payload(rest.to_vec())),
            TAG_BEACON => Ok(UpperRequest::Beacon(rest.to_vec())),
            _ => Err(LinkError::Protocol),
        }
    }
}

impl Message for UpperResponse {
    fn encode_body(&self, buf: &mut BytesMut) {
        match self {
            UpperResponse::Yes(p) => {
                buf.put_u8(TAG_UPPER_YES);
                buf.put_slice(p);
            },
            UpperResponse::Beacon => buf.put_u8(TAG_UPPER_BEACON),
            UpperResponse::No => buf.put_u8(TAG_UPPER_NO),
        }
    }

    fn decode_body(body: &[u8]) -> Result<Self, LinkError> {
        let (tag, rest) = split_tag(body)?;
        match tag {
            TAG_UPPER_YES => Ok(UpperResponse::Yes(rest.to_vec())),
            TAG_UPPER_BEACON => Ok(UpperResponse::Beacon),
            TAG_UPPER_NO => Ok(UpperResponse::No),
            _ => Err(LinkError::Protocol),
        }
    }
}

fn split_tag(body: &[u8]) -> Result<(u8, &[u8]), LinkError> {
    match body.split_first() {
        Some((t, rest)) => Ok((*t, rest)),
        None => Err(LinkError::Protocol),
    }
}

/// Write a length prefixed message
pub fn write_message<W: Write, M: Message>(w: &mut W, m: &M) -> Result<(), LinkError> {
    let mut buf = BytesMut::new();
    m.encode_body(&mut buf);
    write_frame(w, &buf)
}

/// Read a length prefixed message
pub fn read_message<R: Read, M: Message>(r: &mut R) -> Result<M, LinkError> {
    let body = read_frame(r)?;
    M::decode_body(&body)
}

/// Write a length prefixed byte string
pub fn write_frame<W: Write>(w: &mut W, data: &[u8]) -> Result<(), LinkError> {
    if data.len() > MAX_BODY_LEN {
        return Err(LinkError::Protocol);
    }
    w.write_u32::<LittleEndian>(data.len() as u32)?;
    w.write_all(data)?;
    w.flush()?;
    Ok(())
}

/// Read a length prefixed byte string
pub fn read_frame<R: Read>(r: &mut R) -> Result<Vec<u8>, LinkError> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    if len > MAX_BODY_LEN {
        return Err(LinkError::Protocol);
    }

    let mut body = vec![0u8; len];
    r.read_exact(&mut body)?;
    Ok(body)
}
