//! ## AMF packet framing
//!
//! An AMF packet is a u16 version, a counted list of headers and a
//! counted list of bodies. Headers and bodies carry u16-length UTF-8
//! names/URIs, an i32 byte length that senders may leave at -1, and one
//! encoded value. Version 3 bodies escape to AMF 3 through the AVM+
//! marker; headers stay AMF 0 in every version.

use crate::{
    Error,
    amf0::{Amf0Decoder, Amf0Encoder, Marker},
    amf3::Amf3Encoder,
    registry::TypeRegistry,
    stream::{Reader, Writer},
    value::Value,
};

use bytes::{Bytes, BytesMut};

pub const AMF0_OBJECT_ENCODING: u16 = 0;
/// Flash Media Server encoding; framed and dispatched exactly like AMF 0.
pub const FMS_OBJECT_ENCODING: u16 = 1;
pub const AMF3_OBJECT_ENCODING: u16 = 3;

/// The flex messaging envelope classes, by both their wire aliases and
/// their mapped server class ids.
const MESSAGE_CLASSES: &[&str] = &[
    "flex.messaging.messages.RemotingMessage",
    "flex.messaging.messages.CommandMessage",
    "flex.messaging.messages.AsyncMessage",
    "flex.messaging.messages.AcknowledgeMessage",
    "flex.messaging.messages.ErrorMessage",
    "RemotingMessage",
    "CommandMessage",
    "AsyncMessage",
    "AcknowledgeMessage",
    "ErrorMessage",
];

#[derive(Debug, PartialEq)]
pub struct Header {
    pub name: String,
    pub must_understand: bool,
    pub data: Value,
}

#[derive(Debug, PartialEq)]
pub struct Body {
    pub target_uri: String,
    pub response_uri: String,
    pub data: Value,
}

#[derive(Debug, PartialEq)]
pub struct Packet {
    pub version: u16,
    pub headers: Vec<Header>,
    pub bodies: Vec<Body>,
}

impl Packet {
    pub fn new(version: u16) -> Self {
        Self {
            version,
            headers: Vec::new(),
            bodies: Vec::new(),
        }
    }
}

/// Whether a value is one of the flex messaging envelope messages.
pub fn is_message(value: &Value) -> bool {
    value
        .alias()
        .map(|it| MESSAGE_CLASSES.contains(&it.as_str()))
        .unwrap_or(false)
}

/// Decode a request packet.
///
/// Reference tables live for exactly one packet: every call builds fresh
/// codec state, and a decode error is fatal for the whole packet.
pub fn decode_packet(bytes: &[u8], registry: &TypeRegistry) -> Result<Packet, Error> {
    let mut reader = Reader::new(bytes);

    let version = reader.read_u16()?;
    if !matches!(
        version,
        AMF0_OBJECT_ENCODING | FMS_OBJECT_ENCODING | AMF3_OBJECT_ENCODING
    ) {
        return Err(Error::UnknownVersion(version));
    }

    let mut packet = Packet::new(version);
    let mut decoder = Amf0Decoder::new(registry);

    for _ in 0..reader.read_u16()? {
        let name = reader.read_utf()?.to_string();
        let must_understand = reader.read_u8()? != 0;

        // on-wire byte length, allowed to be -1 and not trusted either way.
        let _ = reader.read_i32()?;

        packet.headers.push(Header {
            data: decoder.decode(&mut reader)?,
            must_understand,
            name,
        });
    }

    for _ in 0..reader.read_u16()? {
        let target_uri = reader.read_utf()?.to_string();
        let response_uri = reader.read_utf()?.to_string();
        let _ = reader.read_i32()?;

        let mut data = decoder.decode(&mut reader)?;

        // AMF3 messaging unwrap: a body that is an array whose first
        // element is a messaging envelope collapses to that message.
        if let Some(unwrapped) = unwrap_message(&data) {
            data = unwrapped;
        }

        packet.bodies.push(Body {
            target_uri,
            response_uri,
            data,
        });
    }

    Ok(packet)
}

/// Encode a response packet.
///
/// Byte-length fields are written as -1: the real lengths would require
/// encoding every value twice.
pub fn encode_packet(packet: &Packet, registry: &TypeRegistry) -> Result<Bytes, Error> {
    let mut bytes = BytesMut::with_capacity(1024);
    let mut writer = Writer::new(&mut bytes);

    writer.put_u16(packet.version);
    writer.put_u16(packet.headers.len() as u16);

    let mut encoder = Amf0Encoder::new(registry);
    for header in &packet.headers {
        writer.put_utf(&header.name)?;
        writer.put_u8(header.must_understand as u8);
        writer.put_i32(-1);
        encoder.encode(&mut writer, &header.data)?;
    }

    writer.put_u16(packet.bodies.len() as u16);
    for body in &packet.bodies {
        writer.put_utf(&body.target_uri)?;
        writer.put_utf(&body.response_uri)?;
        writer.put_i32(-1);

        if packet.version == AMF3_OBJECT_ENCODING {
            writer.put_u8(Marker::AvmPlus.into());
            Amf3Encoder::new(registry).encode(&mut writer, &body.data)?;
        } else {
            encoder.encode(&mut writer, &body.data)?;
        }
    }

    Ok(bytes.freeze())
}

fn unwrap_message(value: &Value) -> Option<Value> {
    let array = value.as_array()?;
    let first = array.borrow().dense.first()?.clone();
    is_message(&first).then_some(first)
}
