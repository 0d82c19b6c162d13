//! ## Action Message Format (AMF)
//!
//! [amf0]: https://rtmp.veriskope.com/pdf/amf0-file-format-specification.pdf
//! [amf3]: https://rtmp.veriskope.com/pdf/amf3-file-format-spec.pdf
//!
//! AMF is a compact binary format that is used to serialize ActionScript
//! object graphs. AMF was introduced with Flash Player 6 and this
//! version is referred to as [amf0]. A revised format was introduced
//! with Flash Player 9, which is referred to as [amf3]. AMF 3 reuses
//! object traits and sends strings, complex objects and trait
//! descriptions by reference once they have appeared in the stream,
//! which considerably reduces the size of a message that repeats
//! class descriptions or values.
//!
//! This crate implements both wire formats plus the packet envelope
//! that frames a remoting request: version, headers and bodies. All
//! reference-table state is scoped to a single packet and must never be
//! shared across concurrently decoded packets.

pub mod amf0;
pub mod amf3;
pub mod envelope;
pub mod registry;
pub mod stream;
pub mod value;

pub use self::{
    envelope::{Body, Header, Packet, decode_packet, encode_packet},
    registry::{ExternalCodec, TypeRegistry},
    value::{Trait, Value, VectorKind},
};

use std::{array::TryFromSliceError, str::Utf8Error};

#[derive(Debug)]
pub enum Error {
    OutOfBounds,
    UnknownMarker(u8),
    UnknownVersion(u16),
    UnknownAlias(String),
    BadReference(usize),
    U29Range(u32),
    StringTooLong(usize),
    MalformedValue(&'static str),
    UnsupportedValue(&'static str),
    Utf8Error(Utf8Error),
    TryFromSliceError(TryFromSliceError),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<Utf8Error> for Error {
    fn from(value: Utf8Error) -> Self {
        Self::Utf8Error(value)
    }
}

impl From<TryFromSliceError> for Error {
    fn from(value: TryFromSliceError) -> Self {
        Self::TryFromSliceError(value)
    }
}
