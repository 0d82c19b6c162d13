//! ## AMF 0 encoding
//!
//! The original ActionScript message format. Values carry a one-byte
//! marker followed by a big-endian payload; repeated complex values are
//! sent as a u16 index into a single object reference table. The 0x11
//! marker escapes to AMF 3 for the remainder of the current value.

use crate::{
    Error,
    amf3::Amf3Decoder,
    registry::TypeRegistry,
    stream::{Reader, Writer},
    value::{Array, Object, Trait, Value},
};

use std::{cell::RefCell, rc::Rc};

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// AMF 0 value markers.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum Marker {
    Number = 0x00,
    Boolean = 0x01,
    String = 0x02,
    Object = 0x03,
    MovieClip = 0x04,
    Null = 0x05,
    Undefined = 0x06,
    Reference = 0x07,
    EcmaArray = 0x08,
    ObjectEnd = 0x09,
    StrictArray = 0x0A,
    Date = 0x0B,
    LongString = 0x0C,
    Unsupported = 0x0D,
    RecordSet = 0x0E,
    XmlDocument = 0x0F,
    TypedObject = 0x10,
    AvmPlus = 0x11,
}

/// AMF 0 value decoder with its per-packet object reference table.
pub struct Amf0Decoder<'a> {
    registry: &'a TypeRegistry,
    references: Vec<Value>,
}

impl<'a> Amf0Decoder<'a> {
    pub fn new(registry: &'a TypeRegistry) -> Self {
        Self {
            registry,
            references: Vec::new(),
        }
    }

    /// Decode the next value from the stream.
    ///
    /// # Test
    ///
    /// ```
    /// use amf_gateway_codec::amf0::Amf0Decoder;
    /// use amf_gateway_codec::stream::Reader;
    /// use amf_gateway_codec::{TypeRegistry, Value};
    ///
    /// let buffer = [
    ///     0x00u8, 0x3f, 0xf0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    /// ];
    ///
    /// let registry = TypeRegistry::default();
    /// let value = Amf0Decoder::new(&registry)
    ///     .decode(&mut Reader::new(&buffer))
    ///     .unwrap();
    ///
    /// assert_eq!(value, Value::Double(1.0));
    /// ```
    pub fn decode(&mut self, reader: &mut Reader) -> Result<Value, Error> {
        let byte = reader.read_u8()?;
        let marker = Marker::try_from(byte).map_err(|_| Error::UnknownMarker(byte))?;

        Ok(match marker {
            Marker::Number => Value::Double(reader.read_f64()?),
            Marker::Boolean => Value::Bool(reader.read_u8()? != 0),
            Marker::String => Value::String(reader.read_utf()?.to_string()),
            Marker::LongString => Value::String(reader.read_long_utf()?.to_string()),
            Marker::Null => Value::Null,
            Marker::Undefined => Value::Undefined,
            Marker::Reference => {
                let index = reader.read_u16()? as usize;
                self.references
                    .get(index)
                    .cloned()
                    .ok_or(Error::BadReference(index))?
            }
            Marker::Object => {
                let object = self.push_object(Trait::anonymous());
                self.read_pairs_into(reader, &object)?;
                Value::Object(object)
            }
            Marker::TypedObject => {
                let alias = reader.read_utf()?;
                let class = self.registry.class_of(alias).to_string();
                let object = self.push_object(Trait::dynamic(&class));
                self.read_pairs_into(reader, &object)?;
                Value::Object(object)
            }
            Marker::EcmaArray => {
                // the u32 is a nominal length only; the body is object
                // style pairs up to the end marker.
                let _ = reader.read_u32()?;

                let array = Rc::new(RefCell::new(Array::default()));
                self.references.push(Value::Array(array.clone()));

                loop {
                    let key = reader.read_utf()?.to_string();
                    if key.is_empty() {
                        self.expect_end(reader)?;
                        break;
                    }

                    let value = self.decode(reader)?;
                    array.borrow_mut().associative.push((key, value));
                }

                Value::Array(array)
            }
            Marker::StrictArray => {
                let size = reader.read_u32()? as usize;
                let array = Rc::new(RefCell::new(Array::default()));
                self.references.push(Value::Array(array.clone()));

                for _ in 0..size {
                    let value = self.decode(reader)?;
                    array.borrow_mut().dense.push(value);
                }

                Value::Array(array)
            }
            Marker::Date => {
                let value = Value::Date(reader.read_f64()?);
                // trailing timezone offset, always zero on the wire.
                let _ = reader.read_i16()?;
                value
            }
            Marker::XmlDocument => Value::XmlDocument(reader.read_long_utf()?.to_string()),
            Marker::AvmPlus => Amf3Decoder::new(self.registry).decode(reader)?,
            Marker::ObjectEnd => return Err(Error::MalformedValue("object end outside object")),
            Marker::MovieClip | Marker::Unsupported | Marker::RecordSet => {
                return Err(Error::UnknownMarker(byte));
            }
        })
    }

    fn push_object(&mut self, traits: Trait) -> Rc<RefCell<Object>> {
        let object = Rc::new(RefCell::new(Object {
            traits: Rc::new(traits),
            sealed: Vec::new(),
            dynamic: Vec::new(),
        }));

        self.references.push(Value::Object(object.clone()));
        object
    }

    fn read_pairs_into(
        &mut self,
        reader: &mut Reader,
        object: &Rc<RefCell<Object>>,
    ) -> Result<(), Error> {
        loop {
            let key = reader.read_utf()?.to_string();
            if key.is_empty() {
                return self.expect_end(reader);
            }

            let value = self.decode(reader)?;
            object.borrow_mut().dynamic.push((key, value));
        }
    }

    fn expect_end(&mut self, reader: &mut Reader) -> Result<(), Error> {
        if reader.read_u8()? != Marker::ObjectEnd.into() {
            return Err(Error::MalformedValue("missing object end marker"));
        }

        Ok(())
    }
}

/// AMF 0 value encoder with its per-packet object reference table.
///
/// Keys beginning with an underscore are treated as private members and
/// skipped when writing object bodies.
pub struct Amf0Encoder<'a> {
    registry: &'a TypeRegistry,
    references: Vec<Value>,
}

impl<'a> Amf0Encoder<'a> {
    pub fn new(registry: &'a TypeRegistry) -> Self {
        Self {
            registry,
            references: Vec::new(),
        }
    }

    /// Encode a value onto the stream.
    ///
    /// # Test
    ///
    /// ```
    /// use amf_gateway_codec::amf0::Amf0Encoder;
    /// use amf_gateway_codec::stream::Writer;
    /// use amf_gateway_codec::{TypeRegistry, Value};
    /// use bytes::BytesMut;
    ///
    /// let registry = TypeRegistry::default();
    /// let mut bytes = BytesMut::new();
    ///
    /// Amf0Encoder::new(&registry)
    ///     .encode(&mut Writer::new(&mut bytes), &Value::string("panda"))
    ///     .unwrap();
    ///
    /// assert_eq!(&bytes[..], &[0x02, 0x00, 0x05, 0x70, 0x61, 0x6e, 0x64, 0x61]);
    /// ```
    pub fn encode(&mut self, writer: &mut Writer, value: &Value) -> Result<(), Error> {
        match value {
            Value::Double(value) => {
                writer.put_u8(Marker::Number.into());
                writer.put_f64(*value);
            }
            // AMF 0 has no integer marker; everything numeric is a double.
            Value::Integer(value) => {
                writer.put_u8(Marker::Number.into());
                writer.put_f64(*value as f64);
            }
            Value::Bool(value) => {
                writer.put_u8(Marker::Boolean.into());
                writer.put_u8(*value as u8);
            }
            Value::String(value) => self.write_string(writer, value)?,
            Value::Null => writer.put_u8(Marker::Null.into()),
            Value::Undefined => writer.put_u8(Marker::Undefined.into()),
            Value::Date(value) => {
                writer.put_u8(Marker::Date.into());
                writer.put_f64(*value);
                writer.put_i16(0);
            }
            Value::XmlDocument(value) | Value::Xml(value) => {
                writer.put_u8(Marker::XmlDocument.into());
                writer.put_long_utf(value);
            }
            Value::Array(array) => {
                if self.write_reference(writer, value)? {
                    return Ok(());
                }

                let array = array.borrow();
                self.write_array(writer, &array)?;
            }
            Value::Object(object) => {
                if self.write_reference(writer, value)? {
                    return Ok(());
                }

                let object = object.borrow();
                if object.traits.is_anonymous() {
                    writer.put_u8(Marker::Object.into());
                } else {
                    writer.put_u8(Marker::TypedObject.into());
                    writer.put_utf(self.registry.alias_of(&object.traits.alias))?;
                }

                let sealed = object
                    .traits
                    .sealed_names
                    .iter()
                    .zip(object.sealed.iter());

                for (key, item) in sealed.chain(
                    object
                        .dynamic
                        .iter()
                        .map(|(key, item)| (key, item)),
                ) {
                    if key.starts_with('_') {
                        continue;
                    }

                    writer.put_utf(key)?;
                    self.encode(writer, item)?;
                }

                self.write_end(writer)?;
            }
            Value::ByteArray(_) | Value::Vector(_) | Value::Dictionary(_) | Value::External(_) => {
                return Err(Error::UnsupportedValue("no AMF0 form for this value"));
            }
        }

        Ok(())
    }

    /// Pick the array marker from the full key set, with dense positions
    /// counting as implicit keys `0..dense.len()`: keys forming exactly
    /// `0..n-1` in order are strict, any non-numeric key demotes the
    /// array to a plain object, and the rest are ECMA arrays.
    fn write_array(&mut self, writer: &mut Writer, array: &Array) -> Result<(), Error> {
        let numeric = |key: &str| !key.is_empty() && key.bytes().all(|it| it.is_ascii_digit());

        let sequential = array
            .associative
            .iter()
            .enumerate()
            .all(|(index, (key, _))| *key == (array.dense.len() + index).to_string());

        if sequential {
            writer.put_u8(Marker::StrictArray.into());
            writer.put_u32((array.dense.len() + array.associative.len()) as u32);

            for item in &array.dense {
                self.encode(writer, item)?;
            }

            for (_, item) in &array.associative {
                self.encode(writer, item)?;
            }

            return Ok(());
        }

        if array.associative.iter().any(|(key, _)| !numeric(key)) {
            writer.put_u8(Marker::Object.into());
        } else {
            writer.put_u8(Marker::EcmaArray.into());
            writer.put_u32((array.dense.len() + array.associative.len()) as u32);
        }

        for (index, item) in array.dense.iter().enumerate() {
            writer.put_utf(&index.to_string())?;
            self.encode(writer, item)?;
        }

        for (key, item) in &array.associative {
            if key.starts_with('_') {
                continue;
            }

            writer.put_utf(key)?;
            self.encode(writer, item)?;
        }

        self.write_end(writer)
    }

    /// Strings over 65535 UTF-8 bytes are promoted to the LongString
    /// marker automatically.
    fn write_string(&mut self, writer: &mut Writer, value: &str) -> Result<(), Error> {
        if value.len() > u16::MAX as usize {
            writer.put_u8(Marker::LongString.into());
            writer.put_long_utf(value);
        } else {
            writer.put_u8(Marker::String.into());
            writer.put_utf(value)?;
        }

        Ok(())
    }

    fn write_reference(&mut self, writer: &mut Writer, value: &Value) -> Result<bool, Error> {
        if let Some(index) = self.references.iter().position(|it| it.is_same(value)) {
            if index <= u16::MAX as usize {
                writer.put_u8(Marker::Reference.into());
                writer.put_u16(index as u16);
                return Ok(true);
            }
        }

        self.references.push(value.clone());
        Ok(false)
    }

    fn write_end(&mut self, writer: &mut Writer) -> Result<(), Error> {
        writer.put_utf("")?;
        writer.put_u8(Marker::ObjectEnd.into());
        Ok(())
    }
}
