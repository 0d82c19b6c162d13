//! ## AMF 3 encoding
//!
//! [spec]: https://rtmp.veriskope.com/pdf/amf3-file-format-spec.pdf
//!
//! AMF 3 serializes type information into a more compact binary format
//! than AMF 0 and can serialize data more efficiently. By default, a
//! serialized stream of AMF 3 encoded data starts out empty with three
//! implicit tables: a table of strings, a table of objects and a table
//! of traits. Strings, complex objects and trait descriptions that have
//! already appeared in the stream are sent by reference, an index into
//! the table in question. The full details are in the [spec].

use crate::{
    Error,
    registry::TypeRegistry,
    stream::{Reader, Writer},
    value::{Array, Dictionary, External, Object, Trait, Value, Vector, VectorKind},
};

use std::{cell::RefCell, rc::Rc};

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Largest value a signed 29-bit integer can carry; anything outside
/// `[-2^28, 2^28)` is widened to a double on write.
pub const I29_MAX: i32 = 0x0FFF_FFFF;
pub const I29_MIN: i32 = -0x1000_0000;

/// AMF 3 value markers.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum Marker {
    Undefined = 0x00,
    Null = 0x01,
    False = 0x02,
    True = 0x03,
    Integer = 0x04,
    Double = 0x05,
    String = 0x06,
    XmlDocument = 0x07,
    Date = 0x08,
    Array = 0x09,
    Object = 0x0A,
    Xml = 0x0B,
    ByteArray = 0x0C,
    VectorInt = 0x0D,
    VectorUint = 0x0E,
    VectorDouble = 0x0F,
    VectorObject = 0x10,
    Dictionary = 0x11,
}

/// Read a variable-length unsigned 29-bit integer.
///
/// Bytes one to three use the high bit as a continuation flag and
/// contribute 7 payload bits each; a fourth byte contributes all 8 of
/// its bits, for 29 bits total.
///
/// # Test
///
/// ```
/// use amf_gateway_codec::amf3::read_u29;
/// use amf_gateway_codec::stream::Reader;
///
/// assert_eq!(read_u29(&mut Reader::new(&[0x7F])).unwrap(), 0x7F);
/// assert_eq!(read_u29(&mut Reader::new(&[0x81, 0x00])).unwrap(), 0x80);
/// assert_eq!(read_u29(&mut Reader::new(&[0xFF, 0x7F])).unwrap(), 0x3FFF);
/// assert_eq!(read_u29(&mut Reader::new(&[0x81, 0x80, 0x00])).unwrap(), 0x4000);
/// assert_eq!(read_u29(&mut Reader::new(&[0xFF, 0xFF, 0xFF, 0xFF])).unwrap(), 0x1FFF_FFFF);
/// ```
pub fn read_u29(reader: &mut Reader) -> Result<u32, Error> {
    let mut value = 0u32;

    for _ in 0..3 {
        let byte = reader.read_u8()?;
        if byte < 0x80 {
            return Ok(value << 7 | byte as u32);
        }

        value = value << 7 | (byte & 0x7F) as u32;
    }

    Ok(value << 8 | reader.read_u8()? as u32)
}

/// Write a variable-length unsigned 29-bit integer.
///
/// # Test
///
/// ```
/// use amf_gateway_codec::amf3::write_u29;
/// use amf_gateway_codec::stream::Writer;
/// use bytes::BytesMut;
///
/// let mut bytes = BytesMut::new();
/// write_u29(&mut Writer::new(&mut bytes), 0x200000).unwrap();
///
/// assert_eq!(&bytes[..], &[0x80, 0xC0, 0x80, 0x00]);
/// ```
pub fn write_u29(writer: &mut Writer, value: u32) -> Result<(), Error> {
    match value {
        0..=0x7F => writer.put_u8(value as u8),
        0x80..=0x3FFF => {
            writer.put_u8(0x80 | (value >> 7) as u8);
            writer.put_u8((value & 0x7F) as u8);
        }
        0x4000..=0x1F_FFFF => {
            writer.put_u8(0x80 | (value >> 14) as u8);
            writer.put_u8(0x80 | ((value >> 7) & 0x7F) as u8);
            writer.put_u8((value & 0x7F) as u8);
        }
        0x20_0000..=0x1FFF_FFFF => {
            writer.put_u8(0x80 | (value >> 22) as u8);
            writer.put_u8(0x80 | ((value >> 15) & 0x7F) as u8);
            writer.put_u8(0x80 | ((value >> 8) & 0x7F) as u8);
            writer.put_u8((value & 0xFF) as u8);
        }
        _ => return Err(Error::U29Range(value)),
    }

    Ok(())
}

/// AMF 3 value decoder.
///
/// Owns the three per-packet reference tables; one decoder must never be
/// shared across packets, and a fresh one is created for every AVM+
/// escape out of AMF 0.
pub struct Amf3Decoder<'a> {
    registry: &'a TypeRegistry,
    strings: Vec<String>,
    objects: Vec<Value>,
    traits: Vec<Rc<Trait>>,
}

impl<'a> Amf3Decoder<'a> {
    pub fn new(registry: &'a TypeRegistry) -> Self {
        Self {
            registry,
            strings: Vec::new(),
            objects: Vec::new(),
            traits: Vec::new(),
        }
    }

    /// Decode the next value from the stream.
    ///
    /// # Test
    ///
    /// ```
    /// use amf_gateway_codec::amf3::Amf3Decoder;
    /// use amf_gateway_codec::stream::Reader;
    /// use amf_gateway_codec::{TypeRegistry, Value};
    ///
    /// let registry = TypeRegistry::default();
    /// let mut decoder = Amf3Decoder::new(&registry);
    ///
    /// let value = decoder
    ///     .decode(&mut Reader::new(&[0x06, 0x0B, 0x70, 0x61, 0x6e, 0x64, 0x61]))
    ///     .unwrap();
    ///
    /// assert_eq!(value, Value::string("panda"));
    /// ```
    pub fn decode(&mut self, reader: &mut Reader) -> Result<Value, Error> {
        let byte = reader.read_u8()?;
        let marker = Marker::try_from(byte).map_err(|_| Error::UnknownMarker(byte))?;

        Ok(match marker {
            Marker::Undefined => Value::Undefined,
            Marker::Null => Value::Null,
            Marker::False => Value::Bool(false),
            Marker::True => Value::Bool(true),
            Marker::Integer => {
                let value = read_u29(reader)?;
                Value::Integer(if value & 0x1000_0000 != 0 {
                    (value | 0xE000_0000) as i32
                } else {
                    value as i32
                })
            }
            Marker::Double => Value::Double(reader.read_f64()?),
            Marker::String => Value::String(self.read_string(reader)?),
            Marker::XmlDocument => {
                match self.read_inline(reader)? {
                    Inline::Reference(value) => value,
                    Inline::Size(size) => {
                        let value =
                            Value::XmlDocument(std::str::from_utf8(reader.read_exact(size)?)?.to_string());
                        self.objects.push(value.clone());
                        value
                    }
                }
            }
            Marker::Xml => {
                match self.read_inline(reader)? {
                    Inline::Reference(value) => value,
                    Inline::Size(size) => {
                        let value =
                            Value::Xml(std::str::from_utf8(reader.read_exact(size)?)?.to_string());
                        self.objects.push(value.clone());
                        value
                    }
                }
            }
            Marker::Date => {
                match self.read_inline(reader)? {
                    Inline::Reference(value) => value,
                    Inline::Size(_) => {
                        let value = Value::Date(reader.read_f64()?);
                        self.objects.push(value.clone());
                        value
                    }
                }
            }
            Marker::ByteArray => {
                match self.read_inline(reader)? {
                    Inline::Reference(value) => value,
                    Inline::Size(size) => {
                        let value = Value::byte_array(reader.read_exact(size)?.to_vec());
                        self.objects.push(value.clone());
                        value
                    }
                }
            }
            Marker::Array => {
                match self.read_inline(reader)? {
                    Inline::Reference(value) => value,
                    Inline::Size(size) => self.read_array(reader, size)?,
                }
            }
            Marker::Object => self.read_object(reader)?,
            Marker::VectorInt => self.read_vector(reader, VectorKind::Int)?,
            Marker::VectorUint => self.read_vector(reader, VectorKind::Uint)?,
            Marker::VectorDouble => self.read_vector(reader, VectorKind::Double)?,
            Marker::VectorObject => self.read_vector(reader, VectorKind::Object)?,
            Marker::Dictionary => {
                match self.read_inline(reader)? {
                    Inline::Reference(value) => value,
                    Inline::Size(size) => self.read_dictionary(reader, size)?,
                }
            }
        })
    }

    /// Split a U29 header into a reference hit or an inline payload size.
    fn read_inline(&mut self, reader: &mut Reader) -> Result<Inline, Error> {
        let header = read_u29(reader)?;
        if header & 1 == 0 {
            let index = (header >> 1) as usize;
            Ok(Inline::Reference(
                self.objects
                    .get(index)
                    .cloned()
                    .ok_or(Error::BadReference(index))?,
            ))
        } else {
            Ok(Inline::Size((header >> 1) as usize))
        }
    }

    /// A U29-headed string: reference into the string table, or an inline
    /// UTF-8 run that gets interned unless empty.
    fn read_string(&mut self, reader: &mut Reader) -> Result<String, Error> {
        let header = read_u29(reader)?;
        if header & 1 == 0 {
            let index = (header >> 1) as usize;
            return self
                .strings
                .get(index)
                .cloned()
                .ok_or(Error::BadReference(index));
        }

        let size = (header >> 1) as usize;
        let value = std::str::from_utf8(reader.read_exact(size)?)?.to_string();
        if !value.is_empty() {
            self.strings.push(value.clone());
        }

        Ok(value)
    }

    fn read_array(&mut self, reader: &mut Reader, size: usize) -> Result<Value, Error> {
        let array = Rc::new(RefCell::new(Array::default()));
        self.objects.push(Value::Array(array.clone()));

        // associative segment first, terminated by the empty key.
        loop {
            let key = self.read_string(reader)?;
            if key.is_empty() {
                break;
            }

            let value = self.decode(reader)?;
            array.borrow_mut().associative.push((key, value));
        }

        for _ in 0..size {
            let value = self.decode(reader)?;
            array.borrow_mut().dense.push(value);
        }

        Ok(Value::Array(array))
    }

    fn read_object(&mut self, reader: &mut Reader) -> Result<Value, Error> {
        let header = read_u29(reader)?;
        if header & 1 == 0 {
            let index = (header >> 1) as usize;
            return self
                .objects
                .get(index)
                .cloned()
                .ok_or(Error::BadReference(index));
        }

        let traits = if header & 2 == 0 {
            let index = (header >> 2) as usize;
            self.traits
                .get(index)
                .cloned()
                .ok_or(Error::BadReference(index))?
        } else {
            let alias = self.read_string(reader)?;
            let mut traits = Trait {
                alias: self.registry.class_of(&alias).to_string(),
                externalizable: header & 4 != 0,
                dynamic: header & 8 != 0,
                sealed_names: Vec::new(),
            };

            if !traits.externalizable {
                for _ in 0..(header >> 4) {
                    traits.sealed_names.push(self.read_string(reader)?);
                }
            }

            let traits = Rc::new(traits);
            self.traits.push(traits.clone());
            traits
        };

        if traits.externalizable {
            let registry = self.registry;
            let codec = registry
                .external(&traits.alias)
                .or_else(|| registry.external(registry.alias_of(&traits.alias)))
                .ok_or_else(|| Error::UnknownAlias(traits.alias.clone()))?;

            let external = Rc::new(RefCell::new(External {
                alias: traits.alias.clone(),
                data: Vec::new(),
            }));

            self.objects.push(Value::External(external.clone()));
            external.borrow_mut().data = codec.decode(reader)?;
            return Ok(Value::External(external));
        }

        let object = Rc::new(RefCell::new(Object {
            traits: traits.clone(),
            sealed: Vec::new(),
            dynamic: Vec::new(),
        }));

        // into the reference table before the member values, so that a
        // member can point back at the object being decoded.
        self.objects.push(Value::Object(object.clone()));

        for _ in 0..traits.sealed_names.len() {
            let value = self.decode(reader)?;
            object.borrow_mut().sealed.push(value);
        }

        if traits.dynamic {
            loop {
                let key = self.read_string(reader)?;
                if key.is_empty() {
                    break;
                }

                let value = self.decode(reader)?;
                object.borrow_mut().dynamic.push((key, value));
            }
        }

        Ok(Value::Object(object))
    }

    fn read_vector(&mut self, reader: &mut Reader, kind: VectorKind) -> Result<Value, Error> {
        let size = match self.read_inline(reader)? {
            Inline::Reference(value) => return Ok(value),
            Inline::Size(size) => size,
        };

        let fixed = reader.read_u8()? != 0;
        let type_name = if kind == VectorKind::Object {
            self.read_string(reader)?
        } else {
            "*".to_string()
        };

        let vector = Rc::new(RefCell::new(Vector {
            kind,
            fixed,
            type_name,
            items: Vec::new(),
        }));

        self.objects.push(Value::Vector(vector.clone()));

        for _ in 0..size {
            let item = match kind {
                VectorKind::Int => Value::Integer(reader.read_i32()?),
                VectorKind::Uint => {
                    let value = reader.read_u32()?;
                    if value <= i32::MAX as u32 {
                        Value::Integer(value as i32)
                    } else {
                        Value::Double(value as f64)
                    }
                }
                VectorKind::Double => Value::Double(reader.read_f64()?),
                VectorKind::Object => self.decode(reader)?,
            };

            vector.borrow_mut().items.push(item);
        }

        Ok(Value::Vector(vector))
    }

    fn read_dictionary(&mut self, reader: &mut Reader, size: usize) -> Result<Value, Error> {
        let weak_keys = reader.read_u8()? != 0;
        let dictionary = Rc::new(RefCell::new(Dictionary {
            weak_keys,
            entries: Vec::new(),
        }));

        self.objects.push(Value::Dictionary(dictionary.clone()));

        for _ in 0..size {
            let key = self.decode(reader)?;
            let value = self.decode(reader)?;
            dictionary.borrow_mut().entries.push((key, value));
        }

        Ok(Value::Dictionary(dictionary))
    }
}

enum Inline {
    Reference(Value),
    Size(usize),
}

/// AMF 3 value encoder.
///
/// Mirrors the decoder's three reference tables. The object table is
/// searched by graph identity, never by structural equality, so two
/// equal-but-distinct objects are both sent inline while a shared node
/// becomes a reference marker.
pub struct Amf3Encoder<'a> {
    registry: &'a TypeRegistry,
    strings: Vec<String>,
    objects: Vec<Value>,
    traits: Vec<Rc<Trait>>,
}

impl<'a> Amf3Encoder<'a> {
    pub fn new(registry: &'a TypeRegistry) -> Self {
        Self {
            registry,
            strings: Vec::new(),
            objects: Vec::new(),
            traits: Vec::new(),
        }
    }

    /// Encode a value onto the stream.
    ///
    /// # Test
    ///
    /// ```
    /// use amf_gateway_codec::amf3::Amf3Encoder;
    /// use amf_gateway_codec::stream::Writer;
    /// use amf_gateway_codec::{TypeRegistry, Value};
    /// use bytes::BytesMut;
    ///
    /// let registry = TypeRegistry::default();
    /// let mut bytes = BytesMut::new();
    ///
    /// Amf3Encoder::new(&registry)
    ///     .encode(&mut Writer::new(&mut bytes), &Value::Integer(5))
    ///     .unwrap();
    ///
    /// assert_eq!(&bytes[..], &[0x04, 0x05]);
    /// ```
    pub fn encode(&mut self, writer: &mut Writer, value: &Value) -> Result<(), Error> {
        match value {
            Value::Undefined => writer.put_u8(Marker::Undefined.into()),
            Value::Null => writer.put_u8(Marker::Null.into()),
            Value::Bool(false) => writer.put_u8(Marker::False.into()),
            Value::Bool(true) => writer.put_u8(Marker::True.into()),
            Value::Integer(value) => {
                // an integer marker can only carry 29 payload bits; the
                // rest of the i32 range is widened to a double.
                if (I29_MIN..=I29_MAX).contains(value) {
                    writer.put_u8(Marker::Integer.into());
                    write_u29(writer, (*value as u32) & 0x1FFF_FFFF)?;
                } else {
                    writer.put_u8(Marker::Double.into());
                    writer.put_f64(*value as f64);
                }
            }
            Value::Double(value) => {
                writer.put_u8(Marker::Double.into());
                writer.put_f64(*value);
            }
            Value::String(value) => {
                writer.put_u8(Marker::String.into());
                self.write_string(writer, value)?;
            }
            Value::XmlDocument(xml_document) => {
                writer.put_u8(Marker::XmlDocument.into());
                if !self.write_reference(writer, value)? {
                    write_u29(writer, (xml_document.len() as u32) << 1 | 1)?;
                    writer.put_slice(xml_document.as_bytes());
                }
            }
            Value::Xml(xml) => {
                writer.put_u8(Marker::Xml.into());
                if !self.write_reference(writer, value)? {
                    write_u29(writer, (xml.len() as u32) << 1 | 1)?;
                    writer.put_slice(xml.as_bytes());
                }
            }
            Value::Date(date) => {
                writer.put_u8(Marker::Date.into());
                if !self.write_reference(writer, value)? {
                    write_u29(writer, 1)?;
                    writer.put_f64(*date);
                }
            }
            Value::ByteArray(bytes) => {
                writer.put_u8(Marker::ByteArray.into());
                if !self.write_reference(writer, value)? {
                    let bytes = bytes.borrow();
                    write_u29(writer, (bytes.len() as u32) << 1 | 1)?;
                    writer.put_slice(&bytes);
                }
            }
            Value::Array(array) => {
                writer.put_u8(Marker::Array.into());
                if !self.write_reference(writer, value)? {
                    let array = array.borrow();
                    write_u29(writer, (array.dense.len() as u32) << 1 | 1)?;

                    for (key, item) in &array.associative {
                        self.write_string(writer, key)?;
                        self.encode(writer, item)?;
                    }

                    self.write_string(writer, "")?;
                    for item in &array.dense {
                        self.encode(writer, item)?;
                    }
                }
            }
            Value::Object(_) | Value::External(_) => self.write_object(writer, value)?,
            Value::Vector(vector) => {
                writer.put_u8(match vector.borrow().kind {
                    VectorKind::Int => Marker::VectorInt.into(),
                    VectorKind::Uint => Marker::VectorUint.into(),
                    VectorKind::Double => Marker::VectorDouble.into(),
                    VectorKind::Object => Marker::VectorObject.into(),
                });

                if !self.write_reference(writer, value)? {
                    let vector = vector.borrow();
                    write_u29(writer, (vector.items.len() as u32) << 1 | 1)?;
                    writer.put_u8(vector.fixed as u8);

                    if vector.kind == VectorKind::Object {
                        self.write_string(writer, &vector.type_name)?;
                    }

                    for item in &vector.items {
                        match vector.kind {
                            VectorKind::Int => match item {
                                Value::Integer(it) => writer.put_i32(*it),
                                Value::Double(it) => writer.put_i32(*it as i32),
                                _ => return Err(Error::UnsupportedValue("vector<int> element")),
                            },
                            VectorKind::Uint => match item {
                                Value::Integer(it) => writer.put_u32(*it as u32),
                                Value::Double(it) => writer.put_u32(*it as u32),
                                _ => return Err(Error::UnsupportedValue("vector<uint> element")),
                            },
                            VectorKind::Double => match item {
                                Value::Integer(it) => writer.put_f64(*it as f64),
                                Value::Double(it) => writer.put_f64(*it),
                                _ => return Err(Error::UnsupportedValue("vector<double> element")),
                            },
                            VectorKind::Object => self.encode(writer, item)?,
                        }
                    }
                }
            }
            Value::Dictionary(dictionary) => {
                writer.put_u8(Marker::Dictionary.into());
                if !self.write_reference(writer, value)? {
                    let dictionary = dictionary.borrow();
                    write_u29(writer, (dictionary.entries.len() as u32) << 1 | 1)?;
                    writer.put_u8(dictionary.weak_keys as u8);

                    for (key, item) in &dictionary.entries {
                        self.encode(writer, key)?;
                        self.encode(writer, item)?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Emit a reference marker when the value is already in the object
    /// table; otherwise append it and report that the caller must write
    /// the inline form.
    fn write_reference(&mut self, writer: &mut Writer, value: &Value) -> Result<bool, Error> {
        if let Some(index) = self.objects.iter().position(|it| it.is_same(value)) {
            write_u29(writer, (index as u32) << 1)?;
            return Ok(true);
        }

        self.objects.push(value.clone());
        Ok(false)
    }

    fn write_string(&mut self, writer: &mut Writer, value: &str) -> Result<(), Error> {
        if value.is_empty() {
            return write_u29(writer, 1);
        }

        if let Some(index) = self.strings.iter().position(|it| it == value) {
            return write_u29(writer, (index as u32) << 1);
        }

        self.strings.push(value.to_string());
        write_u29(writer, (value.len() as u32) << 1 | 1)?;
        writer.put_slice(value.as_bytes());
        Ok(())
    }

    fn write_object(&mut self, writer: &mut Writer, value: &Value) -> Result<(), Error> {
        writer.put_u8(Marker::Object.into());
        if self.write_reference(writer, value)? {
            return Ok(());
        }

        match value {
            Value::External(external) => {
                let registry = self.registry;
                let external = external.borrow();
                let alias = registry.alias_of(&external.alias).to_string();
                let codec = registry
                    .external(&alias)
                    .or_else(|| registry.external(&external.alias))
                    .ok_or_else(|| Error::UnknownAlias(external.alias.clone()))?;

                write_u29(writer, 0b111)?;
                self.write_string(writer, &alias)?;
                codec.encode(writer, &external.data)?;
            }
            Value::Object(object) => {
                let object = object.borrow();
                if object.traits.externalizable {
                    return Err(Error::UnsupportedValue("externalizable trait on plain object"));
                }

                if let Some(index) = self.traits.iter().position(|it| **it == *object.traits) {
                    write_u29(writer, (index as u32) << 2 | 0b01)?;
                } else {
                    self.traits.push(object.traits.clone());

                    let mut header = (object.traits.sealed_names.len() as u32) << 4 | 0b011;
                    if object.traits.dynamic {
                        header |= 0b1000;
                    }

                    write_u29(writer, header)?;
                    let alias = self.registry.alias_of(&object.traits.alias).to_string();
                    self.write_string(writer, &alias)?;

                    for name in &object.traits.sealed_names {
                        self.write_string(writer, name)?;
                    }
                }

                for item in &object.sealed {
                    self.encode(writer, item)?;
                }

                if object.traits.dynamic {
                    for (key, item) in &object.dynamic {
                        self.write_string(writer, key)?;
                        self.encode(writer, item)?;
                    }

                    self.write_string(writer, "")?;
                }
            }
            _ => unreachable!(),
        }

        Ok(())
    }
}
