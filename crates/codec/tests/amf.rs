use anyhow::Result;
use bytes::BytesMut;

use amf_gateway_codec::{
    Error, Trait, TypeRegistry, Value, VectorKind,
    amf0::{Amf0Decoder, Amf0Encoder},
    amf3::{Amf3Decoder, Amf3Encoder, read_u29, write_u29},
    envelope::{self, Body, Header, Packet},
    stream::{Reader, Writer},
};

#[rustfmt::skip]
mod samples {
    pub const AMF3_TYPED_VECTOR: &[u8] = include_bytes!("samples/amf3TypedVector.bin");
    pub const AMF0_STRICT_ARRAY: &[u8] = include_bytes!("samples/amf0StrictArray.bin");
    pub const AMF0_ECHO_REQUEST: &[u8] = include_bytes!("samples/amf0EchoRequest.bin");
}

fn amf3_bytes(registry: &TypeRegistry, value: &Value) -> Result<Vec<u8>> {
    let mut bytes = BytesMut::new();
    Amf3Encoder::new(registry).encode(&mut Writer::new(&mut bytes), value)?;
    Ok(bytes.to_vec())
}

fn amf3_value(registry: &TypeRegistry, bytes: &[u8]) -> Result<Value> {
    Ok(Amf3Decoder::new(registry).decode(&mut Reader::new(bytes))?)
}

fn amf0_bytes(registry: &TypeRegistry, value: &Value) -> Result<Vec<u8>> {
    let mut bytes = BytesMut::new();
    Amf0Encoder::new(registry).encode(&mut Writer::new(&mut bytes), value)?;
    Ok(bytes.to_vec())
}

fn amf0_value(registry: &TypeRegistry, bytes: &[u8]) -> Result<Value> {
    Ok(Amf0Decoder::new(registry).decode(&mut Reader::new(bytes))?)
}

#[test]
fn test_u29_boundaries() -> Result<()> {
    let table: &[(u32, usize)] = &[
        (0, 1),
        (0x7F, 1),
        (0x80, 2),
        (0x3FFF, 2),
        (0x4000, 3),
        (0x1F_FFFF, 3),
        (0x20_0000, 4),
        (0x1FFF_FFFF, 4),
    ];

    for (value, size) in table {
        let mut bytes = BytesMut::new();
        write_u29(&mut Writer::new(&mut bytes), *value)?;

        assert_eq!(bytes.len(), *size, "u29 size of {:#x}", value);
        assert_eq!(read_u29(&mut Reader::new(&bytes))?, *value);
    }

    assert!(matches!(
        write_u29(&mut Writer::new(&mut BytesMut::new()), 0x2000_0000),
        Err(Error::U29Range(_))
    ));

    // an i32 that overflows 29 bits is not an integer marker anymore.
    let registry = TypeRegistry::default();
    let bytes = amf3_bytes(&registry, &Value::Integer(0x2000_0000))?;
    assert_eq!(bytes[0], 0x05);
    assert_eq!(amf3_value(&registry, &bytes)?, Value::Double(536870912.0));

    Ok(())
}

#[test]
fn test_amf3_round_trip() -> Result<()> {
    let registry = TypeRegistry::default();

    let values = vec![
        Value::Null,
        Value::Undefined,
        Value::Bool(true),
        Value::Bool(false),
        Value::Integer(0),
        Value::Integer(-1),
        Value::Integer(0x0FFF_FFFF),
        Value::Integer(-0x1000_0000),
        Value::Double(3.25),
        Value::Double(f64::NAN),
        Value::string(""),
        Value::string("panda"),
        Value::string("日本語のテキスト"),
        Value::Date(1230768000000.0),
        Value::XmlDocument("<a/>".to_string()),
        Value::Xml("<b attr=\"1\"/>".to_string()),
        Value::byte_array(vec![0, 1, 2, 255]),
        Value::strict_array(vec![Value::Integer(1), Value::string("two")]),
        Value::vector(VectorKind::Int, true, "*", vec![Value::Integer(-5)]),
        Value::vector(VectorKind::Uint, false, "*", vec![Value::Double(4000000000.0)]),
        Value::vector(VectorKind::Double, false, "*", vec![Value::Double(0.5)]),
        Value::anonymous(vec![("key".to_string(), Value::Null)]),
        Value::object(
            Trait::sealed("Contact", &["name", "email"]),
            vec![Value::string("panda"), Value::string("panda@example.com")],
            Vec::new(),
        ),
    ];

    for value in values {
        let bytes = amf3_bytes(&registry, &value)?;
        assert_eq!(amf3_value(&registry, &bytes)?, value, "{:?}", value);
    }

    // associative + dense segments together.
    let array = Value::Array(std::rc::Rc::new(std::cell::RefCell::new(
        amf_gateway_codec::value::Array {
            dense: vec![Value::Integer(1)],
            associative: vec![("name".to_string(), Value::string("panda"))],
        },
    )));

    let bytes = amf3_bytes(&registry, &array)?;
    assert_eq!(amf3_value(&registry, &bytes)?, array);

    // dictionaries keep entry order and the weak flag.
    let dictionary = Value::Dictionary(std::rc::Rc::new(std::cell::RefCell::new(
        amf_gateway_codec::value::Dictionary {
            weak_keys: true,
            entries: vec![(Value::string("k"), Value::Integer(9))],
        },
    )));

    let bytes = amf3_bytes(&registry, &dictionary)?;
    assert_eq!(amf3_value(&registry, &bytes)?, dictionary);

    Ok(())
}

#[test]
fn test_amf3_reference_table() -> Result<()> {
    let registry = TypeRegistry::default();

    let shared = Value::anonymous(vec![("a".to_string(), Value::Integer(1))]);
    let array = Value::strict_array(vec![shared.clone(), shared.clone()]);

    // one inline instance, then a reference to object-table slot 1 (the
    // array itself occupies slot 0).
    #[rustfmt::skip]
    let expected = [
        0x09, 0x05, 0x01,
        0x0A, 0x0B, 0x01, 0x03, 0x61, 0x04, 0x01, 0x01,
        0x0A, 0x02,
    ];

    let bytes = amf3_bytes(&registry, &array)?;
    assert_eq!(&bytes[..], &expected);

    let decoded = amf3_value(&registry, &bytes)?;
    let decoded = decoded.as_array().unwrap().borrow();
    assert!(decoded.dense[0].is_same(&decoded.dense[1]));

    Ok(())
}

#[test]
fn test_amf3_string_interning() -> Result<()> {
    let registry = TypeRegistry::default();

    // the empty string is never added to the string table, so "x" gets
    // index 0 and its repeat is the two-byte reference 0x06 0x00.
    let array = Value::strict_array(vec![
        Value::string(""),
        Value::string("x"),
        Value::string("x"),
    ]);

    #[rustfmt::skip]
    let expected = [
        0x09, 0x07, 0x01,
        0x06, 0x01,
        0x06, 0x03, 0x78,
        0x06, 0x00,
    ];

    let bytes = amf3_bytes(&registry, &array)?;
    assert_eq!(&bytes[..], &expected);
    assert_eq!(amf3_value(&registry, &bytes)?, array);

    Ok(())
}

#[test]
fn test_amf3_cyclic_graph() -> Result<()> {
    let registry = TypeRegistry::default();

    let value = Value::anonymous(Vec::new());
    if let Value::Object(object) = &value {
        object
            .borrow_mut()
            .dynamic
            .push(("me".to_string(), value.clone()));
    }

    let bytes = amf3_bytes(&registry, &value)?;
    let decoded = amf3_value(&registry, &bytes)?;

    let inner = decoded.member("me").unwrap();
    assert!(inner.is_same(&decoded));

    Ok(())
}

#[test]
fn test_amf3_typed_vector_fixture() -> Result<()> {
    let registry = TypeRegistry::default();

    let contact = |name: &str, email: &str| {
        Value::object(
            Trait::sealed("ContactElt", &["name", "email"]),
            vec![Value::string(name), Value::string(email)],
            Vec::new(),
        )
    };

    let vector = Value::vector(
        VectorKind::Object,
        false,
        "ContactElt",
        vec![
            contact("alice", "alice@example.com"),
            contact("bob", "bob@example.com"),
            contact("carol", "carol@example.com"),
        ],
    );

    let bytes = amf3_bytes(&registry, &vector)?;
    assert_eq!(&bytes[..], samples::AMF3_TYPED_VECTOR);
    assert_eq!(amf3_value(&registry, samples::AMF3_TYPED_VECTOR)?, vector);

    Ok(())
}

struct RawQuad;

impl amf_gateway_codec::ExternalCodec for RawQuad {
    fn decode(&self, reader: &mut Reader) -> Result<Vec<u8>, Error> {
        Ok(reader.read_exact(4)?.to_vec())
    }
}

#[test]
fn test_amf3_externalizable() -> Result<()> {
    let mut registry = TypeRegistry::default();
    registry.set_mapping("com.example.Quad", "Quad");
    registry.set_external("com.example.Quad", Box::new(RawQuad));

    let value = Value::External(std::rc::Rc::new(std::cell::RefCell::new(
        amf_gateway_codec::value::External {
            alias: "Quad".to_string(),
            data: vec![1, 2, 3, 4],
        },
    )));

    let bytes = amf3_bytes(&registry, &value)?;
    assert_eq!(amf3_value(&registry, &bytes)?, value);

    // decoding an externalizable with no registered handler is fatal.
    let bare = TypeRegistry::default();
    let err = amf3_value(&bare, &bytes).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::UnknownAlias(_))
    ));

    Ok(())
}

#[test]
fn test_amf0_strict_array_fixture() -> Result<()> {
    let registry = TypeRegistry::default();

    let array = Value::strict_array(vec![
        Value::Double(1.0),
        Value::Double(2.0),
        Value::Double(3.0),
    ]);

    let bytes = amf0_bytes(&registry, &array)?;
    assert_eq!(&bytes[..], samples::AMF0_STRICT_ARRAY);
    assert_eq!(amf0_value(&registry, samples::AMF0_STRICT_ARRAY)?, array);

    Ok(())
}

#[test]
fn test_amf0_round_trip() -> Result<()> {
    let mut registry = TypeRegistry::default();
    registry.set_mapping("com.example.Contact", "Contact");

    let values = vec![
        Value::Null,
        Value::Undefined,
        Value::Bool(true),
        Value::Double(-2.5),
        Value::string("panda"),
        Value::String("x".repeat(70000)),
        Value::Date(1230768000000.0),
        Value::XmlDocument("<a/>".to_string()),
        Value::anonymous(vec![("name".to_string(), Value::string("panda"))]),
        Value::object(
            Trait::dynamic("Contact"),
            Vec::new(),
            vec![("name".to_string(), Value::string("panda"))],
        ),
    ];

    for value in values {
        let bytes = amf0_bytes(&registry, &value)?;
        assert_eq!(amf0_value(&registry, &bytes)?, value);
    }

    // the typed object travels under its wire alias.
    let typed = Value::object(Trait::dynamic("Contact"), Vec::new(), Vec::new());
    let bytes = amf0_bytes(&registry, &typed)?;
    assert_eq!(&bytes[1..22], b"\x00\x13com.example.Contact");

    Ok(())
}

#[test]
fn test_amf0_reference_table() -> Result<()> {
    let registry = TypeRegistry::default();

    let shared = Value::anonymous(vec![("a".to_string(), Value::Double(1.0))]);
    let array = Value::strict_array(vec![shared.clone(), shared.clone()]);

    let bytes = amf0_bytes(&registry, &array)?;

    // exactly one inline object; the repeat is reference marker + u16
    // index 1 (the array holds slot 0).
    assert_eq!(bytes.iter().filter(|it| **it == 0x03).count(), 1);
    assert_eq!(&bytes[bytes.len() - 3..], &[0x07, 0x00, 0x01]);

    let decoded = amf0_value(&registry, &bytes)?;
    let decoded = decoded.as_array().unwrap().borrow();
    assert!(decoded.dense[0].is_same(&decoded.dense[1]));

    Ok(())
}

#[test]
fn test_amf0_array_markers() -> Result<()> {
    let registry = TypeRegistry::default();

    // associative numeric keys in dense order still count as strict.
    let strict = Value::Array(std::rc::Rc::new(std::cell::RefCell::new(
        amf_gateway_codec::value::Array {
            dense: Vec::new(),
            associative: vec![
                ("0".to_string(), Value::Double(1.0)),
                ("1".to_string(), Value::Double(2.0)),
            ],
        },
    )));
    assert_eq!(amf0_bytes(&registry, &strict)?[0], 0x0A);

    // dense positions and associative keys forming one contiguous
    // 0..n-1 run together still count as strict.
    let combined = Value::Array(std::rc::Rc::new(std::cell::RefCell::new(
        amf_gateway_codec::value::Array {
            dense: vec![Value::Double(1.0), Value::Double(2.0)],
            associative: vec![("2".to_string(), Value::Double(3.0))],
        },
    )));
    assert_eq!(&amf0_bytes(&registry, &combined)?[..], samples::AMF0_STRICT_ARRAY);

    // sparse numeric keys become an ECMA array.
    let ecma = Value::Array(std::rc::Rc::new(std::cell::RefCell::new(
        amf_gateway_codec::value::Array {
            dense: Vec::new(),
            associative: vec![("5".to_string(), Value::Double(1.0))],
        },
    )));
    assert_eq!(amf0_bytes(&registry, &ecma)?[0], 0x08);

    // any non-numeric key demotes the array to an anonymous object.
    let object = Value::Array(std::rc::Rc::new(std::cell::RefCell::new(
        amf_gateway_codec::value::Array {
            dense: vec![Value::Double(1.0)],
            associative: vec![("name".to_string(), Value::string("panda"))],
        },
    )));
    assert_eq!(amf0_bytes(&registry, &object)?[0], 0x03);

    Ok(())
}

#[test]
fn test_amf0_avmplus_escape() -> Result<()> {
    let registry = TypeRegistry::default();

    // 0x11 hands the rest of the value to a fresh AMF3 decoder.
    let bytes = [0x11u8, 0x04, 0x05];
    assert_eq!(amf0_value(&registry, &bytes)?, Value::Integer(5));

    Ok(())
}

#[test]
fn test_envelope_framing() -> Result<()> {
    let registry = TypeRegistry::default();

    let packet = Packet {
        version: 0,
        headers: Vec::new(),
        bodies: vec![
            Body {
                target_uri: "/1/onResult".to_string(),
                response_uri: "null".to_string(),
                data: Value::Bool(true),
            },
            Body {
                target_uri: "/2/onStatus".to_string(),
                response_uri: "null".to_string(),
                data: Value::Null,
            },
        ],
    };

    let bytes = envelope::encode_packet(&packet, &registry)?;

    // version + header count + body count, then per body: two u16
    // length-prefixed URIs, an i32 length of -1, and the value bytes.
    let body_1 = 2 + 11 + 2 + 4 + 4 + 2;
    let body_2 = 2 + 11 + 2 + 4 + 4 + 1;
    assert_eq!(bytes.len(), 6 + body_1 + body_2);

    assert_eq!(envelope::decode_packet(&bytes, &registry)?, packet);
    Ok(())
}

#[test]
fn test_envelope_versions() -> Result<()> {
    let registry = TypeRegistry::default();

    let packet = envelope::decode_packet(samples::AMF0_ECHO_REQUEST, &registry)?;
    assert_eq!(packet.version, 0);
    assert_eq!(packet.bodies[0].target_uri, "Svc.echo");
    assert_eq!(packet.bodies[0].response_uri, "/1");

    // FMS encoding is framed exactly like AMF0.
    let mut fms = samples::AMF0_ECHO_REQUEST.to_vec();
    fms[1] = 1;
    assert_eq!(
        envelope::decode_packet(&fms, &registry)?.bodies[0].target_uri,
        "Svc.echo"
    );

    let mut unknown = samples::AMF0_ECHO_REQUEST.to_vec();
    unknown[1] = 7;
    assert!(matches!(
        envelope::decode_packet(&unknown, &registry),
        Err(Error::UnknownVersion(7))
    ));

    Ok(())
}

#[test]
fn test_envelope_amf3_bodies() -> Result<()> {
    let registry = TypeRegistry::default();

    let mut packet = Packet::new(3);
    packet.headers.push(Header {
        name: "AppendToGatewayUrl".to_string(),
        must_understand: false,
        data: Value::string(";jsessionid=1"),
    });
    packet.bodies.push(Body {
        target_uri: "null".to_string(),
        response_uri: "/1".to_string(),
        data: Value::strict_array(vec![Value::Integer(42)]),
    });

    let bytes = envelope::encode_packet(&packet, &registry)?;
    let decoded = envelope::decode_packet(&bytes, &registry)?;

    assert_eq!(decoded.headers[0].name, "AppendToGatewayUrl");
    assert_eq!(decoded.bodies[0].data, packet.bodies[0].data);

    Ok(())
}

#[test]
fn test_envelope_messaging_unwrap() -> Result<()> {
    let registry = TypeRegistry::default();

    let message = Value::object(
        Trait::dynamic("RemotingMessage"),
        Vec::new(),
        vec![
            ("operation".to_string(), Value::string("echo")),
            ("source".to_string(), Value::string("Svc")),
            ("body".to_string(), Value::strict_array(Vec::new())),
        ],
    );

    let mut packet = Packet::new(3);
    packet.bodies.push(Body {
        target_uri: "null".to_string(),
        response_uri: "/1".to_string(),
        data: Value::strict_array(vec![message.clone()]),
    });

    let bytes = envelope::encode_packet(&packet, &registry)?;
    let decoded = envelope::decode_packet(&bytes, &registry)?;

    // the wrapping array collapses to the message itself.
    assert_eq!(decoded.bodies[0].data.alias().as_deref(), Some("RemotingMessage"));
    assert_eq!(
        decoded.bodies[0].data.member("operation"),
        Some(Value::string("echo"))
    );

    Ok(())
}

#[test]
fn test_truncated_input() {
    let registry = TypeRegistry::default();

    for size in 0..samples::AMF3_TYPED_VECTOR.len() {
        assert!(amf3_value(&registry, &samples::AMF3_TYPED_VECTOR[..size]).is_err());
    }
}
