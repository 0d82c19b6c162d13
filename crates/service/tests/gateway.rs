use anyhow::Result;
use parking_lot::Mutex;

use amf_gateway_service::{
    AuthResult, Authenticator, Identity, Service, ServiceOptions,
    acl::Acl,
    handler::{CREDENTIALS_HEADER, PERSISTENT_HEADER},
    messaging::operations,
    reflect::{ClassReflection, FunctionReflection, MethodReflection, Param},
};

use codec::{
    Trait, TypeRegistry, Value,
    envelope::{self, Body, Header, Packet},
};

#[derive(Default)]
struct TestAuth {
    credentials: Mutex<Option<(String, String)>>,
    identity: Mutex<Option<Identity>>,
}

impl Authenticator for TestAuth {
    fn set_credentials(&self, userid: &str, password: &str) {
        *self.credentials.lock() = Some((userid.to_string(), password.to_string()));
    }

    fn authenticate(&self) -> AuthResult {
        let valid = matches!(
            self.credentials.lock().as_ref(),
            Some((userid, password)) if userid == "alice" && password == "secret"
        );

        if !valid {
            return AuthResult {
                valid: false,
                identity: None,
                messages: vec!["Wrong credentials".to_string()],
                code: 401,
            };
        }

        let identity = Identity {
            id: "u1".to_string(),
            role: "staff".to_string(),
            token: Some("t".to_string()),
        };

        *self.identity.lock() = Some(identity.clone());
        AuthResult {
            valid: true,
            identity: Some(identity),
            messages: Vec::new(),
            code: 0,
        }
    }

    fn has_identity(&self) -> bool {
        self.identity.lock().is_some()
    }

    fn get_identity(&self) -> Option<Identity> {
        self.identity.lock().clone()
    }

    fn clear_identity(&self) {
        *self.identity.lock() = None;
    }
}

fn test_service() -> Service<TestAuth> {
    let service = Service::new(ServiceOptions {
        authenticator: TestAuth::default(),
        registry: TypeRegistry::default(),
        production: false,
        loader: None,
    });

    service
        .register_class(
            ClassReflection::new(
                "Svc",
                vec![
                    MethodReflection::new("echo", vec![vec![Param::new("value")]], |args| {
                        Ok(args.first().cloned().unwrap_or(Value::Null))
                    }),
                    MethodReflection::new("fail", vec![Vec::new()], |_| Err("boom".to_string())),
                ],
            ),
            None,
        )
        .unwrap();

    service
}

fn amf0_call(target: &str, response: &str, args: Vec<Value>) -> Body {
    Body {
        target_uri: target.to_string(),
        response_uri: response.to_string(),
        data: Value::strict_array(args),
    }
}

fn serve(service: &Service<TestAuth>, request: &Packet) -> Result<Packet> {
    let bytes = envelope::encode_packet(request, service.registry())?;
    let response = service.serve(&bytes)?;
    Ok(envelope::decode_packet(&response, service.registry())?)
}

#[test]
fn test_amf0_call() -> Result<()> {
    let service = test_service();

    let mut request = Packet::new(0);
    request
        .bodies
        .push(amf0_call("Svc.echo", "/1", vec![Value::string("panda")]));

    let response = serve(&service, &request)?;

    assert_eq!(response.version, 0);
    assert_eq!(response.bodies[0].target_uri, "/1/onResult");
    assert_eq!(response.bodies[0].response_uri, "null");
    assert_eq!(response.bodies[0].data, Value::string("panda"));

    Ok(())
}

#[test]
fn test_bare_function_call() -> Result<()> {
    let service = test_service();
    service
        .register_function(
            FunctionReflection::new("time", vec![Vec::new()], |_| Ok(Value::Double(1.0))),
            None,
        )
        .unwrap();

    let mut request = Packet::new(0);
    request.bodies.push(amf0_call("time", "/1", Vec::new()));

    let response = serve(&service, &request)?;
    assert_eq!(response.bodies[0].data, Value::Double(1.0));

    Ok(())
}

#[test]
fn test_duplicate_registration_is_immediate() {
    let service = test_service();

    let result = service.register_class(
        ClassReflection::new(
            "Svc",
            vec![MethodReflection::new("echo", vec![Vec::new()], |_| {
                Ok(Value::Null)
            })],
        ),
        None,
    );

    assert!(matches!(
        result,
        Err(amf_gateway_service::Error::DuplicateName(name)) if name == "Svc.echo"
    ));
}

#[test]
fn test_missing_method_isolates_bodies() -> Result<()> {
    let service = test_service();

    let mut request = Packet::new(0);
    request.bodies.push(amf0_call("Svc.missing", "/1", Vec::new()));
    request
        .bodies
        .push(amf0_call("Svc.echo", "/2", vec![Value::Bool(true)]));

    let response = serve(&service, &request)?;

    assert_eq!(response.bodies[0].target_uri, "/1/onStatus");
    assert_eq!(
        response.bodies[0].data.member("description"),
        Some(Value::string("Method \"missing\" does not exist"))
    );

    // the broken body never touches its sibling.
    assert_eq!(response.bodies[1].target_uri, "/2/onResult");
    assert_eq!(response.bodies[1].data, Value::Bool(true));

    Ok(())
}

#[test]
fn test_invocable_error_becomes_status_body() -> Result<()> {
    let service = test_service();

    let mut request = Packet::new(0);
    request.bodies.push(amf0_call("Svc.fail", "/1", Vec::new()));

    let response = serve(&service, &request)?;

    assert_eq!(response.bodies[0].target_uri, "/1/onStatus");
    assert_eq!(
        response.bodies[0].data.member("description"),
        Some(Value::string("boom"))
    );

    Ok(())
}

#[test]
fn test_production_mode_scrubs_diagnostics() -> Result<()> {
    let service = Service::new(ServiceOptions {
        authenticator: TestAuth::default(),
        registry: TypeRegistry::default(),
        production: true,
        loader: None,
    });

    let mut request = Packet::new(0);
    request.bodies.push(amf0_call("Svc.echo", "/1", Vec::new()));

    let response = serve(&service, &request)?;

    assert_eq!(response.bodies[0].target_uri, "/1/onStatus");
    assert_eq!(
        response.bodies[0].data.member("description"),
        Some(Value::string(""))
    );
    assert_eq!(
        response.bodies[0].data.member("code"),
        Some(Value::string("Server.ResourceNotFound"))
    );

    Ok(())
}

fn command(operation: u32, body: Value) -> Value {
    Value::object(
        Trait::dynamic("CommandMessage"),
        Vec::new(),
        vec![
            ("operation".to_string(), Value::Integer(operation as i32)),
            ("body".to_string(), body),
            ("messageId".to_string(), Value::string("m-1")),
        ],
    )
}

#[test]
fn test_command_login() -> Result<()> {
    let service = test_service();

    let mut request = Packet::new(3);
    request.bodies.push(Body {
        target_uri: "null".to_string(),
        response_uri: "/1".to_string(),
        // base64("alice:secret")
        data: command(operations::LOGIN, Value::string("YWxpY2U6c2VjcmV0")),
    });

    let response = serve(&service, &request)?;
    let ack = &response.bodies[0].data;

    assert_eq!(response.bodies[0].target_uri, "/1/onResult");
    assert_eq!(ack.alias().as_deref(), Some("AcknowledgeMessage"));
    assert_eq!(ack.member("correlationId"), Some(Value::string("m-1")));

    // the token-bearing identity reports "id:token".
    assert_eq!(ack.member("body"), Some(Value::string("u1:t")));
    assert!(service.authenticator().has_identity());

    Ok(())
}

#[test]
fn test_command_login_rejected() -> Result<()> {
    let service = test_service();

    let mut request = Packet::new(3);
    request.bodies.push(Body {
        target_uri: "null".to_string(),
        response_uri: "/1".to_string(),
        // base64("alice:wrong")
        data: command(operations::LOGIN, Value::string("YWxpY2U6d3Jvbmc=")),
    });

    let response = serve(&service, &request)?;
    let fault = &response.bodies[0].data;

    assert_eq!(response.bodies[0].target_uri, "/1/onStatus");
    assert_eq!(fault.alias().as_deref(), Some("ErrorMessage"));
    assert_eq!(fault.member("faultString"), Some(Value::string("Wrong credentials")));

    Ok(())
}

#[test]
fn test_command_ping_logout_and_unknown() -> Result<()> {
    let service = test_service();

    let mut request = Packet::new(3);
    for (index, operation) in [
        operations::CLIENT_PING,
        operations::LOGOUT,
        operations::SUBSCRIBE,
    ]
    .iter()
    .enumerate()
    {
        request.bodies.push(Body {
            target_uri: "null".to_string(),
            response_uri: format!("/{}", index + 1),
            data: command(*operation, Value::Null),
        });
    }

    let response = serve(&service, &request)?;

    assert_eq!(response.bodies[0].target_uri, "/1/onResult");
    assert_eq!(response.bodies[1].target_uri, "/2/onResult");

    // unsupported operations are a per-body error.
    assert_eq!(response.bodies[2].target_uri, "/3/onStatus");
    assert_eq!(
        response.bodies[2].data.member("faultString"),
        Some(Value::string("CommandMessage::0 not implemented"))
    );

    Ok(())
}

#[test]
fn test_remoting_message_dispatch() -> Result<()> {
    let service = test_service();

    let message = Value::object(
        Trait::dynamic("RemotingMessage"),
        Vec::new(),
        vec![
            ("operation".to_string(), Value::string("echo")),
            ("source".to_string(), Value::string("Svc")),
            (
                "body".to_string(),
                Value::strict_array(vec![Value::string("panda")]),
            ),
            ("messageId".to_string(), Value::string("m-7")),
        ],
    );

    let mut request = Packet::new(3);
    request.bodies.push(Body {
        target_uri: "null".to_string(),
        response_uri: "/1".to_string(),
        // clients ship the message wrapped in a one-element array.
        data: Value::strict_array(vec![message]),
    });

    let response = serve(&service, &request)?;
    let ack = &response.bodies[0].data;

    assert_eq!(ack.alias().as_deref(), Some("AcknowledgeMessage"));
    assert_eq!(ack.member("correlationId"), Some(Value::string("m-7")));
    assert_eq!(ack.member("body"), Some(Value::string("panda")));

    Ok(())
}

#[test]
fn test_credentials_header() -> Result<()> {
    let service = test_service();

    let mut request = Packet::new(0);
    request.headers.push(Header {
        name: CREDENTIALS_HEADER.to_string(),
        must_understand: false,
        data: Value::anonymous(vec![
            ("userid".to_string(), Value::string("alice")),
            ("password".to_string(), Value::string("secret")),
        ]),
    });
    request
        .bodies
        .push(amf0_call("Svc.echo", "/1", vec![Value::Null]));

    let response = serve(&service, &request)?;

    // the gateway asks the client to drop the header from now on.
    assert_eq!(response.headers[0].name, PERSISTENT_HEADER);
    assert_eq!(
        response.headers[0].data.member("name"),
        Some(Value::string(CREDENTIALS_HEADER))
    );
    assert_eq!(response.bodies[0].target_uri, "/1/onResult");
    assert!(service.authenticator().has_identity());

    Ok(())
}

#[test]
fn test_bad_credentials_header_fails_every_body() -> Result<()> {
    let service = test_service();

    let mut request = Packet::new(0);
    request.headers.push(Header {
        name: CREDENTIALS_HEADER.to_string(),
        must_understand: false,
        data: Value::anonymous(vec![
            ("userid".to_string(), Value::string("alice")),
            ("password".to_string(), Value::string("nope")),
        ]),
    });
    request.bodies.push(amf0_call("Svc.echo", "/1", Vec::new()));
    request.bodies.push(amf0_call("Svc.echo", "/2", Vec::new()));

    let response = serve(&service, &request)?;

    assert!(response.headers.is_empty());
    assert_eq!(response.bodies[0].target_uri, "/1/onStatus");
    assert_eq!(response.bodies[1].target_uri, "/2/onStatus");
    assert_eq!(
        response.bodies[0].data.member("description"),
        Some(Value::string("Wrong credentials"))
    );

    Ok(())
}

#[test]
fn test_acl_denies_and_allows() -> Result<()> {
    let service = test_service();

    let mut acl = Acl::new();
    acl.add_role("staff", &[]).unwrap();
    acl.add_resource("Svc", None).unwrap();
    acl.allow(Some(&["staff"]), Some(&["Svc"]), Some(&["echo"]), None)
        .unwrap();
    service.set_acl(acl);

    // no identity, no guest role: authentication fault.
    let mut request = Packet::new(0);
    request.bodies.push(amf0_call("Svc.echo", "/1", Vec::new()));
    let response = serve(&service, &request)?;
    assert_eq!(response.bodies[0].target_uri, "/1/onStatus");

    // authenticated as staff: echo allowed, fail not.
    service.authenticator().set_credentials("alice", "secret");
    assert!(service.authenticator().authenticate().valid);

    let mut request = Packet::new(0);
    request.bodies.push(amf0_call("Svc.echo", "/1", Vec::new()));
    request.bodies.push(amf0_call("Svc.fail", "/2", Vec::new()));

    let response = serve(&service, &request)?;
    assert_eq!(response.bodies[0].target_uri, "/1/onResult");
    assert_eq!(response.bodies[1].target_uri, "/2/onStatus");
    assert_eq!(
        response.bodies[1].data.member("description"),
        Some(Value::string("Access not allowed"))
    );

    Ok(())
}

#[test]
fn test_acl_guest_role() -> Result<()> {
    let service = test_service();

    let mut acl = Acl::new();
    acl.add_role("anonymous", &[]).unwrap();
    acl.add_resource("Svc", None).unwrap();
    acl.allow(Some(&["anonymous"]), Some(&["Svc"]), Some(&["echo"]), None)
        .unwrap();
    service.set_acl(acl);

    let mut request = Packet::new(0);
    request.bodies.push(amf0_call("Svc.echo", "/1", Vec::new()));

    // unauthenticated callers ride on the guest role when it exists.
    let response = serve(&service, &request)?;
    assert_eq!(response.bodies[0].target_uri, "/1/onResult");

    Ok(())
}

#[test]
fn test_acl_inheritance_priority() -> Result<()> {
    // roles: user inherits [guest, admin], admin added last; a deny on
    // admin and an allow on guest for the same privilege resolves to
    // deny because the last added parent is searched first.
    let mut acl = Acl::new();
    acl.add_role("guest", &[]).unwrap();
    acl.add_role("admin", &[]).unwrap();
    acl.add_role("user", &["guest", "admin"]).unwrap();
    acl.add_resource("r", None).unwrap();

    acl.allow(Some(&["guest"]), Some(&["r"]), Some(&["read"]), None)
        .unwrap();
    acl.deny(Some(&["admin"]), Some(&["r"]), Some(&["read"]), None)
        .unwrap();

    assert!(!acl.is_allowed(Some("user"), Some("r"), Some("read")));
    Ok(())
}

#[test]
fn test_fixed_args_are_appended() -> Result<()> {
    let service = test_service();
    service
        .register_function(
            FunctionReflection::new(
                "join",
                vec![vec![Param::new("a"), Param::new("b")]],
                |args| {
                    let mut joined = String::new();
                    for arg in args {
                        joined.push_str(arg.as_str().unwrap_or("?"));
                    }
                    Ok(Value::string(joined))
                },
            )
            .with_fixed_args(vec![Value::string("!")]),
            None,
        )
        .unwrap();

    let mut request = Packet::new(0);
    request
        .bodies
        .push(amf0_call("join", "/1", vec![Value::string("hi")]));

    let response = serve(&service, &request)?;
    assert_eq!(response.bodies[0].data, Value::string("hi!"));

    Ok(())
}
