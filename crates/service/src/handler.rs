//! Per-packet orchestration.
//!
//! A packet is handled body by body: the credentials header is resolved
//! first, each body is routed through the command state machine, the
//! RemotingMessage path or the plain `source.method` path, and every
//! failure is folded into an error body so that one broken call never
//! takes its siblings down. Only envelope decode errors abort a packet.

use crate::{
    Authenticator, Service,
    acl::GUEST_ROLE,
    cast,
    messaging::{self, operations},
};

use base64::{Engine, prelude::BASE64_STANDARD};
use bytes::BytesMut;
use codec::{
    Value,
    amf0::Amf0Encoder,
    amf3::Amf3Encoder,
    envelope::{AMF3_OBJECT_ENCODING, Body, Header, Packet},
    stream::Writer,
};

/// Header carrying `{ userid, password }` credentials for the packet.
pub const CREDENTIALS_HEADER: &str = "Credentials";
/// Response header asking the client to pin a header value.
pub const PERSISTENT_HEADER: &str = "RequestPersistentHeader";
/// Response header asking the client to extend its gateway url.
pub const APPEND_TO_GATEWAY_URL_HEADER: &str = "AppendToGatewayUrl";

/// Suffixes appended to the caller's response URI.
pub const RESULT_METHOD: &str = "/onResult";
pub const STATUS_METHOD: &str = "/onStatus";

/// Fault codes surfaced to the client.
pub const FAULT_PROCESSING: &str = "Server.Processing";
pub const FAULT_RESOURCE: &str = "Server.ResourceNotFound";
pub const FAULT_AUTHENTICATION: &str = "Server.Authentication";
pub const FAULT_AUTHORIZATION: &str = "Server.Authorization";
pub const FAULT_ENCODING: &str = "Server.Encoding";
pub const FAULT_COMMAND: &str = "Server.Command";

pub(crate) struct Fault {
    code: &'static str,
    message: String,
    detail: String,
    line: u32,
}

impl Fault {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: String::new(),
            line: 0,
        }
    }

    fn detailed(code: &'static str, message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: detail.into(),
            line: 0,
        }
    }
}

pub(crate) fn handle_packet<A>(service: &Service<A>, request: &Packet) -> Packet
where
    A: Authenticator,
{
    let mut response = Packet::new(request.version);
    let mut auth_error = None;

    // a credentials header authenticates the whole packet up front; on
    // failure every body reports the same fault and nothing runs.
    if let Some(header) = request
        .headers
        .iter()
        .find(|it| it.name == CREDENTIALS_HEADER)
    {
        match header_login(service, &header.data) {
            Ok(()) => response.headers.push(clear_credentials_header()),
            Err(fault) => auth_error = Some(fault),
        }
    }

    for body in &request.bodies {
        response
            .bodies
            .push(handle_body(service, request.version, body, auth_error.as_ref()));
    }

    response
}

fn handle_body<A>(
    service: &Service<A>,
    version: u16,
    request: &Body,
    auth_error: Option<&Fault>,
) -> Body
where
    A: Authenticator,
{
    if let Some(fault) = auth_error {
        return error_body(service, version, request, fault);
    }

    match run_body(service, request) {
        Ok(value) => {
            let response = Body {
                target_uri: format!("{}{}", request.response_uri, RESULT_METHOD),
                response_uri: "null".to_string(),
                data: value,
            };

            // an unencodable return value is a per-body fault, not a
            // broken envelope.
            match probe_encoding(service, version, &response.data) {
                Ok(()) => response,
                Err(error) => error_body(
                    service,
                    version,
                    request,
                    &Fault::detailed(FAULT_ENCODING, "Could not encode result", error.to_string()),
                ),
            }
        }
        Err(fault) => error_body(service, version, request, &fault),
    }
}

fn run_body<A>(service: &Service<A>, request: &Body) -> Result<Value, Fault>
where
    A: Authenticator,
{
    if let Some(command) = messaging::as_command(&request.data) {
        return run_command(service, command);
    }

    if let Some(call) = messaging::as_remoting(&request.data) {
        let value = dispatch(service, &call.source, &call.operation, call.args)?;
        return Ok(messaging::acknowledge(call.message_id.as_deref(), value));
    }

    // plain call: the target URI is `source.method`, or a bare method
    // name, and the body is the argument list.
    let (source, method) = match request.target_uri.rsplit_once('.') {
        Some((source, method)) => (source.to_string(), method.to_string()),
        None => (String::new(), request.target_uri.clone()),
    };

    let args = match &request.data {
        Value::Array(array) => array.borrow().dense.clone(),
        Value::Null | Value::Undefined => Vec::new(),
        other => vec![other.clone()],
    };

    dispatch(service, &source, &method, args)
}

/// The command message state machine. Operations are stateless per call;
/// the session lives with the authentication collaborator.
fn run_command<A>(service: &Service<A>, command: messaging::Command) -> Result<Value, Fault>
where
    A: Authenticator,
{
    let correlation = command.message_id.as_deref();

    match command.operation {
        operations::CLIENT_PING | operations::DISCONNECT => {
            Ok(messaging::acknowledge(correlation, Value::Null))
        }
        operations::LOGIN => {
            // the body is base64("userid:password").
            let encoded = command.body.as_str().unwrap_or_default().to_string();
            let decoded = BASE64_STANDARD
                .decode(encoded.as_bytes())
                .ok()
                .and_then(|it| String::from_utf8(it).ok())
                .ok_or_else(|| Fault::new(FAULT_AUTHENTICATION, "Invalid credentials format"))?;

            let (userid, password) = decoded
                .split_once(':')
                .ok_or_else(|| Fault::new(FAULT_AUTHENTICATION, "Invalid credentials format"))?;

            let result = authenticate(service, userid, password)?;

            // a token-bearing identity echoes "id:token" so the client
            // can resume the session.
            let body = match result {
                Some(identity) if identity.token.is_some() => Value::string(format!(
                    "{}:{}",
                    identity.id,
                    identity.token.unwrap_or_default()
                )),
                _ => Value::string(""),
            };

            Ok(messaging::acknowledge(correlation, body))
        }
        operations::LOGOUT => {
            service.authenticator.clear_identity();
            Ok(messaging::acknowledge(correlation, Value::Null))
        }
        other => Err(Fault::new(
            FAULT_COMMAND,
            format!("CommandMessage::{} not implemented", other),
        )),
    }
}

fn dispatch<A>(
    service: &Service<A>,
    source: &str,
    method: &str,
    mut args: Vec<Value>,
) -> Result<Value, Fault>
where
    A: Authenticator,
{
    // the source is an ActionScript class identifier; translate it
    // through the alias map before composing the dispatch key.
    let class = match source {
        "" | "null" => String::new(),
        source => service.registry.class_of(source).to_string(),
    };

    let qualified = if class.is_empty() {
        method.to_string()
    } else {
        format!("{}.{}", class, method)
    };

    let mut table = service.dispatch.read();
    if table.get(&qualified).is_none() && !class.is_empty() {
        drop(table);

        // one shot at loading and registering the class on a miss.
        if let Some(loader) = &service.loader {
            if let Some(reflection) = loader.load(&class) {
                log::info!("autoload: class={}", class);
                let _ = service.dispatch.write().register_class(reflection, None);
            }
        }

        table = service.dispatch.read();
    }

    let Some(entry) = table.get(&qualified) else {
        return Err(Fault::new(
            FAULT_RESOURCE,
            format!("Method \"{}\" does not exist", method),
        ));
    };

    // registration-time fixed arguments land after the caller's.
    args.extend(entry.fixed_args.iter().cloned());
    cast::cast_parameters(&service.registry, &entry.prototypes, &mut args);

    check_acl(service, &class, method)?;

    log::info!("invoke: target={}", entry.qualified_name);
    entry
        .invoke(&args)
        .map_err(|message| Fault::detailed(FAULT_PROCESSING, message, entry.qualified_name.as_str()))
}

fn check_acl<A>(service: &Service<A>, class: &str, method: &str) -> Result<(), Fault>
where
    A: Authenticator,
{
    let acl = service.acl.read();
    let Some(acl) = acl.as_ref() else {
        return Ok(());
    };

    let role = match service.authenticator.get_identity() {
        Some(identity) => identity.role,
        None if acl.has_role(GUEST_ROLE) => GUEST_ROLE.to_string(),
        None => {
            return Err(Fault::new(FAULT_AUTHENTICATION, "Access not allowed"));
        }
    };

    let resource = (!class.is_empty() && acl.has_resource(class)).then_some(class);
    if acl.is_allowed(Some(&role), resource, Some(method)) {
        Ok(())
    } else {
        log::warn!("deny: role={}, class={}, method={}", role, class, method);
        Err(Fault::new(FAULT_AUTHORIZATION, "Access not allowed"))
    }
}

fn header_login<A>(service: &Service<A>, data: &Value) -> Result<(), Fault>
where
    A: Authenticator,
{
    let userid = data
        .member("userid")
        .and_then(|it| it.as_str().map(|it| it.to_string()))
        .unwrap_or_default();

    let password = data
        .member("password")
        .and_then(|it| it.as_str().map(|it| it.to_string()))
        .unwrap_or_default();

    authenticate(service, &userid, &password)?;
    Ok(())
}

fn authenticate<A>(
    service: &Service<A>,
    userid: &str,
    password: &str,
) -> Result<Option<crate::Identity>, Fault>
where
    A: Authenticator,
{
    service.authenticator.set_credentials(userid, password);
    let result = service.authenticator.authenticate();

    log::info!("auth: userid={:?}, valid={}", userid, result.valid);

    if !result.valid {
        let message = if result.messages.is_empty() {
            "Authentication failed".to_string()
        } else {
            result.messages.join("; ")
        };

        return Err(Fault::new(FAULT_AUTHENTICATION, message));
    }

    Ok(result.identity)
}

/// Ask the client to clear the credentials header on later packets.
fn clear_credentials_header() -> Header {
    Header {
        name: PERSISTENT_HEADER.to_string(),
        must_understand: false,
        data: Value::anonymous(vec![
            ("name".to_string(), Value::string(CREDENTIALS_HEADER)),
            ("mustUnderstand".to_string(), Value::Bool(false)),
            ("data".to_string(), Value::Null),
        ]),
    }
}

fn error_body<A>(service: &Service<A>, version: u16, request: &Body, fault: &Fault) -> Body
where
    A: Authenticator,
{
    // production deployments keep fault diagnostics server-side.
    let (message, detail, line) = if service.production {
        (String::new(), String::new(), 0)
    } else {
        (fault.message.clone(), fault.detail.clone(), fault.line)
    };

    let data = if version == AMF3_OBJECT_ENCODING {
        messaging::error_message(
            messaging::message_id(&request.data).as_deref(),
            fault.code,
            &message,
            &detail,
        )
    } else {
        Value::anonymous(vec![
            ("description".to_string(), Value::string(message)),
            ("detail".to_string(), Value::string(detail)),
            ("line".to_string(), Value::Integer(line as i32)),
            ("code".to_string(), Value::string(fault.code)),
        ])
    };

    Body {
        target_uri: format!("{}{}", request.response_uri, STATUS_METHOD),
        response_uri: "null".to_string(),
        data,
    }
}

/// Encode the value against scratch tables so an encoding failure can be
/// reported per body instead of poisoning the envelope.
fn probe_encoding<A>(service: &Service<A>, version: u16, value: &Value) -> Result<(), codec::Error>
where
    A: Authenticator,
{
    let mut scratch = BytesMut::with_capacity(256);
    let mut writer = Writer::new(&mut scratch);

    if version == AMF3_OBJECT_ENCODING {
        Amf3Encoder::new(&service.registry).encode(&mut writer, value)
    } else {
        Amf0Encoder::new(&service.registry).encode(&mut writer, value)
    }
}
