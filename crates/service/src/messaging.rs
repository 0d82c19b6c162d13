//! The flex messaging envelope classes.
//!
//! AMF3 clients wrap every call in a `flex.messaging.messages.*` object:
//! RemotingMessage for method calls, CommandMessage for the session
//! state machine, and AcknowledgeMessage/ErrorMessage on the way back.
//! The type registry maps the wire aliases to the short class ids used
//! here.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use codec::{Trait, Value};

pub const REMOTING_MESSAGE: &str = "RemotingMessage";
pub const COMMAND_MESSAGE: &str = "CommandMessage";
pub const ACKNOWLEDGE_MESSAGE: &str = "AcknowledgeMessage";
pub const ERROR_MESSAGE: &str = "ErrorMessage";

/// CommandMessage operation codes.
pub mod operations {
    pub const SUBSCRIBE: u32 = 0;
    pub const UNSUBSCRIBE: u32 = 1;
    pub const POLL: u32 = 2;
    pub const CLIENT_SYNC: u32 = 4;
    pub const CLIENT_PING: u32 = 5;
    pub const LOGIN: u32 = 8;
    pub const LOGOUT: u32 = 9;
    pub const SESSION_INVALIDATE: u32 = 10;
    pub const MULTI_SUBSCRIBE: u32 = 11;
    pub const DISCONNECT: u32 = 12;
    pub const UNKNOWN: u32 = 10000;
}

/// A parsed CommandMessage.
#[derive(Debug)]
pub struct Command {
    pub operation: u32,
    pub body: Value,
    pub message_id: Option<String>,
}

/// A parsed RemotingMessage.
#[derive(Debug)]
pub struct RemotingCall {
    pub source: String,
    pub operation: String,
    pub args: Vec<Value>,
    pub message_id: Option<String>,
}

pub fn as_command(value: &Value) -> Option<Command> {
    if !has_alias(value, COMMAND_MESSAGE) {
        return None;
    }

    Some(Command {
        operation: value
            .member("operation")
            .and_then(|it| it.as_f64())
            .map(|it| it as u32)
            .unwrap_or(operations::UNKNOWN),
        body: value.member("body").unwrap_or(Value::Null),
        message_id: message_id(value),
    })
}

pub fn as_remoting(value: &Value) -> Option<RemotingCall> {
    if !has_alias(value, REMOTING_MESSAGE) {
        return None;
    }

    let args = match value.member("body") {
        Some(Value::Array(array)) => array.borrow().dense.clone(),
        Some(Value::Null) | Some(Value::Undefined) | None => Vec::new(),
        Some(other) => vec![other],
    };

    Some(RemotingCall {
        source: value
            .member("source")
            .and_then(|it| it.as_str().map(|it| it.to_string()))
            .unwrap_or_default(),
        operation: value
            .member("operation")
            .and_then(|it| it.as_str().map(|it| it.to_string()))
            .unwrap_or_default(),
        args,
        message_id: message_id(value),
    })
}

pub fn message_id(value: &Value) -> Option<String> {
    value
        .member("messageId")
        .and_then(|it| it.as_str().map(|it| it.to_string()))
}

/// Build the AcknowledgeMessage for a handled call.
pub fn acknowledge(correlation_id: Option<&str>, body: Value) -> Value {
    message(ACKNOWLEDGE_MESSAGE, correlation_id, body, Vec::new())
}

/// Build the ErrorMessage for a failed call.
pub fn error_message(
    correlation_id: Option<&str>,
    fault_code: &str,
    fault_string: &str,
    fault_detail: &str,
) -> Value {
    message(
        ERROR_MESSAGE,
        correlation_id,
        Value::Null,
        vec![
            ("faultCode".to_string(), Value::string(fault_code)),
            ("faultString".to_string(), Value::string(fault_string)),
            ("faultDetail".to_string(), Value::string(fault_detail)),
            ("rootCause".to_string(), Value::Null),
        ],
    )
}

fn message(
    class: &str,
    correlation_id: Option<&str>,
    body: Value,
    extra: Vec<(String, Value)>,
) -> Value {
    let mut fields = vec![
        ("messageId".to_string(), Value::string(next_id())),
        ("clientId".to_string(), Value::string(next_id())),
        ("destination".to_string(), Value::string("")),
        (
            "correlationId".to_string(),
            Value::string(correlation_id.unwrap_or("")),
        ),
        ("timestamp".to_string(), Value::Double(timestamp())),
        ("timeToLive".to_string(), Value::Double(0.0)),
        ("headers".to_string(), Value::anonymous(Vec::new())),
        ("body".to_string(), body),
    ];

    fields.extend(extra);
    Value::object(Trait::dynamic(class), Vec::new(), fields)
}

fn has_alias(value: &Value, class: &str) -> bool {
    match value.alias() {
        Some(alias) => {
            alias == class || alias == format!("flex.messaging.messages.{}", class)
        }
        None => false,
    }
}

fn timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as f64
}

/// Unique-enough message ids: wall clock plus a process counter.
fn next_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    format!(
        "{:X}-{:X}",
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}
