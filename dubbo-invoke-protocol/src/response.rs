//! Response bodies.
//!
//! An OK response body starts with a response flag (a compact Hessian2 int)
//! followed by the result value or exception, and optionally an attachment
//! map. A response with any other status carries an error message string.

use crate::error::{ProtocolError, SerializationError};
use crate::exception::{clean_binary, into_exception_info, parse_exception_info};
use crate::frame::{Frame, Status};
use crate::hessian::{HessianReader, HessianWriter};
use crate::value::Value;
use bytes::Bytes;
use std::collections::BTreeMap;

pub const RESPONSE_WITH_EXCEPTION: u8 = 0;
pub const RESPONSE_VALUE: u8 = 1;
pub const RESPONSE_NULL_VALUE: u8 = 2;
pub const RESPONSE_WITH_EXCEPTION_WITH_ATTACHMENTS: u8 = 3;
pub const RESPONSE_VALUE_WITH_ATTACHMENTS: u8 = 4;
pub const RESPONSE_NULL_VALUE_WITH_ATTACHMENTS: u8 = 5;

/// Hessian2 encodes the flags as single-byte compact ints.
const COMPACT_ZERO: u8 = 0x90;

/// Class used when an exception has no concrete type.
const DEFAULT_EXCEPTION_CLASS: &str = "java.lang.RuntimeException";

/// What a response carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// A normal return value (possibly null).
    Value,
    /// The remote method threw; the value is [`Value::ExceptionInfo`].
    Exception,
    /// The frame status is not OK; the value is the error message.
    Error,
}

/// A decoded response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub request_id: u64,
    pub status: Status,
    pub kind: ResponseKind,
    pub value: Value,
    pub attachments: BTreeMap<String, String>,
}

impl Response {
    /// Creates a successful response.
    pub fn value(request_id: u64, value: Value) -> Self {
        Self {
            request_id,
            status: Status::OK,
            kind: ResponseKind::Value,
            value,
            attachments: BTreeMap::new(),
        }
    }

    /// Creates a response reporting a thrown exception.
    pub fn exception(request_id: u64, class: &str, message: &str) -> Self {
        let mut info = BTreeMap::new();
        info.insert("type".to_string(), class.to_string());
        info.insert("message".to_string(), message.to_string());
        Self {
            request_id,
            status: Status::OK,
            kind: ResponseKind::Exception,
            value: Value::ExceptionInfo(info),
            attachments: BTreeMap::new(),
        }
    }

    /// Creates a failed response with a non-OK status.
    pub fn error(request_id: u64, status: Status, message: impl Into<String>) -> Self {
        Self {
            request_id,
            status,
            kind: ResponseKind::Error,
            value: Value::String(message.into()),
            attachments: BTreeMap::new(),
        }
    }

    pub fn with_attachment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attachments.insert(key.into(), value.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.kind == ResponseKind::Value
    }

    /// Serializes the response body.
    pub fn encode_body(&self) -> Result<Bytes, SerializationError> {
        let mut w = HessianWriter::new();
        let with_attachments = !self.attachments.is_empty();

        match self.kind {
            ResponseKind::Error => {
                w.write_string(&self.value.to_string());
                return Ok(w.into_bytes());
            }
            ResponseKind::Value if self.value.is_null() => {
                w.write_int(flag(RESPONSE_NULL_VALUE, with_attachments) as i32);
            }
            ResponseKind::Value => {
                w.write_int(flag(RESPONSE_VALUE, with_attachments) as i32);
                w.write_value(&self.value)?;
            }
            ResponseKind::Exception => {
                w.write_int(flag(RESPONSE_WITH_EXCEPTION, with_attachments) as i32);
                write_exception(&mut w, &self.value);
            }
        }

        if with_attachments {
            w.write_attachments(&self.attachments);
        }
        Ok(w.into_bytes())
    }

    /// Builds the response frame.
    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        Ok(Frame::response(
            self.request_id,
            self.status,
            self.encode_body()?,
        ))
    }
}

fn flag(base: u8, with_attachments: bool) -> u8 {
    if with_attachments {
        base + 3
    } else {
        base
    }
}

/// Writes an exception as a one-field class definition and its instance.
fn write_exception(w: &mut HessianWriter, value: &Value) {
    let (class, message) = match value {
        Value::ExceptionInfo(info) => {
            let class = info
                .get("type")
                .filter(|t| t.contains('.'))
                .map(String::as_str)
                .unwrap_or(DEFAULT_EXCEPTION_CLASS);
            let message = info.get("message").cloned().unwrap_or_default();
            (class, message)
        }
        other => (DEFAULT_EXCEPTION_CLASS, other.to_string()),
    };

    w.write_raw(b'C');
    w.write_string(class);
    w.write_int(1);
    w.write_string("detailMessage");
    w.write_raw(0x60);
    w.write_string(&message);
}

/// Decodes the body of a response frame.
///
/// Never fails: undecodable content degrades to placeholder values, mined
/// exception text or cleaned raw text.
pub fn decode_response(frame: &Frame) -> Response {
    let mut response = Response {
        request_id: frame.request_id,
        status: frame.status,
        kind: ResponseKind::Value,
        value: Value::Null,
        attachments: BTreeMap::new(),
    };

    if !frame.status.is_ok() {
        tracing::warn!(
            status = %frame.status,
            request_id = frame.request_id,
            "response status is not OK"
        );
        response.kind = ResponseKind::Error;
        response.value = Value::String(error_message(&frame.body));
        return response;
    }

    let body = &frame.body[..];
    if body.is_empty() {
        return response;
    }

    let mut reader = HessianReader::new(body);
    let flag = match reader.read_byte() {
        Ok(byte @ COMPACT_ZERO..=0x95) => byte - COMPACT_ZERO,
        Ok(byte) => {
            tracing::warn!("unknown response flag {:#04x}, decoding value anyway", byte);
            RESPONSE_VALUE
        }
        Err(_) => return response,
    };
    tracing::debug!(flag, len = body.len(), "decoding response body");

    match flag {
        RESPONSE_NULL_VALUE | RESPONSE_NULL_VALUE_WITH_ATTACHMENTS => {}
        RESPONSE_WITH_EXCEPTION | RESPONSE_WITH_EXCEPTION_WITH_ATTACHMENTS => {
            response.kind = ResponseKind::Exception;
            response.value = into_exception_info(read_or_mine(&mut reader));
        }
        _ => response.value = read_or_mine(&mut reader),
    }

    if flag >= RESPONSE_WITH_EXCEPTION_WITH_ATTACHMENTS && !reader.is_empty() {
        match reader.read_value() {
            Ok(Value::Map(entries)) => {
                response.attachments = entries
                    .into_iter()
                    .map(|(key, value)| (key, value.to_string()))
                    .collect();
            }
            Ok(other) => tracing::debug!(kind = other.kind(), "ignoring non-map attachments"),
            Err(err) => tracing::debug!(error = %err, "unreadable attachments"),
        }
    }

    response
}

/// Reads the payload value, falling back to text mining when the value is
/// structurally broken.
fn read_or_mine(reader: &mut HessianReader<'_>) -> Value {
    let rest = reader.rest();
    match reader.read_value() {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(error = %err, "response value undecodable, mining raw text");
            parse_exception_info(&String::from_utf8_lossy(rest))
        }
    }
}

fn error_message(body: &[u8]) -> String {
    if body.is_empty() {
        return String::new();
    }
    match HessianReader::new(body).read_value() {
        Ok(Value::String(message)) => message,
        _ => clean_binary(body),
    }
}
