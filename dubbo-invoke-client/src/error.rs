//! Client error types and the fallback decision table.

use crate::config::ConfigError;
use dubbo_invoke_protocol::{ProtocolError, SerializationError, Status, Value};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Socket-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection refused by {addr}")]
    ConnectionRefused { addr: String },

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{op} timed out after {}ms", .timeout.as_millis())]
    Timeout { op: &'static str, timeout: Duration },

    #[error("unknown host: {0}")]
    UnknownHost(String),

    #[error("truncated read: expected {expected} bytes, received {received}")]
    Truncated { expected: usize, received: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Classifies a failed connect.
    pub(crate) fn connect(addr: impl Into<String>, err: std::io::Error) -> Self {
        let addr = addr.into();
        if err.kind() == std::io::ErrorKind::ConnectionRefused {
            TransportError::ConnectionRefused { addr }
        } else {
            TransportError::Connect { addr, source: err }
        }
    }
}

/// Failures turning an address into providers.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("unsupported address scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("no provider available for {service} at {registry}")]
    NoProvider { service: String, registry: String },

    #[error("registry {registry} unavailable: {reason}")]
    RegistryUnavailable { registry: String, reason: String },

    #[error("registry error: {0}")]
    Registry(String),

    #[error("registry {0} requires authentication")]
    AuthenticationRequired(String),
}

/// One fallback layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    GenericReference,
    DirectProtocol,
    Http,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Layer::GenericReference => "generic reference",
            Layer::DirectProtocol => "direct protocol",
            Layer::Http => "http",
        };
        f.write_str(name)
    }
}

/// Whether a failed layer hands over to the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    Continue,
    Terminal,
}

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("remote exception: {}", exception_summary(.0))]
    Application(Value),

    #[error("remote status {status}: {message}")]
    Remote { status: Status, message: String },

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("all invocation layers failed: {}", attempts_summary(.0))]
    FallbackExhausted(Vec<(Layer, ClientError)>),
}

impl ClientError {
    /// Decides whether the next layer of the chain should be tried.
    pub fn fallback(&self) -> Fallback {
        match self {
            ClientError::Transport(_) => Fallback::Continue,
            ClientError::Protocol(ProtocolError::Serialization(_)) => Fallback::Terminal,
            ClientError::Protocol(_) => Fallback::Continue,
            ClientError::Resolution(
                ResolutionError::RegistryUnavailable { .. } | ResolutionError::Registry(_),
            ) => Fallback::Continue,
            ClientError::Remote { status, .. } => match *status {
                Status::CLIENT_TIMEOUT
                | Status::SERVER_TIMEOUT
                | Status::BAD_REQUEST
                | Status::BAD_RESPONSE
                | Status::CLIENT_ERROR
                | Status::SERVER_THREADPOOL_EXHAUSTED_ERROR => Fallback::Continue,
                _ => Fallback::Terminal,
            },
            ClientError::Http { status, .. } if *status == 401 || *status == 403 => {
                Fallback::Terminal
            }
            ClientError::Http { .. } => Fallback::Continue,
            _ => Fallback::Terminal,
        }
    }

    /// The category reported to callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Transport(_) | ClientError::Http { .. } => ErrorKind::TransportError,
            ClientError::Protocol(ProtocolError::Serialization(_))
            | ClientError::Serialization(_)
            | ClientError::InvalidParameter(_) => ErrorKind::SerializationError,
            ClientError::Protocol(_) => ErrorKind::ProtocolError,
            ClientError::Resolution(_) => ErrorKind::ResolutionError,
            ClientError::Application(_) => ErrorKind::ApplicationError,
            ClientError::Remote { status, .. } => match *status {
                Status::CLIENT_TIMEOUT | Status::SERVER_TIMEOUT => ErrorKind::TransportError,
                Status::SERVICE_NOT_FOUND => ErrorKind::ResolutionError,
                _ => ErrorKind::ApplicationError,
            },
            ClientError::Config(_) => ErrorKind::ConfigurationError,
            ClientError::FallbackExhausted(attempts) => attempts
                .last()
                .map(|(_, err)| err.kind())
                .unwrap_or(ErrorKind::ResolutionError),
        }
    }
}

/// Failure category of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    ProtocolError,
    TransportError,
    SerializationError,
    ResolutionError,
    ApplicationError,
    ConfigurationError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::ProtocolError => "ProtocolError",
            ErrorKind::TransportError => "TransportError",
            ErrorKind::SerializationError => "SerializationError",
            ErrorKind::ResolutionError => "ResolutionError",
            ErrorKind::ApplicationError => "ApplicationError",
            ErrorKind::ConfigurationError => "ConfigurationError",
        };
        f.write_str(name)
    }
}

fn exception_summary(value: &Value) -> String {
    match value {
        Value::ExceptionInfo(info) => match (info.get("type"), info.get("message")) {
            (Some(kind), Some(message)) if kind != "exception" => format!("{}: {}", kind, message),
            (_, Some(message)) => message.clone(),
            (Some(kind), None) => kind.clone(),
            (None, None) => value.to_string(),
        },
        other => other.to_string(),
    }
}

fn attempts_summary(attempts: &[(Layer, ClientError)]) -> String {
    attempts
        .iter()
        .map(|(layer, err)| format!("[{}] {}", layer, err))
        .collect::<Vec<_>>()
        .join("; ")
}
