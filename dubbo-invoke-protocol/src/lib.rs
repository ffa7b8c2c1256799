//! # dubbo-invoke-protocol
//!
//! Wire protocol implementation for Dubbo RPC as spoken by dubbo-invoke.
//!
//! This crate provides:
//! - 16-byte Dubbo frame header encoding and validation
//! - A Hessian2 subset writer and a fault-tolerant Hessian2 reader
//! - Invocation request bodies and JVM type descriptors
//! - Response body decoding with exception extraction
//! - Sanitization of decoded results
//!
//! It performs no I/O.

pub mod codec;
pub mod error;
pub mod exception;
pub mod frame;
pub mod hessian;
pub mod request;
pub mod response;
pub mod sanitize;
pub mod value;

pub use codec::{Decoder, Encoder};
pub use error::{ProtocolError, SerializationError};
pub use exception::{clean_binary, parse_exception_info};
pub use frame::{next_request_id, Frame, FrameFlags, FrameHeader, Status, HEADER_SIZE, MAGIC};
pub use request::{
    method_descriptor, parse_descriptor, type_descriptor, InvocationRequest, GENERIC_DESCRIPTOR,
    GENERIC_METHOD,
};
pub use response::{decode_response, Response, ResponseKind};
pub use sanitize::{clean_string, is_system_key, sanitize};
pub use value::Value;

/// Dubbo protocol version written into request bodies.
pub const DUBBO_VERSION: &str = "2.0.2";

/// Service version used when none is given.
pub const DEFAULT_SERVICE_VERSION: &str = "0.0.0";

/// Default port of a Dubbo provider.
pub const DEFAULT_PORT: u16 = 20880;

/// Maximum frame body size (8 MiB).
pub const MAX_BODY_SIZE: u32 = 8 * 1024 * 1024;
