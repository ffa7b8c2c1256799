//! Protocol and serialization error types.

use thiserror::Error;

/// Errors raised while framing or unframing Dubbo messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid magic: expected 0xdabb, got {0:#06x}")]
    BadMagic(u16),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("invalid frame flags: {0:#04x}")]
    InvalidFlags(u8),

    #[error("serialization error: {0}")]
    Serialization(#[from] SerializationError),
}

/// Errors raised by the Hessian2 reader and writer.
///
/// The reader only surfaces these for truncated or structurally broken
/// input; most decode problems are recovered in place as
/// [`Value::Unresolved`](crate::Value::Unresolved) placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerializationError {
    #[error("unexpected end of data at offset {offset}")]
    UnexpectedEof { offset: usize },

    #[error("recursion limit {limit} exceeded")]
    RecursionLimit { limit: usize },

    #[error("invalid length: {0}")]
    InvalidLength(i64),

    #[error("unsupported value: {0}")]
    Unsupported(String),

    #[error("invalid type descriptor: {0}")]
    InvalidDescriptor(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::BadMagic(0xCAFE);
        assert!(err.to_string().contains("0xcafe"));

        let err = ProtocolError::FrameTooLarge { size: 100, max: 50 };
        assert!(err.to_string().contains("100"));

        let err = ProtocolError::InvalidFlags(0x40);
        assert!(err.to_string().contains("0x40"));
    }

    #[test]
    fn test_serialization_error_converts() {
        let err: ProtocolError = SerializationError::InvalidLength(-3).into();
        assert!(matches!(err, ProtocolError::Serialization(_)));
        assert!(err.to_string().contains("-3"));

        let err = SerializationError::UnexpectedEof { offset: 7 };
        assert!(err.to_string().contains("offset 7"));
    }
}
