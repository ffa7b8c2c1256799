//! Hessian2 writer for the subset of values a request carries.

use crate::error::SerializationError;
use crate::value::Value;
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;

/// Appends Hessian2-encoded values to a buffer.
#[derive(Debug, Default)]
pub struct HessianWriter {
    buf: BytesMut,
}

impl HessianWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    pub fn write_null(&mut self) {
        self.buf.put_u8(b'N');
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(if value { b'T' } else { b'F' });
    }

    /// Writes an int in its most compact form.
    pub fn write_int(&mut self, value: i32) {
        match value {
            -16..=47 => self.buf.put_u8((0x90 + value) as u8),
            -2048..=2047 => {
                self.buf.put_u8((0xC8 + (value >> 8)) as u8);
                self.buf.put_u8(value as u8);
            }
            -262_144..=262_143 => {
                self.buf.put_u8((0xD4 + (value >> 16)) as u8);
                self.buf.put_u8((value >> 8) as u8);
                self.buf.put_u8(value as u8);
            }
            _ => {
                self.buf.put_u8(b'I');
                self.buf.put_i32(value);
            }
        }
    }

    pub fn write_long(&mut self, value: i64) {
        self.buf.put_u8(b'L');
        self.buf.put_i64(value);
    }

    pub fn write_double(&mut self, value: f64) {
        self.buf.put_u8(b'D');
        self.buf.put_u64(value.to_bits());
    }

    /// Writes a string. The length prefix counts characters, not bytes.
    pub fn write_string(&mut self, value: &str) {
        let chars = value.chars().count();
        if chars <= 31 {
            self.buf.put_u8(chars as u8);
        } else if chars <= 1023 {
            self.buf.put_u8(0x30 + (chars >> 8) as u8);
            self.buf.put_u8(chars as u8);
        } else {
            self.buf.put_u8(b'S');
            self.buf.put_u32(chars as u32);
        }
        self.buf.put_slice(value.as_bytes());
    }

    /// Writes a string-to-string map, as used for attachments.
    pub fn write_attachments(&mut self, attachments: &BTreeMap<String, String>) {
        self.buf.put_u8(b'H');
        for (key, value) in attachments {
            self.write_string(key);
            self.write_string(value);
        }
        self.buf.put_u8(b'Z');
    }

    /// Writes any value that may travel as a parameter.
    ///
    /// Lists use the variable-length untyped form, maps the untyped map form
    /// and objects the typed map form. Exception info and placeholders cannot
    /// be sent and are rejected.
    pub fn write_value(&mut self, value: &Value) -> Result<(), SerializationError> {
        match value {
            Value::Null => self.write_null(),
            Value::Bool(b) => self.write_bool(*b),
            Value::Int(v) => self.write_int(*v),
            Value::Long(v) => self.write_long(*v),
            Value::Double(v) => self.write_double(*v),
            Value::String(s) => self.write_string(s),
            Value::List(items) => {
                self.buf.put_u8(0x57);
                for item in items {
                    self.write_value(item)?;
                }
                self.buf.put_u8(b'Z');
            }
            Value::Map(entries) => {
                self.buf.put_u8(b'H');
                self.write_entries(entries)?;
            }
            Value::Object { class, fields } => {
                self.buf.put_u8(b'M');
                self.write_string(class);
                self.write_entries(fields)?;
            }
            Value::ExceptionInfo(_) | Value::Unresolved(_) => {
                return Err(SerializationError::Unsupported(format!(
                    "{} cannot be sent as a parameter",
                    value.kind()
                )));
            }
        }
        Ok(())
    }

    fn write_entries(&mut self, entries: &BTreeMap<String, Value>) -> Result<(), SerializationError> {
        for (key, value) in entries {
            self.write_string(key);
            self.write_value(value)?;
        }
        self.buf.put_u8(b'Z');
        Ok(())
    }

    /// Writes a single raw byte.
    pub fn write_raw(&mut self, byte: u8) {
        self.buf.put_u8(byte);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(f: impl FnOnce(&mut HessianWriter)) -> Vec<u8> {
        let mut w = HessianWriter::new();
        f(&mut w);
        w.as_bytes().to_vec()
    }

    #[test]
    fn test_compact_ints() {
        assert_eq!(encode(|w| w.write_int(0)), vec![0x90]);
        assert_eq!(encode(|w| w.write_int(-16)), vec![0x80]);
        assert_eq!(encode(|w| w.write_int(47)), vec![0xBF]);
        assert_eq!(encode(|w| w.write_int(48)), vec![0xC8, 0x30]);
        assert_eq!(encode(|w| w.write_int(-2048)), vec![0xC0, 0x00]);
        assert_eq!(encode(|w| w.write_int(2047)), vec![0xCF, 0xFF]);
        assert_eq!(encode(|w| w.write_int(-262_144)), vec![0xD0, 0x00, 0x00]);
        assert_eq!(encode(|w| w.write_int(262_143)), vec![0xD7, 0xFF, 0xFF]);
        assert_eq!(
            encode(|w| w.write_int(262_144)),
            vec![b'I', 0x00, 0x04, 0x00, 0x00]
        );
    }

    #[test]
    fn test_string_lengths_count_chars() {
        // 2 characters, 6 bytes
        let bytes = encode(|w| w.write_string("中文"));
        assert_eq!(bytes[0], 2);
        assert_eq!(bytes.len(), 7);

        let medium = "a".repeat(300);
        let bytes = encode(|w| w.write_string(&medium));
        assert_eq!(&bytes[..2], &[0x31, 0x2C]);

        let long = "é".repeat(1024);
        let bytes = encode(|w| w.write_string(&long));
        assert_eq!(&bytes[..5], &[b'S', 0, 0, 0x04, 0x00]);
        assert_eq!(bytes.len(), 5 + 2048);
    }

    #[test]
    fn test_scalars() {
        assert_eq!(encode(|w| w.write_null()), b"N");
        assert_eq!(encode(|w| w.write_bool(true)), b"T");
        assert_eq!(encode(|w| w.write_bool(false)), b"F");
        assert_eq!(
            encode(|w| w.write_long(5)),
            vec![b'L', 0, 0, 0, 0, 0, 0, 0, 5]
        );
        assert_eq!(encode(|w| w.write_double(1.0))[0], b'D');
    }

    #[test]
    fn test_empty_attachments() {
        assert_eq!(encode(|w| w.write_attachments(&BTreeMap::new())), b"HZ");
    }

    #[test]
    fn test_containers() {
        let list = Value::List(vec![Value::Int(1), Value::Bool(true)]);
        assert_eq!(
            encode(|w| w.write_value(&list).unwrap()),
            vec![0x57, 0x91, b'T', b'Z']
        );

        let object = Value::Object {
            class: "a.B".to_string(),
            fields: BTreeMap::from([("x".to_string(), Value::Null)]),
        };
        assert_eq!(
            encode(|w| w.write_value(&object).unwrap()),
            vec![b'M', 3, b'a', b'.', b'B', 1, b'x', b'N', b'Z']
        );
    }

    #[test]
    fn test_unsupported_values_fail() {
        let mut w = HessianWriter::new();
        let err = w.write_value(&Value::unresolved("x")).unwrap_err();
        assert!(matches!(err, SerializationError::Unsupported(_)));

        let nested = Value::List(vec![Value::ExceptionInfo(BTreeMap::new())]);
        assert!(w.write_value(&nested).is_err());
    }
}
