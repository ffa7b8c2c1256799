//! Dubbo frame format.
//!
//! Frame layout (16 bytes header + body):
//!
//! ```text
//! +--------+--------+--------+------------+-------------+
//! | magic  | flags  | status | request id | body length |
//! | 2 bytes| 1 byte | 1 byte |  8 bytes   |   4 bytes   |
//! +--------+--------+--------+------------+-------------+
//! | body (Hessian2, body length bytes)                  |
//! +-----------------------------------------------------+
//! ```
//!
//! All multi-byte fields are big-endian.

use crate::error::ProtocolError;
use crate::MAX_BODY_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Magic number opening every Dubbo frame.
pub const MAGIC: u16 = 0xDABB;

/// Size of the fixed frame header in bytes (2+1+1+8+4 = 16).
pub const HEADER_SIZE: usize = 16;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Returns the next process-wide request id. Ids start at 1 and are never reused.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::SeqCst)
}

/// Frame flags byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// Frame is a request (unset for responses).
    pub const REQUEST: u8 = 0x80;
    /// Caller expects a response frame.
    pub const TWO_WAY: u8 = 0x40;
    /// Heartbeat or other event frame.
    pub const EVENT: u8 = 0x20;
    /// Low bits carrying the serialization id.
    pub const SERIALIZATION_MASK: u8 = 0x1F;
    /// Serialization id of Hessian2.
    pub const HESSIAN2: u8 = 2;

    pub fn new() -> Self {
        Self(0)
    }

    /// Flags of an ordinary two-way Hessian2 request.
    pub fn request() -> Self {
        Self::new()
            .with_request()
            .with_two_way()
            .with_serialization(Self::HESSIAN2)
    }

    /// Flags of a Hessian2 response.
    pub fn response() -> Self {
        Self::new().with_serialization(Self::HESSIAN2)
    }

    pub fn with_request(mut self) -> Self {
        self.0 |= Self::REQUEST;
        self
    }

    pub fn with_two_way(mut self) -> Self {
        self.0 |= Self::TWO_WAY;
        self
    }

    pub fn with_event(mut self) -> Self {
        self.0 |= Self::EVENT;
        self
    }

    pub fn with_serialization(mut self, id: u8) -> Self {
        self.0 = (self.0 & !Self::SERIALIZATION_MASK) | (id & Self::SERIALIZATION_MASK);
        self
    }

    pub fn is_request(&self) -> bool {
        self.0 & Self::REQUEST != 0
    }

    pub fn is_two_way(&self) -> bool {
        self.0 & Self::TWO_WAY != 0
    }

    pub fn is_event(&self) -> bool {
        self.0 & Self::EVENT != 0
    }

    pub fn serialization_id(&self) -> u8 {
        self.0 & Self::SERIALIZATION_MASK
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Two-way only has meaning on requests.
    pub fn from_bits(bits: u8) -> Result<Self, ProtocolError> {
        if bits & Self::TWO_WAY != 0 && bits & Self::REQUEST == 0 {
            return Err(ProtocolError::InvalidFlags(bits));
        }
        Ok(Self(bits))
    }
}

/// Response status byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Status(u8);

impl Status {
    pub const OK: Status = Status(20);
    pub const CLIENT_TIMEOUT: Status = Status(30);
    pub const SERVER_TIMEOUT: Status = Status(31);
    pub const BAD_REQUEST: Status = Status(40);
    pub const BAD_RESPONSE: Status = Status(50);
    pub const SERVICE_NOT_FOUND: Status = Status(60);
    pub const SERVICE_ERROR: Status = Status(70);
    pub const SERVER_ERROR: Status = Status(80);
    pub const CLIENT_ERROR: Status = Status(90);
    pub const SERVER_THREADPOOL_EXHAUSTED_ERROR: Status = Status(100);

    pub const fn new(code: u8) -> Self {
        Self(code)
    }

    pub fn code(&self) -> u8 {
        self.0
    }

    pub fn is_ok(&self) -> bool {
        *self == Self::OK
    }

    /// Symbolic name of a known status, `UNKNOWN` otherwise.
    pub fn name(&self) -> &'static str {
        match self.0 {
            20 => "OK",
            30 => "CLIENT_TIMEOUT",
            31 => "SERVER_TIMEOUT",
            40 => "BAD_REQUEST",
            50 => "BAD_RESPONSE",
            60 => "SERVICE_NOT_FOUND",
            70 => "SERVICE_ERROR",
            80 => "SERVER_ERROR",
            90 => "CLIENT_ERROR",
            100 => "SERVER_THREADPOOL_EXHAUSTED_ERROR",
            _ => "UNKNOWN",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.0)
    }
}

/// A validated frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub flags: FrameFlags,
    pub status: Status,
    pub request_id: u64,
    pub body_len: u32,
}

impl FrameHeader {
    /// Parses and validates a header on its own, so a reader can reject a
    /// bad frame before pulling its body off the wire.
    pub fn parse(header: &[u8; HEADER_SIZE]) -> Result<Self, ProtocolError> {
        let magic = u16::from_be_bytes([header[0], header[1]]);
        if magic != MAGIC {
            return Err(ProtocolError::BadMagic(magic));
        }

        let flags = FrameFlags::from_bits(header[2])?;
        let status = Status::new(header[3]);

        let mut id = [0u8; 8];
        id.copy_from_slice(&header[4..12]);
        let request_id = u64::from_be_bytes(id);

        let body_len = u32::from_be_bytes([header[12], header[13], header[14], header[15]]);
        if body_len > MAX_BODY_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: body_len,
                max: MAX_BODY_SIZE,
            });
        }

        Ok(Self {
            flags,
            status,
            request_id,
            body_len,
        })
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_u16(MAGIC);
        buf.put_u8(self.flags.bits());
        buf.put_u8(self.status.code());
        buf.put_u64(self.request_id);
        buf.put_u32(self.body_len);
    }
}

/// A Dubbo frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub flags: FrameFlags,
    /// Zero on requests.
    pub status: Status,
    pub request_id: u64,
    /// Hessian2 body.
    pub body: Bytes,
}

impl Frame {
    /// Creates a two-way request frame with a fresh request id.
    pub fn request(body: Bytes) -> Self {
        Self {
            flags: FrameFlags::request(),
            status: Status::default(),
            request_id: next_request_id(),
            body,
        }
    }

    /// Creates a response frame answering `request_id`.
    pub fn response(request_id: u64, status: Status, body: Bytes) -> Self {
        Self {
            flags: FrameFlags::response(),
            status,
            request_id,
            body,
        }
    }

    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            flags: self.flags,
            status: self.status,
            request_id: self.request_id,
            body_len: self.body.len() as u32,
        }
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        if self.body.len() > MAX_BODY_SIZE as usize {
            return Err(ProtocolError::FrameTooLarge {
                size: self.body.len().min(u32::MAX as usize) as u32,
                max: MAX_BODY_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.body.len());
        self.header().write(&mut buf);
        buf.put_slice(&self.body);
        Ok(buf)
    }

    /// Decodes a frame from bytes.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed, or `Err` on protocol errors.
    /// Nothing is consumed unless a whole frame is returned.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        // Peek at header without consuming
        let mut raw = [0u8; HEADER_SIZE];
        raw.copy_from_slice(&buf[..HEADER_SIZE]);
        let header = FrameHeader::parse(&raw)?;

        let total_len = HEADER_SIZE + header.body_len as usize;
        if buf.len() < total_len {
            return Ok(None);
        }

        buf.advance(HEADER_SIZE);
        let body = buf.split_to(header.body_len as usize).freeze();

        Ok(Some(Self {
            flags: header.flags,
            status: header.status,
            request_id: header.request_id,
            body,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_header_layout() {
        let frame = Frame {
            flags: FrameFlags::request(),
            status: Status::default(),
            request_id: 0x0102_0304_0506_0708,
            body: Bytes::from_static(b"abc"),
        };
        let encoded = frame.encode().unwrap();

        assert_eq!(encoded.len(), HEADER_SIZE + 3);
        assert_eq!(&encoded[0..2], &[0xDA, 0xBB]);
        assert_eq!(encoded[2], 0xC2);
        assert_eq!(encoded[3], 0);
        assert_eq!(&encoded[4..12], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&encoded[12..16], &[0, 0, 0, 3]);
        assert_eq!(&encoded[16..], b"abc");
    }

    #[test]
    fn test_frame_roundtrip() {
        let frame = Frame::response(77, Status::OK, Bytes::from_static(b"\x91\x9a"));
        let mut buf = frame.encode().unwrap();
        let decoded = Frame::decode(&mut buf).unwrap().unwrap();

        assert_eq!(decoded.request_id, 77);
        assert!(decoded.status.is_ok());
        assert!(!decoded.flags.is_request());
        assert_eq!(decoded.flags.serialization_id(), FrameFlags::HESSIAN2);
        assert_eq!(decoded.body.as_ref(), b"\x91\x9a");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_bad_magic_consumes_nothing() {
        let mut raw = vec![0xCA, 0xFE, 0x02, 20, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 2];
        raw.extend_from_slice(b"zz");
        let mut buf = BytesMut::from(&raw[..]);

        let result = Frame::decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::BadMagic(0xCAFE))));
        assert_eq!(buf.len(), raw.len());
    }

    #[test]
    fn test_incomplete_frame() {
        let mut buf = BytesMut::from(&[0xDA, 0xBB, 0x02, 20][..]);
        assert!(Frame::decode(&mut buf).unwrap().is_none());

        let frame = Frame::response(1, Status::OK, Bytes::from_static(b"0123456789"));
        let encoded = frame.encode().unwrap();
        let mut partial = BytesMut::from(&encoded[..HEADER_SIZE + 4]);
        assert!(Frame::decode(&mut partial).unwrap().is_none());
        assert_eq!(partial.len(), HEADER_SIZE + 4);
    }

    #[test]
    fn test_header_parse_rejects_oversized_body() {
        let mut raw = [0u8; HEADER_SIZE];
        raw[0] = 0xDA;
        raw[1] = 0xBB;
        raw[2] = 0x02;
        raw[12..16].copy_from_slice(&(MAX_BODY_SIZE + 1).to_be_bytes());

        let result = FrameHeader::parse(&raw);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_frame_flags() {
        let flags = FrameFlags::request();
        assert!(flags.is_request());
        assert!(flags.is_two_way());
        assert!(!flags.is_event());
        assert_eq!(flags.serialization_id(), 2);
        assert_eq!(flags.bits(), 0xC2);

        let heartbeat = FrameFlags::response().with_event();
        assert!(heartbeat.is_event());
        assert!(!heartbeat.is_request());
    }

    #[test]
    fn test_invalid_flags() {
        let result = FrameFlags::from_bits(0x42);
        assert!(matches!(result, Err(ProtocolError::InvalidFlags(0x42))));
        assert!(FrameFlags::from_bits(0xC2).is_ok());
        assert!(FrameFlags::from_bits(0x22).is_ok());
    }

    #[test]
    fn test_status_names() {
        assert_eq!(Status::OK.to_string(), "OK(20)");
        assert_eq!(Status::SERVICE_NOT_FOUND.name(), "SERVICE_NOT_FOUND");
        assert_eq!(Status::new(99).name(), "UNKNOWN");
        assert!(!Status::SERVER_ERROR.is_ok());
    }

    #[test]
    fn test_request_ids_increase() {
        let a = next_request_id();
        let b = next_request_id();
        assert!(a >= 1);
        assert!(b > a);

        let frame = Frame::request(Bytes::new());
        assert!(frame.request_id > b);
    }

    #[test]
    fn test_multiple_frames_in_buffer() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&Frame::response(1, Status::OK, Bytes::from_static(b"a")).encode().unwrap());
        buf.extend_from_slice(&Frame::response(2, Status::OK, Bytes::from_static(b"b")).encode().unwrap());

        let first = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.request_id, 1);
        let second = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.request_id, 2);
        assert!(Frame::decode(&mut buf).unwrap().is_none());
    }
}
