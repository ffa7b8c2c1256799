//! Encoder and decoder for Dubbo frames, requests and responses.

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::request::InvocationRequest;
use crate::response::{decode_response, Response};
use bytes::{Bytes, BytesMut};

/// Encodes requests and responses into frames.
pub struct Encoder;

impl Encoder {
    /// Encodes a request into a frame with a fresh request id.
    ///
    /// Returns the id alongside the bytes so the caller can match the reply.
    pub fn encode_request(request: &InvocationRequest) -> Result<(u64, BytesMut), ProtocolError> {
        let frame = request.to_frame()?;
        Ok((frame.request_id, frame.encode()?))
    }

    /// Encodes a response into a frame.
    pub fn encode_response(response: &Response) -> Result<BytesMut, ProtocolError> {
        response.to_frame()?.encode()
    }
}

/// Decodes frames into requests and responses.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Appends bytes to the internal buffer.
    pub fn extend_bytes(&mut self, data: Bytes) {
        self.buffer.extend_from_slice(&data);
    }

    /// Attempts to decode the next frame from the buffer.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        Frame::decode(&mut self.buffer)
    }

    /// Attempts to decode the next request and its id from the buffer.
    ///
    /// Event frames (heartbeats) are skipped.
    pub fn decode_request(&mut self) -> Result<Option<(u64, InvocationRequest)>, ProtocolError> {
        loop {
            match self.decode_frame()? {
                Some(frame) if frame.flags.is_event() => {
                    tracing::debug!(request_id = frame.request_id, "skipping event frame");
                }
                Some(frame) => {
                    let request = InvocationRequest::decode_body(&frame.body)?;
                    return Ok(Some((frame.request_id, request)));
                }
                None => return Ok(None),
            }
        }
    }

    /// Attempts to decode the next response from the buffer.
    pub fn decode_response(&mut self) -> Result<Option<Response>, ProtocolError> {
        Ok(self.decode_frame()?.map(|frame| decode_response(&frame)))
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
