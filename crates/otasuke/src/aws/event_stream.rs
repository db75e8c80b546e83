//! `application/vnd.amazon.eventstream` framing.
//!
//! Each message is `total_len | headers_len | prelude_crc | headers |
//! payload | message_crc`, big-endian, with CRC-32 (IEEE) checksums.
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde_json::{json, Value};
use std::collections::HashMap;

use super::AwsError;

const PRELUDE_LEN: usize = 12;
const TRAILER_LEN: usize = 4;
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = !0u32;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Bytes(Bytes),
    String(String),
    Timestamp(i64),
    Uuid([u8; 16]),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub headers: HashMap<String, HeaderValue>,
    pub payload: Bytes,
}

impl Frame {
    pub fn header_str(&self, name: &str) -> Option<&str> {
        match self.headers.get(name) {
            Some(HeaderValue::String(value)) => Some(value),
            _ => None,
        }
    }

    /// Interpret the frame as one Bedrock stream event, `{eventType: payload}`.
    ///
    /// Exception frames become errors carrying the service's message.
    pub fn into_event(self) -> Result<Value, AwsError> {
        let payload: Value = if self.payload.is_empty() {
            json!({})
        } else {
            serde_json::from_slice(&self.payload)
                .map_err(|e| AwsError::EventStream(format!("invalid JSON payload: {}", e)))?
        };

        match self.header_str(":message-type") {
            Some("event") => {
                let event_type = self
                    .header_str(":event-type")
                    .ok_or_else(|| AwsError::EventStream("missing :event-type".to_string()))?;
                Ok(json!({ event_type: payload }))
            }
            Some("exception") | Some("error") => {
                let kind = self
                    .header_str(":exception-type")
                    .or_else(|| self.header_str(":error-code"))
                    .unwrap_or("UnknownException");
                let message = payload
                    .get("message")
                    .or_else(|| payload.get("Message"))
                    .and_then(Value::as_str)
                    .or_else(|| self.header_str(":error-message"))
                    .unwrap_or("no message");
                Err(AwsError::EventStream(format!("{}: {}", kind, message)))
            }
            other => Err(AwsError::EventStream(format!(
                "unexpected message type {:?}",
                other
            ))),
        }
    }
}

/// Incremental decoder fed with arbitrary byte chunks from the response body
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buffer: BytesMut,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes received but not yet consumed as a complete frame
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// The next complete frame, or `None` when more bytes are needed
    pub fn next_frame(&mut self) -> Result<Option<Frame>, AwsError> {
        if self.buffer.len() < PRELUDE_LEN {
            return Ok(None);
        }

        let total_len = u32::from_be_bytes(self.buffer[0..4].try_into().unwrap_or_default()) as usize;
        let headers_len = u32::from_be_bytes(self.buffer[4..8].try_into().unwrap_or_default()) as usize;
        let prelude_crc = u32::from_be_bytes(self.buffer[8..12].try_into().unwrap_or_default());

        if crc32(&self.buffer[0..8]) != prelude_crc {
            return Err(AwsError::EventStream("prelude checksum mismatch".to_string()));
        }
        if total_len < PRELUDE_LEN + TRAILER_LEN + headers_len || total_len > MAX_FRAME_LEN {
            return Err(AwsError::EventStream(format!(
                "invalid frame length {}",
                total_len
            )));
        }
        if self.buffer.len() < total_len {
            return Ok(None);
        }

        let mut frame = self.buffer.split_to(total_len).freeze();
        let message_crc = u32::from_be_bytes(
            frame[total_len - TRAILER_LEN..]
                .try_into()
                .unwrap_or_default(),
        );
        if crc32(&frame[..total_len - TRAILER_LEN]) != message_crc {
            return Err(AwsError::EventStream("message checksum mismatch".to_string()));
        }

        frame.advance(PRELUDE_LEN);
        let mut header_bytes = frame.split_to(headers_len);
        let payload = frame.split_to(total_len - PRELUDE_LEN - headers_len - TRAILER_LEN);
        let headers = parse_headers(&mut header_bytes)?;

        Ok(Some(Frame { headers, payload }))
    }
}

fn need(buf: &Bytes, len: usize) -> Result<(), AwsError> {
    if buf.remaining() < len {
        Err(AwsError::EventStream("truncated header".to_string()))
    } else {
        Ok(())
    }
}

fn parse_headers(buf: &mut Bytes) -> Result<HashMap<String, HeaderValue>, AwsError> {
    let mut headers = HashMap::new();
    while buf.has_remaining() {
        need(buf, 1)?;
        let name_len = buf.get_u8() as usize;
        need(buf, name_len + 1)?;
        let name = String::from_utf8(buf.split_to(name_len).to_vec())
            .map_err(|_| AwsError::EventStream("header name is not UTF-8".to_string()))?;

        let value = match buf.get_u8() {
            0 => HeaderValue::Bool(true),
            1 => HeaderValue::Bool(false),
            2 => {
                need(buf, 1)?;
                HeaderValue::Byte(buf.get_i8())
            }
            3 => {
                need(buf, 2)?;
                HeaderValue::Short(buf.get_i16())
            }
            4 => {
                need(buf, 4)?;
                HeaderValue::Int(buf.get_i32())
            }
            5 => {
                need(buf, 8)?;
                HeaderValue::Long(buf.get_i64())
            }
            6 => {
                need(buf, 2)?;
                let len = buf.get_u16() as usize;
                need(buf, len)?;
                HeaderValue::Bytes(buf.split_to(len))
            }
            7 => {
                need(buf, 2)?;
                let len = buf.get_u16() as usize;
                need(buf, len)?;
                let value = String::from_utf8(buf.split_to(len).to_vec())
                    .map_err(|_| AwsError::EventStream("header value is not UTF-8".to_string()))?;
                HeaderValue::String(value)
            }
            8 => {
                need(buf, 8)?;
                HeaderValue::Timestamp(buf.get_i64())
            }
            9 => {
                need(buf, 16)?;
                let mut uuid = [0u8; 16];
                buf.copy_to_slice(&mut uuid);
                HeaderValue::Uuid(uuid)
            }
            other => {
                return Err(AwsError::EventStream(format!(
                    "unknown header type {}",
                    other
                )))
            }
        };
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Encode one frame with string headers
pub fn encode_frame(headers: &[(&str, &str)], payload: &[u8]) -> Bytes {
    let mut header_bytes = BytesMut::new();
    for (name, value) in headers {
        header_bytes.put_u8(name.len() as u8);
        header_bytes.put_slice(name.as_bytes());
        header_bytes.put_u8(7);
        header_bytes.put_u16(value.len() as u16);
        header_bytes.put_slice(value.as_bytes());
    }

    let total_len = PRELUDE_LEN + header_bytes.len() + payload.len() + TRAILER_LEN;
    let mut frame = BytesMut::with_capacity(total_len);
    frame.put_u32(total_len as u32);
    frame.put_u32(header_bytes.len() as u32);
    let prelude_crc = crc32(&frame[..8]);
    frame.put_u32(prelude_crc);
    frame.put_slice(&header_bytes);
    frame.put_slice(payload);
    let message_crc = crc32(&frame);
    frame.put_u32(message_crc);
    frame.freeze()
}

/// Encode a Bedrock stream event frame
pub fn encode_event(event_type: &str, payload: &Value) -> Bytes {
    encode_frame(
        &[
            (":message-type", "event"),
            (":event-type", event_type),
            (":content-type", "application/json"),
        ],
        payload.to_string().as_bytes(),
    )
}
