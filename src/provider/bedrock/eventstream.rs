//! AWS event-stream binary framing (`application/vnd.amazon.eventstream`).
//!
//! Frame layout: total length (u32), headers length (u32), prelude CRC (u32), headers,
//! payload, message CRC (u32). All integers are big-endian. Checksums are not verified;
//! TLS already protects the transport.

use crate::error::LLMError;

const PRELUDE_LEN: usize = 12;
const CRC_LEN: usize = 4;

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EventFrame {
    pub(crate) headers: Vec<(String, HeaderValue)>,
    pub(crate) payload: Vec<u8>,
}

impl EventFrame {
    /// String value of a header, if present and string-typed.
    pub(crate) fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|(key, value)| match value {
            HeaderValue::String(text) if key == name => Some(text.as_str()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HeaderValue {
    Bool(bool),
    Byte(i8),
    Short(i16),
    Integer(i32),
    Long(i64),
    Bytes(Vec<u8>),
    String(String),
    Timestamp(i64),
    Uuid([u8; 16]),
}

/// Accumulates body bytes and yields complete frames.
#[derive(Debug, Default)]
pub(crate) struct EventStreamDecoder {
    buffer: Vec<u8>,
}

impl EventStreamDecoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes received but not yet part of a complete frame.
    pub(crate) fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Next complete frame, or `None` if more bytes are needed.
    pub(crate) fn next_frame(&mut self) -> Result<Option<EventFrame>, LLMError> {
        if self.buffer.len() < PRELUDE_LEN {
            return Ok(None);
        }
        let total_len = read_u32(&self.buffer, 0) as usize;
        let headers_len = read_u32(&self.buffer, 4) as usize;
        if total_len < PRELUDE_LEN + headers_len + CRC_LEN {
            return Err(frame_error(format!(
                "invalid frame lengths: total {total_len}, headers {headers_len}"
            )));
        }
        if self.buffer.len() < total_len {
            return Ok(None);
        }

        let frame: Vec<u8> = self.buffer.drain(..total_len).collect();
        let headers_end = PRELUDE_LEN + headers_len;
        let headers = parse_headers(&frame[PRELUDE_LEN..headers_end])?;
        let payload = frame[headers_end..total_len - CRC_LEN].to_vec();
        Ok(Some(EventFrame { headers, payload }))
    }
}

fn frame_error(message: impl Into<String>) -> LLMError {
    LLMError::stream("bedrock", message)
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

struct Cursor<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], LLMError> {
        let end = self
            .at
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| frame_error("truncated frame header"))?;
        let slice = &self.bytes[self.at..end];
        self.at = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], LLMError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn is_empty(&self) -> bool {
        self.at >= self.bytes.len()
    }
}

fn parse_headers(bytes: &[u8]) -> Result<Vec<(String, HeaderValue)>, LLMError> {
    let mut cursor = Cursor { bytes, at: 0 };
    let mut headers = Vec::new();
    while !cursor.is_empty() {
        let [name_len] = cursor.array::<1>()?;
        let name = String::from_utf8_lossy(cursor.take(name_len as usize)?).into_owned();
        let [kind] = cursor.array::<1>()?;
        let value = match kind {
            0 => HeaderValue::Bool(true),
            1 => HeaderValue::Bool(false),
            2 => HeaderValue::Byte(i8::from_be_bytes(cursor.array()?)),
            3 => HeaderValue::Short(i16::from_be_bytes(cursor.array()?)),
            4 => HeaderValue::Integer(i32::from_be_bytes(cursor.array()?)),
            5 => HeaderValue::Long(i64::from_be_bytes(cursor.array()?)),
            6 | 7 => {
                let len = u16::from_be_bytes(cursor.array()?) as usize;
                let raw = cursor.take(len)?;
                if kind == 6 {
                    HeaderValue::Bytes(raw.to_vec())
                } else {
                    HeaderValue::String(String::from_utf8_lossy(raw).into_owned())
                }
            }
            8 => HeaderValue::Timestamp(i64::from_be_bytes(cursor.array()?)),
            9 => HeaderValue::Uuid(cursor.array()?),
            other => return Err(frame_error(format!("unknown header value type {other}"))),
        };
        headers.push((name, value));
    }
    Ok(headers)
}

/// Encodes a frame with string headers. Used by tests and mock transports.
#[cfg(test)]
pub(crate) fn encode_frame(headers: &[(&str, &str)], payload: &[u8]) -> Vec<u8> {
    let mut header_bytes = Vec::new();
    for (name, value) in headers {
        header_bytes.push(name.len() as u8);
        header_bytes.extend_from_slice(name.as_bytes());
        header_bytes.push(7);
        header_bytes.extend_from_slice(&(value.len() as u16).to_be_bytes());
        header_bytes.extend_from_slice(value.as_bytes());
    }
    let total = PRELUDE_LEN + header_bytes.len() + payload.len() + CRC_LEN;
    let mut frame = Vec::with_capacity(total);
    frame.extend_from_slice(&(total as u32).to_be_bytes());
    frame.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
    frame.extend_from_slice(&[0; 4]);
    frame.extend_from_slice(&header_bytes);
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&[0; 4]);
    frame
}
