//! Server-side sans-IO request codec.
//!
//! Performs no I/O: `feed()` adds bytes, `decode()` pops one complete
//! request once the headers and `Content-Length` body have arrived.

use bytes::{Buf, BytesMut};

use super::{Headers, Method, RtspRequest};

/// Bound on the header section.
const MAX_HEADER_SIZE: usize = 64 * 1024;

/// Bound on a request body (cover art is the largest legitimate payload).
const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// Errors during request parsing.
#[derive(Debug, thiserror::Error)]
pub enum RtspParseError {
    /// Malformed request line
    #[error("invalid request line: {0}")]
    InvalidRequestLine(String),

    /// Unknown method token
    #[error("invalid method: {0}")]
    InvalidMethod(String),

    /// Header section over the size bound or not CRLF-terminated
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// Unparseable Content-Length
    #[error("invalid content length")]
    InvalidContentLength,

    /// Body over the size bound
    #[error("body too large: {size}")]
    BodyTooLarge {
        /// Declared body size
        size: usize,
    },

    /// Non-UTF-8 header bytes
    #[error("invalid utf-8 in headers")]
    InvalidUtf8,
}

/// Sans-IO RTSP request parser.
#[derive(Default)]
pub struct RtspServerCodec {
    buffer: BytesMut,
}

impl RtspServerCodec {
    /// Create an empty codec.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Feed received bytes.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode one complete request. `Ok(None)` means more bytes are
    /// needed.
    ///
    /// # Errors
    /// Any parse failure; the connection should be closed.
    pub fn decode(&mut self) -> Result<Option<RtspRequest>, RtspParseError> {
        let Some(header_end) = find_crlf_crlf(&self.buffer) else {
            if self.buffer.len() > MAX_HEADER_SIZE {
                return Err(RtspParseError::InvalidHeader("headers too large".into()));
            }
            return Ok(None);
        };

        let header_str = std::str::from_utf8(&self.buffer[..header_end])
            .map_err(|_| RtspParseError::InvalidUtf8)?;
        let (method, uri, headers) = parse_headers(header_str)?;

        let content_length = match headers.get("Content-Length") {
            Some(v) => v
                .trim()
                .parse::<usize>()
                .map_err(|_| RtspParseError::InvalidContentLength)?,
            None => 0,
        };
        if content_length > MAX_BODY_SIZE {
            return Err(RtspParseError::BodyTooLarge {
                size: content_length,
            });
        }

        let total = header_end + 4 + content_length;
        if self.buffer.len() < total {
            return Ok(None);
        }

        self.buffer.advance(header_end + 4);
        let body = self.buffer.split_to(content_length).to_vec();

        Ok(Some(RtspRequest {
            method,
            uri,
            headers,
            body,
        }))
    }
}

fn find_crlf_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_headers(input: &str) -> Result<(Method, String, Headers), RtspParseError> {
    let mut lines = input.split("\r\n");

    let request_line = lines
        .next()
        .ok_or_else(|| RtspParseError::InvalidRequestLine(String::new()))?;
    let mut parts = request_line.split_whitespace();
    let method_str = parts
        .next()
        .ok_or_else(|| RtspParseError::InvalidRequestLine(request_line.to_string()))?;
    let uri = parts
        .next()
        .ok_or_else(|| RtspParseError::InvalidRequestLine(request_line.to_string()))?;
    let version = parts
        .next()
        .ok_or_else(|| RtspParseError::InvalidRequestLine(request_line.to_string()))?;
    if !version.starts_with("RTSP/1.") {
        return Err(RtspParseError::InvalidRequestLine(request_line.to_string()));
    }

    let method = Method::from_str(method_str)
        .ok_or_else(|| RtspParseError::InvalidMethod(method_str.to_string()))?;

    let mut headers = Headers::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| RtspParseError::InvalidHeader(line.to_string()))?;
        headers.insert(name.trim(), value.trim());
    }

    Ok((method, uri.to_string(), headers))
}
