//! Unified seekable byte source.
//!
//! Wraps a local file or an HTTP/Icecast resource behind one buffered,
//! logically-seekable reader. HTTP sources are opened with a
//! `Range: bytes=0-` request; `Accept-Ranges: bytes` in the answer makes the
//! stream seekable through ranged re-requests. Small forward seeks on HTTP
//! are served by reading and discarding instead of a new request.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::time::Duration;

use tracing::debug;

/// Default internal buffer size.
const BUFFER_SIZE: usize = 8192;

/// Maximum forward distance served by skipping instead of a ranged request.
const MAX_SKIP_LEN: u64 = 8192;

/// Errors from a [`Stream`].
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// URI did not resolve to a readable resource
    #[error("cannot open {0}")]
    Open(String),

    /// HTTP request failed or returned a non-success status
    #[error("http error: {0}")]
    Http(String),

    /// Backward seek requested on a non-seekable source
    #[error("stream is not seekable")]
    NotSeekable,

    /// Seek target outside the resource
    #[error("seek out of range")]
    SeekOutOfRange,

    /// Underlying I/O failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Seek origin for [`Stream::seek`]. Seeking from the end is not supported:
/// Icecast sources have no end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Absolute stream position
    Set,
    /// Relative to the start of the internal buffer
    Current,
}

enum Backend {
    File(File),
    Http {
        url: String,
        reader: Box<dyn Read + Send>,
    },
}

/// Buffered byte source over `file` or `http(s)` URIs.
pub struct Stream {
    uri: String,
    backend: Backend,
    content_type: Option<String>,
    /// Total resource size in bytes, when known
    size: u64,
    /// Stream position of the first buffered byte
    pos: u64,
    buffer: Vec<u8>,
    buffer_len: usize,
    /// Bytes still to read-and-discard before the next refill
    skip_len: u64,
    is_seekable: bool,
}

impl Stream {
    /// Open a stream. `buffer_size` of 0 selects the default (8 KiB); the
    /// buffer shrinks to the resource size for small files.
    ///
    /// # Errors
    /// Fails when the path does not exist, the scheme is unsupported or the
    /// HTTP request does not succeed.
    pub fn open(uri: &str, buffer_size: usize) -> Result<Self, StreamError> {
        let mut buffer_size = if buffer_size == 0 {
            BUFFER_SIZE
        } else {
            buffer_size
        };

        let mut stream = if uri.starts_with("http://") || uri.starts_with("https://") {
            Self::open_http(uri, 0)?
        } else {
            let path = uri.strip_prefix("file://").unwrap_or(uri);
            Self::open_file(uri, path)?
        };

        if stream.size != 0 && (stream.size as usize) < buffer_size {
            buffer_size = stream.size as usize;
        }
        stream.buffer = vec![0u8; buffer_size.max(1)];

        // Guess the content type from the extension when the server gave
        // none, and reconcile ".m4a served as audio/mpeg" (a common
        // misconfiguration) to audio/mp4.
        let ext = Path::new(uri.strip_prefix("file://").unwrap_or(uri))
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match (&stream.content_type, ext.as_deref()) {
            (None, Some("mp3")) => stream.content_type = Some("audio/mpeg".to_string()),
            (None, Some("m4a" | "mp4")) => stream.content_type = Some("audio/mp4".to_string()),
            (Some(ct), Some("m4a")) if ct == "audio/mpeg" => {
                stream.content_type = Some("audio/mp4".to_string());
            }
            _ => {}
        }

        Ok(stream)
    }

    fn open_file(uri: &str, path: &str) -> Result<Self, StreamError> {
        let meta =
            std::fs::metadata(path).map_err(|_| StreamError::Open(uri.to_string()))?;
        if !meta.is_file() {
            return Err(StreamError::Open(uri.to_string()));
        }
        let file = File::open(path).map_err(|_| StreamError::Open(uri.to_string()))?;

        Ok(Self {
            uri: uri.to_string(),
            backend: Backend::File(file),
            content_type: None,
            size: meta.len(),
            pos: 0,
            buffer: Vec::new(),
            buffer_len: 0,
            skip_len: 0,
            is_seekable: true,
        })
    }

    fn open_http(uri: &str, start: u64) -> Result<Self, StreamError> {
        let (reader, content_type, size, is_seekable) = http_get(uri, start)?;
        Ok(Self {
            uri: uri.to_string(),
            backend: Backend::Http {
                url: uri.to_string(),
                reader,
            },
            content_type,
            size,
            pos: 0,
            buffer: Vec::new(),
            buffer_len: 0,
            skip_len: 0,
            is_seekable,
        })
    }

    /// The buffered bytes.
    #[must_use]
    pub fn buffer(&self) -> &[u8] {
        &self.buffer[..self.buffer_len]
    }

    /// Capacity of the internal buffer.
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    /// Valid bytes currently buffered.
    #[must_use]
    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    /// Reported content type, when known.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Total resource size in bytes (0 when unknown, e.g. live streams).
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Stream position of the first buffered byte.
    #[must_use]
    pub fn pos(&self) -> u64 {
        self.pos
    }

    /// Whether backward seeks are possible.
    #[must_use]
    pub fn is_seekable(&self) -> bool {
        self.is_seekable
    }

    fn backend_read(
        &mut self,
        buf_off: usize,
        len: usize,
        _timeout: Option<Duration>,
    ) -> Result<usize, StreamError> {
        let buf = &mut self.buffer[buf_off..buf_off + len];
        let n = match &mut self.backend {
            Backend::File(f) => f.read(buf)?,
            Backend::Http { reader, .. } => reader.read(buf)?,
        };
        Ok(n)
    }

    fn drain_skip(&mut self, timeout: Option<Duration>) -> Result<(), StreamError> {
        while self.skip_len > 0 {
            let want = usize::try_from(self.skip_len.min(self.buffer.len() as u64))
                .unwrap_or(self.buffer.len());
            let n = self.backend_read(0, want, timeout)?;
            if n == 0 {
                break;
            }
            self.skip_len -= n as u64;
        }
        Ok(())
    }

    /// Discard the buffer and refill it with up to `len` bytes (`0` fills
    /// the whole buffer). Returns the bytes now buffered; `0` means end of
    /// stream or nothing available within the timeout.
    ///
    /// # Errors
    /// Propagates transport failures.
    pub fn read(&mut self, len: usize, timeout: Option<Duration>) -> Result<usize, StreamError> {
        self.drain_skip(timeout)?;

        let want = if len == 0 || len > self.buffer.len() {
            self.buffer.len()
        } else {
            len
        };

        self.pos += self.buffer_len as u64;
        self.buffer_len = 0;
        while self.buffer_len < want {
            let n = self.backend_read(self.buffer_len, want - self.buffer_len, timeout)?;
            if n == 0 {
                break;
            }
            self.buffer_len += n;
        }
        Ok(self.buffer_len)
    }

    /// Append up to `len` bytes to the buffer without discarding unread
    /// data (`0` tops the buffer up). Returns the total buffered length.
    ///
    /// # Errors
    /// Propagates transport failures.
    pub fn complete(
        &mut self,
        len: usize,
        timeout: Option<Duration>,
    ) -> Result<usize, StreamError> {
        self.drain_skip(timeout)?;

        let room = self.buffer.len() - self.buffer_len;
        let want = if len == 0 || len > room { room } else { len };
        let target = self.buffer_len + want;
        while self.buffer_len < target {
            let n = self.backend_read(self.buffer_len, target - self.buffer_len, timeout)?;
            if n == 0 {
                break;
            }
            self.buffer_len += n;
        }
        Ok(self.buffer_len)
    }

    /// Logical seek. In-buffer targets shift the buffer; short forward
    /// seeks on HTTP read-and-discard; anything else re-requests (HTTP) or
    /// seeks the descriptor (file).
    ///
    /// # Errors
    /// `NotSeekable` for backward seeks on live streams; transport errors
    /// otherwise.
    pub fn seek(&mut self, pos: i64, whence: Whence) -> Result<(), StreamError> {
        let rel = match whence {
            Whence::Set => pos - i64::try_from(self.pos).unwrap_or(i64::MAX),
            Whence::Current => pos,
        };

        if rel < 0 && !self.is_seekable {
            return Err(StreamError::NotSeekable);
        }

        let buffered = self.buffer_len as i64;
        let mut kept = 0usize;

        if rel >= 0 && rel < buffered {
            // Target is inside the buffer: shift the tail to the front.
            let off = usize::try_from(rel).unwrap_or(0);
            kept = self.buffer_len - off;
            self.buffer.copy_within(off..self.buffer_len, 0);
        } else if !self.is_seekable
            || (matches!(self.backend, Backend::Http { .. })
                && rel >= 0
                && (rel as u64) < MAX_SKIP_LEN)
        {
            self.skip_len += u64::try_from(rel - buffered).unwrap_or(0);
        } else {
            match &mut self.backend {
                Backend::Http { url, reader } => {
                    let target = self
                        .pos
                        .checked_add_signed(rel)
                        .ok_or(StreamError::SeekOutOfRange)?;
                    debug!(target, "reopening http stream for seek");
                    let url = url.clone();
                    let (new_reader, _, _, _) = http_get(&url, target)?;
                    *reader = new_reader;
                }
                Backend::File(f) => {
                    f.seek(SeekFrom::Current(rel - buffered))?;
                }
            }
        }

        self.pos = self
            .pos
            .checked_add_signed(rel)
            .ok_or(StreamError::SeekOutOfRange)?;
        self.buffer_len = kept;
        Ok(())
    }

    /// Source URI.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }
}

type HttpParts = (Box<dyn Read + Send>, Option<String>, u64, bool);

fn http_get(url: &str, start: u64) -> Result<HttpParts, StreamError> {
    let agent = ureq::Agent::config_builder()
        .timeout_global(Some(Duration::from_secs(30)))
        .build()
        .new_agent();

    let response = agent
        .get(url)
        .header("Range", format!("bytes={start}-"))
        .header("Icy-MetaData", "0")
        .call()
        .map_err(|e| StreamError::Http(e.to_string()))?;

    let status = response.status().as_u16();
    if status != 200 && status != 206 {
        return Err(StreamError::Http(format!("status {status}")));
    }

    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let is_seekable = header("Accept-Ranges").is_some_and(|v| v.starts_with("bytes"));
    let size = header("Content-Length")
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    let content_type = header("Content-Type");

    let reader: Box<dyn Read + Send> = Box::new(response.into_body().into_reader());
    Ok((reader, content_type, size, is_seekable))
}

#[cfg(test)]
mod tests;
