//! SDP mini-parser.
//!
//! Enough of RFC 4566 for RAOP ANNOUNCE bodies: session-level lines,
//! media sections and their attributes.

mod raop;

pub use raop::{EncryptionParams, StreamParams};

use std::collections::HashMap;

/// Errors from SDP parsing.
#[derive(Debug, thiserror::Error)]
pub enum SdpParseError {
    /// Input held no media section of the wanted kind
    #[error("missing media section: {0}")]
    MissingMedia(&'static str),

    /// A required attribute is absent or malformed
    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),

    /// Codec named by rtpmap is not supported
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),
}

/// One `m=` section and its attributes.
#[derive(Debug, Clone, Default)]
pub struct MediaDescription {
    /// Full `m=` value (`audio 0 RTP/AVP 96`)
    pub media: String,
    /// Attributes; value is `None` for flag attributes
    pub attributes: HashMap<String, Option<String>>,
}

impl MediaDescription {
    /// Media kind (first token of the `m=` line).
    #[must_use]
    pub fn kind(&self) -> &str {
        self.media.split_whitespace().next().unwrap_or("")
    }

    /// Attribute value by name.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(Option::as_deref)
    }
}

/// A parsed session description.
#[derive(Debug, Clone, Default)]
pub struct SessionDescription {
    /// Session name (`s=`)
    pub session_name: String,
    /// Origin line (`o=`)
    pub origin: Option<String>,
    /// Connection line (`c=`)
    pub connection: Option<String>,
    /// Session-level attributes
    pub attributes: HashMap<String, Option<String>>,
    /// Media sections
    pub media: Vec<MediaDescription>,
}

impl SessionDescription {
    /// Parse an SDP document. Total over arbitrary input: unknown line
    /// types are skipped.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let mut sdp = Self::default();
        let mut current: Option<MediaDescription> = None;

        for line in input.lines() {
            let line = line.trim_end();
            if line.len() < 2 || line.as_bytes()[1] != b'=' {
                continue;
            }
            let value = &line[2..];

            match line.as_bytes()[0] {
                b's' => sdp.session_name = value.to_string(),
                b'o' => sdp.origin = Some(value.to_string()),
                b'c' => {
                    if current.is_none() {
                        sdp.connection = Some(value.to_string());
                    }
                }
                b'm' => {
                    if let Some(media) = current.take() {
                        sdp.media.push(media);
                    }
                    current = Some(MediaDescription {
                        media: value.to_string(),
                        attributes: HashMap::new(),
                    });
                }
                b'a' => {
                    let (name, attr_value) = match value.split_once(':') {
                        Some((n, v)) => (n.to_string(), Some(v.to_string())),
                        None => (value.to_string(), None),
                    };
                    if let Some(media) = &mut current {
                        media.attributes.insert(name, attr_value);
                    } else {
                        sdp.attributes.insert(name, attr_value);
                    }
                }
                _ => {}
            }
        }

        if let Some(media) = current {
            sdp.media.push(media);
        }
        sdp
    }

    /// First media section of the given kind.
    #[must_use]
    pub fn media_of_kind(&self, kind: &str) -> Option<&MediaDescription> {
        self.media.iter().find(|m| m.kind() == kind)
    }
}

#[cfg(test)]
mod tests;
