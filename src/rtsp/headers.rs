use std::collections::HashMap;

/// Well-known header names.
pub mod names {
    /// Request sequence number
    pub const CSEQ: &str = "CSeq";
    /// Body content type
    pub const CONTENT_TYPE: &str = "Content-Type";
    /// Body length
    pub const CONTENT_LENGTH: &str = "Content-Length";
    /// Session identifier
    pub const SESSION: &str = "Session";
    /// Transport negotiation
    pub const TRANSPORT: &str = "Transport";
    /// RAOP authentication challenge
    pub const APPLE_CHALLENGE: &str = "Apple-Challenge";
    /// RAOP authentication response
    pub const APPLE_RESPONSE: &str = "Apple-Response";
    /// Flush/record anchor (`seq=`/`rtptime=`)
    pub const RTP_INFO: &str = "RTP-Info";
    /// Digest credentials
    pub const AUTHORIZATION: &str = "Authorization";
    /// Digest challenge
    pub const WWW_AUTHENTICATE: &str = "WWW-Authenticate";
}

/// Case-insensitive header collection.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    inner: HashMap<String, String>,
}

impl Headers {
    /// Create empty headers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, replacing any case-insensitive match. The new key
    /// casing is kept.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.inner.retain(|k, _| !k.eq_ignore_ascii_case(&name));
        self.inner.insert(name, value.into());
    }

    /// Get a header value, case-insensitive.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether a header exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// CSeq value, when present and numeric.
    #[must_use]
    pub fn cseq(&self) -> Option<u32> {
        self.get(names::CSEQ).and_then(|v| v.trim().parse().ok())
    }

    /// Content-Length value.
    #[must_use]
    pub fn content_length(&self) -> Option<usize> {
        self.get(names::CONTENT_LENGTH)
            .and_then(|v| v.trim().parse().ok())
    }

    /// Content-Type value.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.get(names::CONTENT_TYPE)
    }

    /// Iterate over `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
