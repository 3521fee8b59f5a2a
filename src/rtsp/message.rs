use super::Headers;
use super::headers::names;

/// RTSP methods understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Session announcement (SDP body)
    Announce,
    /// Media description request
    Describe,
    /// Capability probe
    Options,
    /// Transport negotiation
    Setup,
    /// Start of streaming
    Record,
    /// Parameter update (volume, progress, metadata)
    SetParameter,
    /// Parameter query
    GetParameter,
    /// Drop queued audio
    Flush,
    /// Playback start
    Play,
    /// Playback pause
    Pause,
    /// Session end
    Teardown,
}

impl Method {
    /// Parse a method token.
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ANNOUNCE" => Some(Self::Announce),
            "DESCRIBE" => Some(Self::Describe),
            "OPTIONS" => Some(Self::Options),
            "SETUP" => Some(Self::Setup),
            "RECORD" => Some(Self::Record),
            "SET_PARAMETER" => Some(Self::SetParameter),
            "GET_PARAMETER" => Some(Self::GetParameter),
            "FLUSH" => Some(Self::Flush),
            "PLAY" => Some(Self::Play),
            "PAUSE" => Some(Self::Pause),
            "TEARDOWN" => Some(Self::Teardown),
            _ => None,
        }
    }

    /// Wire token.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Announce => "ANNOUNCE",
            Self::Describe => "DESCRIBE",
            Self::Options => "OPTIONS",
            Self::Setup => "SETUP",
            Self::Record => "RECORD",
            Self::SetParameter => "SET_PARAMETER",
            Self::GetParameter => "GET_PARAMETER",
            Self::Flush => "FLUSH",
            Self::Play => "PLAY",
            Self::Pause => "PAUSE",
            Self::Teardown => "TEARDOWN",
        }
    }
}

/// An RTSP request message.
#[derive(Debug, Clone)]
pub struct RtspRequest {
    /// Request method
    pub method: Method,
    /// Request URI
    pub uri: String,
    /// Request headers
    pub headers: Headers,
    /// Request body (may be empty)
    pub body: Vec<u8>,
}

impl RtspRequest {
    /// Create a bodyless request (mostly for tests).
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Encode to wire bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256 + self.body.len());
        out.extend_from_slice(self.method.as_str().as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.uri.as_bytes());
        out.extend_from_slice(b" RTSP/1.0\r\n");
        for (name, value) in self.headers.iter() {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        if !self.body.is_empty() && !self.headers.contains(names::CONTENT_LENGTH) {
            out.extend_from_slice(
                format!("{}: {}\r\n", names::CONTENT_LENGTH, self.body.len()).as_bytes(),
            );
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

/// RTSP status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCode(pub u16);

impl StatusCode {
    /// 200
    pub const OK: StatusCode = StatusCode(200);
    /// 400
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    /// 401
    pub const UNAUTHORIZED: StatusCode = StatusCode(401);
    /// 404
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    /// 405
    pub const METHOD_NOT_ALLOWED: StatusCode = StatusCode(405);
    /// 500
    pub const INTERNAL_ERROR: StatusCode = StatusCode(500);
    /// 503
    pub const SERVICE_UNAVAILABLE: StatusCode = StatusCode(503);

    /// Standard reason phrase.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self.0 {
            200 => "OK",
            400 => "Bad Request",
            401 => "Unauthorized",
            404 => "Not Found",
            405 => "Method Not Allowed",
            500 => "Internal Server Error",
            503 => "Service Unavailable",
            _ => "Unknown",
        }
    }
}

/// An RTSP response message.
#[derive(Debug, Clone)]
pub struct RtspResponse {
    /// Status code
    pub status: StatusCode,
    /// Response headers
    pub headers: Headers,
    /// Response body
    pub body: Vec<u8>,
}

impl RtspResponse {
    /// Create a response with the given status.
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Builder-style header insertion.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Encode to wire bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256 + self.body.len());
        out.extend_from_slice(
            format!("RTSP/1.0 {} {}\r\n", self.status.0, self.status.reason()).as_bytes(),
        );
        for (name, value) in self.headers.iter() {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        if !self.body.is_empty() {
            out.extend_from_slice(
                format!("{}: {}\r\n", names::CONTENT_LENGTH, self.body.len()).as_bytes(),
            );
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}
