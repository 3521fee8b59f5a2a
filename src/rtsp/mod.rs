//! RTSP request/response engine.
//!
//! Line-oriented and tiny: a sans-IO server codec parses requests out of a
//! byte buffer (`WAIT_REQUEST` → body accumulation → dispatch), responses
//! are encoded back to bytes. Digest authentication guards sessions when a
//! password is configured.

pub mod auth;
mod codec;
/// Header collection and well-known names
pub mod headers;
mod message;

pub use auth::{DigestAuth, digest_response};
pub use codec::{RtspParseError, RtspServerCodec};
pub use headers::Headers;
pub use message::{Method, RtspRequest, RtspResponse, StatusCode};
