//! Error types

use crate::crypto::CryptoError;
use crate::decoder::DecoderError;
use crate::demux::DemuxError;
use crate::outputs::OutputError;
use crate::raop::RaopError;
use crate::rtp::RtpError;
use crate::stream::StreamError;

/// Top-level error for `aircat` operations.
#[derive(Debug, thiserror::Error)]
pub enum AirCatError {
    /// Byte source failed
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    /// Demuxer rejected or exhausted the container
    #[error("demux error: {0}")]
    Demux(#[from] DemuxError),

    /// Decoder initialisation or frame decode failed
    #[error("decoder error: {0}")]
    Decoder(#[from] DecoderError),

    /// RTP transport failed
    #[error("rtp error: {0}")]
    Rtp(#[from] RtpError),

    /// Output device or mixer failed
    #[error("output error: {0}")]
    Output(#[from] OutputError),

    /// RAOP session failed
    #[error("raop error: {0}")]
    Raop(#[from] RaopError),

    /// Cryptographic operation failed
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Underlying I/O failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
