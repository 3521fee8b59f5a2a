//! Compressed-stream demuxers.
//!
//! A demuxer owns the [`Stream`] and keeps its read window aligned so that
//! the first buffered byte is the first byte of the next compressed frame.
//! The decoder reports back how many bytes it consumed through
//! [`Demuxer::set_used`].

pub mod mp3;
pub mod mp4;

use crate::decoder::Codec;
use crate::stream::{Stream, StreamError};

/// Errors from demuxer open or frame iteration.
#[derive(Debug, thiserror::Error)]
pub enum DemuxError {
    /// Content type has no demuxer
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Container data did not parse
    #[error("invalid container: {0}")]
    Invalid(&'static str),

    /// Seek target beyond the media
    #[error("position out of range")]
    OutOfRange,

    /// Underlying stream failed
    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// Container-derived stream properties and tags. Mutated only during open.
#[derive(Debug, Clone, Default)]
pub struct Meta {
    /// Sample rate reported by the container
    pub samplerate: u32,
    /// Channel count reported by the container
    pub channels: u8,
    /// Bitrate in kbit/s (0 when unknown)
    pub bitrate: u32,
    /// Duration in seconds (0 when unknown)
    pub length: u64,
    /// Track title
    pub title: Option<String>,
    /// Artist
    pub artist: Option<String>,
    /// Album
    pub album: Option<String>,
    /// Comment
    pub comment: Option<String>,
    /// Genre
    pub genre: Option<String>,
    /// Release year
    pub year: u32,
    /// Track number
    pub track: u16,
    /// Track count
    pub total_track: u16,
    /// Embedded cover art
    pub picture: Option<Picture>,
}

/// Embedded cover art.
#[derive(Clone)]
pub struct Picture {
    /// Raw image bytes
    pub data: Vec<u8>,
    /// MIME type
    pub mime: String,
}

impl std::fmt::Debug for Picture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Picture")
            .field("mime", &self.mime)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Decoder bootstrap data extracted by the demuxer.
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Codec of the elementary stream
    pub codec: Codec,
    /// Codec-specific config blob (`esds` payload for AAC)
    pub config: Option<Vec<u8>>,
}

/// Common demuxer contract.
pub trait Demuxer: Send {
    /// Container properties and tags.
    fn meta(&self) -> &Meta;

    /// Codec and setup blob for the decoder.
    fn dec_config(&self) -> DecoderConfig;

    /// Advance the stream window to the next compressed frame. Returns the
    /// window length, or `None` at end of stream.
    ///
    /// # Errors
    /// Propagates stream failures.
    fn next_frame(&mut self) -> Result<Option<usize>, DemuxError>;

    /// Bytes of the current frame window.
    fn frame(&self) -> &[u8];

    /// Declare how many window bytes the decoder consumed.
    fn set_used(&mut self, len: usize);

    /// Seek to `sec` seconds; returns the actually achieved position.
    ///
    /// # Errors
    /// `OutOfRange` past the end, stream errors otherwise.
    fn set_pos(&mut self, sec: u64) -> Result<u64, DemuxError>;
}

/// Open the demuxer matching the stream's content type. Returns the demuxer
/// and the container-declared sample rate and channel count.
///
/// # Errors
/// `UnsupportedFormat` for unknown content types, parse errors otherwise.
pub fn open(stream: Stream) -> Result<(Box<dyn Demuxer>, u32, u8), DemuxError> {
    let content_type = stream.content_type().unwrap_or("").to_string();
    match content_type.as_str() {
        "audio/mpeg" | "audio/mp3" => {
            let (demux, samplerate, channels) = mp3::Mp3Demuxer::open(stream)?;
            Ok((Box::new(demux), samplerate, channels))
        }
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" => {
            let (demux, samplerate, channels) = mp4::Mp4Demuxer::open(stream)?;
            Ok((Box::new(demux), samplerate, channels))
        }
        other => Err(DemuxError::UnsupportedFormat(other.to_string())),
    }
}
