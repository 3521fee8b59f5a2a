//! Audio decoders.
//!
//! One uniform contract over PCM pass-through, ALAC, MP3 and AAC. A decoder
//! consumes at most one compressed frame per call, reports how many input
//! bytes it used, and buffers overflow PCM internally; callers drain the
//! buffer with `input = None` until `remaining` reaches zero. Frame DSP is
//! delegated to symphonia; this module owns framing and accounting.

mod aac;
/// ALAC decoding and magic-cookie helpers
pub mod alac;
mod mp3;
mod pcm;

pub use aac::AacDecoder;
pub use alac::AlacDecoder;
pub use mp3::Mp3Decoder;
pub use pcm::PcmDecoder;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, DecoderOptions};
use symphonia::core::formats::Packet;

use crate::audio::Sample;

/// Elementary stream codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// Uncompressed big-endian PCM
    Pcm,
    /// Apple Lossless
    Alac,
    /// MPEG audio layer I/II/III
    Mp3,
    /// MPEG-4 AAC
    Aac,
}

/// Per-call decode accounting.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecoderInfo {
    /// Bytes consumed from the input buffer
    pub used: usize,
    /// Samples still buffered inside the decoder
    pub remaining: usize,
    /// Sample rate of the decoded audio
    pub samplerate: u32,
    /// Channel count of the decoded audio
    pub channels: u8,
}

/// Errors from decoder open or decode.
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    /// The input window ends inside a frame; feed more bytes. `used` bytes
    /// of leading garbage may be discarded.
    #[error("partial frame, need more data")]
    NeedMoreData {
        /// Bytes safe to consume before retrying
        used: usize,
    },

    /// No frame sync in the window; `used` bytes may be discarded.
    #[error("lost frame sync")]
    LostSync {
        /// Bytes safe to consume before retrying
        used: usize,
    },

    /// Decoder could not be constructed from the given config
    #[error("decoder init failed: {0}")]
    InitFailed(String),

    /// Frame decode failed fatally
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Uniform decoder contract.
pub trait Decoder: Send {
    /// Decode one step. With `input = Some(..)` consumes at most one frame
    /// and writes PCM into `out`; with `input = None` drains internally
    /// buffered PCM. Returns samples written (one value per channel per
    /// sample).
    ///
    /// # Errors
    /// `NeedMoreData`/`LostSync` ask the caller to refill or resync; other
    /// errors are fatal for the stream.
    fn decode(
        &mut self,
        input: Option<&[u8]>,
        out: &mut [Sample],
        info: &mut DecoderInfo,
    ) -> Result<usize, DecoderError>;

    /// Rewind the internally buffered PCM so it is delivered again.
    fn reset(&mut self);
}

/// Open the decoder for `codec` with its config blob. Returns the decoder
/// and the config-declared sample rate and channels (0 when the stream
/// itself will reveal them).
///
/// # Errors
/// `InitFailed` when the config is unusable.
pub fn open(
    codec: Codec,
    config: Option<&[u8]>,
) -> Result<(Box<dyn Decoder>, u32, u8), DecoderError> {
    match codec {
        Codec::Pcm => {
            let dec = PcmDecoder::open(config);
            let (samplerate, channels) = dec.format();
            Ok((Box::new(dec), samplerate, channels))
        }
        Codec::Alac => {
            let cookie = config.ok_or_else(|| {
                DecoderError::InitFailed("ALAC requires a magic cookie".to_string())
            })?;
            let dec = AlacDecoder::open(cookie)?;
            let (samplerate, channels) = dec.format();
            Ok((Box::new(dec), samplerate, channels))
        }
        Codec::Mp3 => {
            let dec = Mp3Decoder::open()?;
            Ok((Box::new(dec), 0, 0))
        }
        Codec::Aac => {
            let asc = config.ok_or_else(|| {
                DecoderError::InitFailed("AAC requires a decoder config".to_string())
            })?;
            let dec = AacDecoder::open(asc)?;
            let (samplerate, channels) = dec.format();
            Ok((Box::new(dec), samplerate, channels))
        }
    }
}

/// Shared symphonia packet-decode state: one decoded frame buffered as
/// interleaved samples, drained incrementally.
struct PacketDecoder {
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    queued: Vec<Sample>,
    pos: usize,
    samplerate: u32,
    channels: u8,
    ts: u64,
}

impl PacketDecoder {
    fn new(params: &CodecParameters) -> Result<Self, DecoderError> {
        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| DecoderError::InitFailed(e.to_string()))?;
        Ok(Self {
            decoder,
            queued: Vec::new(),
            pos: 0,
            samplerate: 0,
            channels: 0,
            ts: 0,
        })
    }

    fn push(&mut self, data: &[u8]) -> Result<(), DecoderError> {
        let packet = Packet::new_from_slice(0, self.ts, 0, data);
        self.ts += 1;

        let decoded = self
            .decoder
            .decode(&packet)
            .map_err(|e| DecoderError::Decode(e.to_string()))?;

        let spec = *decoded.spec();
        self.samplerate = spec.rate;
        self.channels = u8::try_from(spec.channels.count()).unwrap_or(2);

        let mut buf = SampleBuffer::<Sample>::new(decoded.capacity() as u64, spec);
        buf.copy_interleaved_ref(decoded);
        self.queued.clear();
        self.queued.extend_from_slice(buf.samples());
        self.pos = 0;
        Ok(())
    }

    fn drain(&mut self, out: &mut [Sample]) -> usize {
        let n = (self.queued.len() - self.pos).min(out.len());
        out[..n].copy_from_slice(&self.queued[self.pos..self.pos + n]);
        self.pos += n;
        n
    }

    fn remaining(&self) -> usize {
        self.queued.len() - self.pos
    }

    fn rewind(&mut self) {
        self.pos = 0;
    }
}
