//! MPEG audio decoder.
//!
//! The input window is an arbitrary byte stream: this wrapper finds the
//! next frame boundary itself, reports skipped garbage through `used`, and
//! hands whole frames to symphonia.

use symphonia::core::codecs::{CODEC_TYPE_MP3, CodecParameters};
use tracing::trace;

use super::{Decoder, DecoderError, DecoderInfo, PacketDecoder};
use crate::audio::Sample;
use crate::demux::mp3::FrameHeader;

/// MP3 decoder.
pub struct Mp3Decoder {
    inner: PacketDecoder,
}

impl Mp3Decoder {
    /// Open the decoder. Format is discovered from the first frame.
    ///
    /// # Errors
    /// `InitFailed` when the codec is unavailable.
    pub fn open() -> Result<Self, DecoderError> {
        let mut params = CodecParameters::new();
        params.for_codec(CODEC_TYPE_MP3);
        Ok(Self {
            inner: PacketDecoder::new(&params)?,
        })
    }

    /// Locate the next complete frame in `buf`.
    fn sync(buf: &[u8]) -> Result<(usize, usize), DecoderError> {
        let mut i = 0;
        while i + 4 <= buf.len() {
            if buf[i] == 0xFF && (buf[i + 1] & 0xE0) == 0xE0 {
                if let Some(frame) = FrameHeader::parse(&buf[i..]) {
                    if i + frame.length > buf.len() {
                        return Err(DecoderError::NeedMoreData { used: i });
                    }
                    return Ok((i, frame.length));
                }
            }
            i += 1;
        }
        Err(DecoderError::LostSync {
            used: buf.len().saturating_sub(3),
        })
    }
}

impl Decoder for Mp3Decoder {
    fn decode(
        &mut self,
        input: Option<&[u8]>,
        out: &mut [Sample],
        info: &mut DecoderInfo,
    ) -> Result<usize, DecoderError> {
        info.used = 0;

        if self.inner.remaining() > 0 || input.is_none() {
            let n = self.inner.drain(out);
            info.remaining = self.inner.remaining();
            info.samplerate = self.inner.samplerate;
            info.channels = self.inner.channels;
            return Ok(n);
        }

        let input = input.unwrap_or(&[]);
        if input.is_empty() {
            return Ok(0);
        }

        let (start, frame_len) = Self::sync(input)?;
        if start > 0 {
            trace!(skipped = start, "resynchronised mpeg stream");
        }

        match self.inner.push(&input[start..start + frame_len]) {
            Ok(()) => {}
            Err(DecoderError::Decode(_)) => {
                // False sync; skip the bogus syncword and try again later
                return Err(DecoderError::LostSync { used: start + 2 });
            }
            Err(e) => return Err(e),
        }
        info.used = start + frame_len;

        let n = self.inner.drain(out);
        info.remaining = self.inner.remaining();
        info.samplerate = self.inner.samplerate;
        info.channels = self.inner.channels;
        Ok(n)
    }

    fn reset(&mut self) {
        self.inner.rewind();
    }
}
