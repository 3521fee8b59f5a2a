//! AAC decoder.
//!
//! Consumes raw access units delimited by the MP4 sample table (or the RTP
//! payload for RAOP). The `AudioSpecificConfig` comes from the `esds` atom;
//! a raw ADTS frame passed as config is converted on the fly (some radio
//! streams hand over their first frame instead of an ASC).

use symphonia::core::codecs::{CODEC_TYPE_AAC, CodecParameters};

use super::{Decoder, DecoderError, DecoderInfo, PacketDecoder};
use crate::audio::Sample;

const SAMPLERATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// AAC decoder.
pub struct AacDecoder {
    inner: PacketDecoder,
    samplerate: u32,
    channels: u8,
}

fn looks_like_adts(config: &[u8]) -> bool {
    config.len() >= 7 && config[0] == 0xFF && (config[1] & 0xF6) == 0xF0
}

/// Two-byte `AudioSpecificConfig` from an ADTS frame header.
fn asc_from_adts(frame: &[u8]) -> [u8; 2] {
    let object_type = (frame[2] >> 6) + 1;
    let sf_index = (frame[2] >> 2) & 0x0F;
    let channel_config = ((frame[2] & 0x01) << 2) | (frame[3] >> 6);
    [
        (object_type << 3) | (sf_index >> 1),
        ((sf_index & 0x01) << 7) | (channel_config << 3),
    ]
}

fn parse_asc(asc: &[u8]) -> Option<(u32, u8)> {
    if asc.len() < 2 {
        return None;
    }
    let sf_index = usize::from(((asc[0] & 0x07) << 1) | (asc[1] >> 7));
    let channel_config = (asc[1] >> 3) & 0x0F;
    let samplerate = SAMPLERATES.get(sf_index).copied()?;
    Some((samplerate, channel_config))
}

impl AacDecoder {
    /// Open from an `AudioSpecificConfig` blob, or from a raw ADTS/ADIF
    /// frame carried in place of one.
    ///
    /// # Errors
    /// `InitFailed` when no usable config can be derived.
    pub fn open(config: &[u8]) -> Result<Self, DecoderError> {
        let asc: Vec<u8> = if looks_like_adts(config) {
            asc_from_adts(config).to_vec()
        } else if config.starts_with(b"ADIF") {
            return Err(DecoderError::InitFailed(
                "ADIF streams are not supported".to_string(),
            ));
        } else {
            config.to_vec()
        };

        let (samplerate, channels) = parse_asc(&asc)
            .ok_or_else(|| DecoderError::InitFailed("bad AudioSpecificConfig".to_string()))?;

        let mut params = CodecParameters::new();
        params
            .for_codec(CODEC_TYPE_AAC)
            .with_sample_rate(samplerate)
            .with_extra_data(asc.into_boxed_slice());

        Ok(Self {
            inner: PacketDecoder::new(&params)?,
            samplerate,
            channels,
        })
    }

    /// Config-declared format. The first decoded frame may override it;
    /// callers should trust [`DecoderInfo`] over the container.
    #[must_use]
    pub fn format(&self) -> (u32, u8) {
        (self.samplerate, self.channels)
    }
}

impl Decoder for AacDecoder {
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
            info.samplerate = if self.inner.samplerate != 0 {
                self.inner.samplerate
            } else {
                self.samplerate
            };
            info.channels = if self.inner.channels != 0 {
                self.inner.channels
            } else {
                self.channels
            };
            return Ok(n);
        }

        let input = input.unwrap_or(&[]);
        if input.is_empty() {
            return Ok(0);
        }

        // ADTS-wrapped access units lose their 7 (or 9) header bytes
        let payload = if looks_like_adts(input) {
            let header_len = if input[1] & 0x01 == 0 { 9 } else { 7 };
            &input[header_len.min(input.len())..]
        } else {
            input
        };

        self.inner.push(payload)?;
        info.used = input.len();

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asc_parses_lc_44100_stereo() {
        // AAC-LC, 44.1 kHz, 2 channels
        let asc = [0x12, 0x10];
        assert_eq!(parse_asc(&asc), Some((44100, 2)));
    }

    #[test]
    fn adts_header_to_asc() {
        // Synthesized ADTS header: LC profile (raw 01), sf index 4, 2 ch
        let adts = [0xFF, 0xF1, 0x50, 0x80, 0x00, 0x1F, 0xFC];
        let asc = asc_from_adts(&adts);
        assert_eq!(parse_asc(&asc), Some((44100, 2)));
    }

    #[test]
    fn open_from_asc() {
        let dec = AacDecoder::open(&[0x12, 0x10]).unwrap();
        assert_eq!(dec.format(), (44100, 2));
    }

    #[test]
    fn garbage_config_rejected() {
        assert!(AacDecoder::open(&[0xAA]).is_err());
    }
}
