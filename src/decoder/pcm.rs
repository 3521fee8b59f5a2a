//! PCM pass-through decoder.
//!
//! Input samples arrive big-endian (network order); the optional 44-byte
//! RIFF header in the config selects channels, rate and bit depth.

use super::{Decoder, DecoderError, DecoderInfo};
use crate::audio::{self, Sample};

/// PCM "decoder": big-endian byte groups to native samples.
pub struct PcmDecoder {
    samplerate: u32,
    channels: u8,
    bytes_per_sample: usize,
}

impl PcmDecoder {
    /// Open the decoder, parsing a RIFF fmt header when provided. A missing
    /// or malformed config falls back to 44.1 kHz stereo 16-bit (the RAOP
    /// `L16` case).
    #[must_use]
    pub fn open(config: Option<&[u8]>) -> Self {
        config
            .and_then(Self::parse_riff)
            .unwrap_or(Self {
                samplerate: 44100,
                channels: 2,
                bytes_per_sample: 2,
            })
    }

    fn parse_riff(config: &[u8]) -> Option<PcmDecoder> {
        if config.len() < 44 || &config[0..4] != b"RIFF" || &config[12..15] != b"fmt" {
            return None;
        }
        // Audio format 1 = PCM
        if u16::from_le_bytes([config[20], config[21]]) != 1 {
            return None;
        }
        let channels = u16::from_le_bytes([config[22], config[23]]);
        let samplerate = u32::from_le_bytes([config[24], config[25], config[26], config[27]]);
        let bits = u16::from_le_bytes([config[34], config[35]]);
        if channels == 0 || samplerate == 0 || !matches!(bits, 8 | 16 | 24 | 32) {
            return None;
        }
        Some(PcmDecoder {
            samplerate,
            channels: u8::try_from(channels).ok()?,
            bytes_per_sample: usize::from(bits / 8),
        })
    }

    /// Config-declared format.
    #[must_use]
    pub fn format(&self) -> (u32, u8) {
        (self.samplerate, self.channels)
    }
}

impl Decoder for PcmDecoder {
    fn decode(
        &mut self,
        input: Option<&[u8]>,
        out: &mut [Sample],
        info: &mut DecoderInfo,
    ) -> Result<usize, DecoderError> {
        info.samplerate = self.samplerate;
        info.channels = self.channels;
        info.remaining = 0;
        info.used = 0;

        let Some(input) = input else {
            return Ok(0);
        };

        let bps = self.bytes_per_sample;
        let samples = (input.len() / bps).min(out.len());
        for (i, slot) in out.iter_mut().take(samples).enumerate() {
            let group = &input[i * bps..i * bps + bps];
            // Left-justify into a full-scale value, whatever the depth
            let mut v: u32 = 0;
            for (k, &b) in group.iter().enumerate() {
                v |= u32::from(b) << (24 - 8 * k);
            }
            #[allow(clippy::cast_possible_wrap)]
            {
                *slot = audio::from_i32(v as i32);
            }
        }

        info.used = samples * bps;
        Ok(samples)
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_config() {
        let dec = PcmDecoder::open(None);
        assert_eq!(dec.format(), (44100, 2));
    }

    fn riff_header(channels: u16, rate: u32, bits: u16) -> [u8; 44] {
        let mut h = [0u8; 44];
        h[0..4].copy_from_slice(b"RIFF");
        h[8..12].copy_from_slice(b"WAVE");
        h[12..16].copy_from_slice(b"fmt ");
        h[20..22].copy_from_slice(&1u16.to_le_bytes());
        h[22..24].copy_from_slice(&channels.to_le_bytes());
        h[24..28].copy_from_slice(&rate.to_le_bytes());
        h[34..36].copy_from_slice(&bits.to_le_bytes());
        h
    }

    #[test]
    fn parses_riff_config() {
        let dec = PcmDecoder::open(Some(&riff_header(1, 48000, 24)));
        assert_eq!(dec.format(), (48000, 1));
    }

    #[cfg(not(feature = "float-samples"))]
    #[test]
    fn decodes_big_endian_16bit() {
        let mut dec = PcmDecoder::open(None);
        // Two stereo samples: 0x0102, 0x0304, 0x7FFF, 0x8000
        let input = [0x01, 0x02, 0x03, 0x04, 0x7F, 0xFF, 0x80, 0x00];
        let mut out = [0i16; 8];
        let mut info = DecoderInfo::default();
        let n = dec.decode(Some(&input), &mut out, &mut info).unwrap();
        assert_eq!(n, 4);
        assert_eq!(info.used, 8);
        assert_eq!(&out[..4], &[0x0102, 0x0304, 0x7FFF, -32768]);
    }

    #[cfg(not(feature = "float-samples"))]
    #[test]
    fn partial_trailing_bytes_stay_unconsumed() {
        let mut dec = PcmDecoder::open(None);
        let input = [0x01, 0x02, 0x03];
        let mut out = [0i16; 4];
        let mut info = DecoderInfo::default();
        let n = dec.decode(Some(&input), &mut out, &mut info).unwrap();
        assert_eq!(n, 1);
        assert_eq!(info.used, 2);
    }
}
