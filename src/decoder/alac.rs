//! Apple Lossless decoder.
//!
//! Frame decode is delegated to symphonia; this wrapper owns the magic
//! cookie plumbing and the drain accounting. Each input buffer is one ALAC
//! packet (an RTP payload after decryption, or an MP4 sample).

use symphonia::core::codecs::{CODEC_TYPE_ALAC, CodecParameters};

use super::{Decoder, DecoderError, DecoderInfo, PacketDecoder};
use crate::audio::Sample;

/// ALAC magic cookie length (`ALACSpecificConfig`, without channel layout).
pub const MAGIC_COOKIE_LEN: usize = 24;

/// ALAC decoder.
pub struct AlacDecoder {
    inner: PacketDecoder,
    samplerate: u32,
    channels: u8,
}

impl AlacDecoder {
    /// Open from a magic cookie (24 or 48 bytes).
    ///
    /// # Errors
    /// `InitFailed` when the cookie is truncated or rejected.
    pub fn open(cookie: &[u8]) -> Result<Self, DecoderError> {
        if cookie.len() < MAGIC_COOKIE_LEN {
            return Err(DecoderError::InitFailed(format!(
                "magic cookie too short: {} bytes",
                cookie.len()
            )));
        }

        let channels = cookie[9];
        let samplerate = u32::from_be_bytes([cookie[20], cookie[21], cookie[22], cookie[23]]);

        let mut params = CodecParameters::new();
        params
            .for_codec(CODEC_TYPE_ALAC)
            .with_sample_rate(samplerate)
            .with_extra_data(cookie.to_vec().into_boxed_slice());

        Ok(Self {
            inner: PacketDecoder::new(&params)?,
            samplerate,
            channels,
        })
    }

    /// Cookie-declared format.
    #[must_use]
    pub fn format(&self) -> (u32, u8) {
        (self.samplerate, self.channels)
    }
}

impl Decoder for AlacDecoder {
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
            info.samplerate = self.samplerate;
            info.channels = self.channels;
            return Ok(n);
        }

        let input = input.unwrap_or(&[]);
        if input.is_empty() {
            return Ok(0);
        }

        self.inner.push(input)?;
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

/// Build a magic cookie from the twelve-field RAOP `fmtp` parameter string
/// (`<payload> <frames/packet> <version> <bit depth> <pb> <mb> <kb>
/// <channels> <max run> <max frame bytes> <avg bitrate> <samplerate>`).
///
/// # Errors
/// `InitFailed` when fields are missing or non-numeric.
#[allow(clippy::cast_possible_truncation)]
pub fn cookie_from_fmtp(fmtp: &str) -> Result<[u8; MAGIC_COOKIE_LEN], DecoderError> {
    let fields: Vec<u64> = fmtp
        .split_whitespace()
        .map(|f| {
            f.parse::<u64>()
                .map_err(|_| DecoderError::InitFailed(format!("bad fmtp field: {f}")))
        })
        .collect::<Result<_, _>>()?;

    // With or without the leading payload type
    let offset = match fields.len() {
        12 => 1,
        11 => 0,
        n => {
            return Err(DecoderError::InitFailed(format!(
                "ALAC fmtp needs 11 or 12 fields, got {n}"
            )));
        }
    };
    let field = |i: usize| fields[offset + i];

    let mut cookie = [0u8; MAGIC_COOKIE_LEN];
    cookie[0..4].copy_from_slice(&u32::try_from(field(0)).unwrap_or(352).to_be_bytes());
    cookie[4] = field(1) as u8; // compatible version
    cookie[5] = field(2) as u8; // bit depth
    cookie[6] = field(3) as u8; // pb
    cookie[7] = field(4) as u8; // mb
    cookie[8] = field(5) as u8; // kb
    cookie[9] = field(6) as u8; // channels
    cookie[10..12].copy_from_slice(&(field(7) as u16).to_be_bytes()); // max run
    cookie[12..16].copy_from_slice(&(field(8) as u32).to_be_bytes()); // max frame bytes
    cookie[16..20].copy_from_slice(&(field(9) as u32).to_be_bytes()); // avg bitrate
    cookie[20..24].copy_from_slice(&(field(10) as u32).to_be_bytes()); // samplerate
    Ok(cookie)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FMTP: &str = "96 352 0 16 40 10 14 2 255 0 0 44100";

    #[test]
    fn cookie_from_raop_fmtp() {
        let cookie = cookie_from_fmtp(FMTP).unwrap();
        assert_eq!(u32::from_be_bytes(cookie[0..4].try_into().unwrap()), 352);
        assert_eq!(cookie[5], 16);
        assert_eq!(cookie[9], 2);
        assert_eq!(
            u32::from_be_bytes(cookie[20..24].try_into().unwrap()),
            44100
        );
    }

    #[test]
    fn cookie_without_payload_type() {
        let cookie = cookie_from_fmtp("352 0 16 40 10 14 2 255 0 0 44100").unwrap();
        assert_eq!(cookie[9], 2);
    }

    #[test]
    fn open_reports_cookie_format() {
        let cookie = cookie_from_fmtp(FMTP).unwrap();
        let dec = AlacDecoder::open(&cookie).unwrap();
        assert_eq!(dec.format(), (44100, 2));
    }

    #[test]
    fn short_cookie_rejected() {
        assert!(AlacDecoder::open(&[0u8; 10]).is_err());
    }

    #[test]
    fn bad_fmtp_rejected() {
        assert!(cookie_from_fmtp("96 alac").is_err());
        assert!(cookie_from_fmtp("").is_err());
    }
}
