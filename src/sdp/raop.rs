//! RAOP-specific SDP extraction: codec, format parameters and the
//! RSA-wrapped AES session key from an ANNOUNCE body.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD_NO_PAD;

use super::{MediaDescription, SdpParseError};
use crate::decoder::Codec;

/// Encryption material from `rsaaeskey`/`aesiv` attributes.
#[derive(Clone)]
pub struct EncryptionParams {
    /// RSA-OAEP-encrypted AES key, base64-decoded but not yet decrypted
    pub wrapped_key: Vec<u8>,
    /// AES CBC initialisation vector
    pub iv: [u8; 16],
}

impl std::fmt::Debug for EncryptionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of logs
        f.debug_struct("EncryptionParams").finish_non_exhaustive()
    }
}

/// Audio stream parameters negotiated by ANNOUNCE.
#[derive(Debug, Clone)]
pub struct StreamParams {
    /// Negotiated codec
    pub codec: Codec,
    /// Raw `fmtp` parameter string (codec-specific)
    pub fmtp: Option<String>,
    /// Raw `rtpmap` value
    pub rtpmap: Option<String>,
    /// Key material, absent for unencrypted senders
    pub encryption: Option<EncryptionParams>,
}

fn decode_b64(value: &str) -> Result<Vec<u8>, SdpParseError> {
    // Clients send these with or without padding
    STANDARD_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|_| SdpParseError::InvalidAttribute(format!("bad base64: {value}")))
}

impl StreamParams {
    /// Extract stream parameters from the `audio` media section.
    ///
    /// # Errors
    /// `UnsupportedCodec` for unknown rtpmap entries, `InvalidAttribute`
    /// for undecodable key material.
    pub fn parse(media: &MediaDescription) -> Result<Self, SdpParseError> {
        let rtpmap = media.attribute("rtpmap");
        let codec = match rtpmap {
            Some(value) => {
                // "96 AppleLossless", "96 L16/44100/2", "96 mpeg4-generic/44100/2"
                let name = value.split_whitespace().nth(1).unwrap_or("");
                if name.starts_with("L16") {
                    Codec::Pcm
                } else if name.starts_with("AppleLossless") {
                    Codec::Alac
                } else if name.starts_with("mpeg4-generic") {
                    Codec::Aac
                } else {
                    return Err(SdpParseError::UnsupportedCodec(name.to_string()));
                }
            }
            None => return Err(SdpParseError::InvalidAttribute("missing rtpmap".into())),
        };

        let mut fmtp = media.attribute("fmtp").map(str::to_string);
        // PCM senders often omit fmtp; the rtpmap line carries the format
        if fmtp.is_none() && codec == Codec::Pcm {
            fmtp = rtpmap.map(str::to_string);
        }

        let encryption = match media.attribute("rsaaeskey") {
            Some(key_b64) => {
                let wrapped_key = decode_b64(key_b64)?;
                let iv_raw = media
                    .attribute("aesiv")
                    .map(decode_b64)
                    .transpose()?
                    .ok_or_else(|| SdpParseError::InvalidAttribute("missing aesiv".into()))?;
                let iv: [u8; 16] = iv_raw.try_into().map_err(|_| {
                    SdpParseError::InvalidAttribute("aesiv is not 16 bytes".into())
                })?;
                Some(EncryptionParams { wrapped_key, iv })
            }
            None => None,
        };

        Ok(Self {
            codec,
            fmtp,
            rtpmap: rtpmap.map(str::to_string),
            encryption,
        })
    }
}
