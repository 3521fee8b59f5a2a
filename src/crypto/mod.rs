//! RAOP crypto glue: AirPort RSA key operations and AES-CBC packet
//! decryption.

mod airport_key;

use std::net::Ipv4Addr;
use std::sync::OnceLock;

use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, KeyInit};
use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use rsa::pkcs1::DecodeRsaPrivateKey as _;
use rsa::{Oaep, Pkcs1v15Sign, RsaPrivateKey};
use sha1::Sha1;

use airport_key::AIRPORT_PRIVATE_KEY_DER;

/// Errors from crypto operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Embedded key failed to parse (would be a build defect)
    #[error("airport key unavailable")]
    KeyUnavailable,

    /// Base64 input did not decode
    #[error("invalid base64")]
    InvalidBase64,

    /// RSA decrypt of the wrapped AES key failed
    #[error("rsa decrypt failed")]
    DecryptFailed,

    /// RSA signing failed
    #[error("rsa sign failed")]
    SignFailed,

    /// Key material has the wrong size
    #[error("invalid key length")]
    InvalidKeyLength,
}

fn airport_key() -> Result<&'static RsaPrivateKey, CryptoError> {
    static KEY: OnceLock<Option<RsaPrivateKey>> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::from_pkcs1_der(AIRPORT_PRIVATE_KEY_DER).ok())
        .as_ref()
        .ok_or(CryptoError::KeyUnavailable)
}

/// Answer an `Apple-Challenge`: challenge bytes, server IPv4, hardware
/// address, zero-padded to 32 bytes, signed with the AirPort key and
/// base64-encoded without trailing padding.
///
/// # Errors
/// `InvalidBase64` for an undecodable challenge, `SignFailed` otherwise.
pub fn apple_response(
    challenge_b64: &str,
    server_ip: Ipv4Addr,
    hw_addr: &[u8; 6],
) -> Result<String, CryptoError> {
    let challenge = STANDARD_NO_PAD
        .decode(challenge_b64.trim().trim_end_matches('='))
        .map_err(|_| CryptoError::InvalidBase64)?;

    let mut message = Vec::with_capacity(32);
    message.extend_from_slice(&challenge[..challenge.len().min(16)]);
    message.extend_from_slice(&server_ip.octets());
    message.extend_from_slice(hw_addr);
    message.resize(32, 0);

    let signature = airport_key()?
        .sign(Pkcs1v15Sign::new_unprefixed(), &message)
        .map_err(|_| CryptoError::SignFailed)?;

    let mut encoded = STANDARD.encode(signature);
    while encoded.ends_with('=') {
        encoded.pop();
    }
    Ok(encoded)
}

/// Unwrap the session AES key from the `rsaaeskey` attribute (RSA-OAEP
/// with SHA-1 under the AirPort key).
///
/// # Errors
/// `DecryptFailed` when the ciphertext does not unwrap to 16 bytes.
pub fn decrypt_aes_key(wrapped: &[u8]) -> Result<[u8; 16], CryptoError> {
    let plain = airport_key()?
        .decrypt(Oaep::new::<Sha1>(), wrapped)
        .map_err(|_| CryptoError::DecryptFailed)?;
    plain
        .get(..16)
        .and_then(|s| <[u8; 16]>::try_from(s).ok())
        .ok_or(CryptoError::InvalidKeyLength)
}

/// AES-128-CBC packet decryptor.
///
/// RAOP encrypts only the 16-byte-aligned prefix of each packet and
/// restarts from the session IV every packet; the unaligned tail stays in
/// the clear.
pub struct AudioDecryptor {
    cipher: Aes128,
    iv: [u8; 16],
}

impl AudioDecryptor {
    /// Create from the unwrapped session key and IV.
    #[must_use]
    pub fn new(key: &[u8; 16], iv: &[u8; 16]) -> Self {
        Self {
            cipher: Aes128::new(GenericArray::from_slice(key)),
            iv: *iv,
        }
    }

    /// Decrypt one packet into `out` (same length as the input).
    ///
    /// # Panics
    /// Never: `out` is truncated to the input length first.
    pub fn decrypt(&self, input: &[u8], out: &mut [u8]) {
        let len = input.len().min(out.len());
        let aligned = len & !0xF;

        let mut prev = self.iv;
        for (chunk_in, chunk_out) in input[..aligned]
            .chunks_exact(16)
            .zip(out[..aligned].chunks_exact_mut(16))
        {
            let mut block = GenericArray::clone_from_slice(chunk_in);
            self.cipher.decrypt_block(&mut block);
            for (b, p) in block.iter_mut().zip(prev.iter()) {
                *b ^= *p;
            }
            chunk_out.copy_from_slice(&block);
            prev.copy_from_slice(chunk_in);
        }

        // Trailing unaligned bytes pass through untouched
        out[aligned..len].copy_from_slice(&input[aligned..len]);
    }
}
