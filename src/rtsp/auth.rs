//! RTSP digest authentication (RFC 2069 subset, MD5).

use md5::{Digest as _, Md5};
use rand::RngCore as _;

fn md5_hex(input: &[u8]) -> String {
    let digest = Md5::digest(input);
    let mut out = String::with_capacity(32);
    for b in digest {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Expected digest response for the given credentials and request.
#[must_use]
pub fn digest_response(
    username: &str,
    realm: &str,
    password: &str,
    method: &str,
    uri: &str,
    nonce: &str,
) -> String {
    let ha1 = md5_hex(format!("{username}:{realm}:{password}").as_bytes());
    let ha2 = md5_hex(format!("{method}:{uri}").as_bytes());
    md5_hex(format!("{ha1}:{nonce}:{ha2}").as_bytes())
}

/// Per-client digest state: one nonce per connection.
pub struct DigestAuth {
    nonce: String,
}

impl Default for DigestAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl DigestAuth {
    /// Create with a fresh random nonce.
    #[must_use]
    pub fn new() -> Self {
        let mut raw = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut raw);
        Self {
            nonce: md5_hex(&raw),
        }
    }

    /// `WWW-Authenticate` header value challenging the client.
    #[must_use]
    pub fn challenge(&self, realm: &str) -> String {
        format!("Digest realm=\"{realm}\", nonce=\"{}\"", self.nonce)
    }

    /// Check an `Authorization` header against the configured password.
    /// The username is whatever the client sent; RAOP clients use the
    /// device name or an empty string.
    #[must_use]
    pub fn check(&self, authorization: &str, realm: &str, password: &str, method: &str) -> bool {
        let Some(username) = sub_value(authorization, "username") else {
            return false;
        };
        let Some(auth_realm) = sub_value(authorization, "realm") else {
            return false;
        };
        if auth_realm != realm {
            return false;
        }
        let Some(nonce) = sub_value(authorization, "nonce") else {
            return false;
        };
        if nonce != self.nonce {
            return false;
        }
        let Some(uri) = sub_value(authorization, "uri") else {
            return false;
        };
        let Some(response) = sub_value(authorization, "response") else {
            return false;
        };

        let expected = digest_response(&username, realm, password, method, &uri, &nonce);
        expected.len() == response.len()
            && expected
                .bytes()
                .zip(response.bytes())
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }
}

/// Extract `name="value"` from a digest header.
fn sub_value(header: &str, name: &str) -> Option<String> {
    let mut search = header;
    loop {
        let pos = search.find(name)?;
        let rest = &search[pos + name.len()..];
        if let Some(rest) = rest.strip_prefix("=\"") {
            let end = rest.find('"')?;
            return Some(rest[..end].to_string());
        }
        search = &search[pos + name.len()..];
    }
}
