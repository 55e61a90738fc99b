use hmac::{Hmac, Mac as _};
use sha2::Sha256;

pub const HEADER: &str = "X-Hub-Signature-256";
const PREFIX: &[u8] = b"sha256=";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("`X-Hub-Signature-256` header isn't found")]
    HeaderNotFound,
    #[error("`X-Hub-Signature-256` has invalid length")]
    InvalidLength,
    #[error("`X-Hub-Signature-256` must start with `sha256=`")]
    InvalidPrefix,
    #[error("signature must be 64 hex digits")]
    NotHex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature(pub [u8; 32]);

impl Signature {
    pub fn from_headers(headers: &actix_web::http::header::HeaderMap) -> Result<Self, Error> {
        let sig_b = headers
            .get(HEADER)
            .ok_or(Error::HeaderNotFound)?
            .as_bytes();
        Self::parse(sig_b)
    }

    pub fn parse(sig_b: &[u8]) -> Result<Self, Error> {
        let prefix_len = PREFIX.len();
        if sig_b.len() != 64 + prefix_len {
            return Err(Error::InvalidLength);
        }
        let (sig_prefix, sig_b) = sig_b.split_at(prefix_len);
        if sig_prefix != PREFIX {
            return Err(Error::InvalidPrefix);
        }

        hex::FromHex::from_hex(sig_b)
            .map(Self)
            .map_err(|_| Error::NotHex)
    }

    /// Checks that this signature is the HMAC-SHA256 of `body` keyed with
    /// `secret`. The comparison runs in constant time.
    pub fn verify(&self, secret: &[u8], body: &[u8]) -> bool {
        let mut mac = match Hmac::<Sha256>::new_from_slice(secret) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(body);
        mac.verify_slice(&self.0).is_ok()
    }
}

/// Renders the header value GitHub would send for `body`.
#[cfg(test)]
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
