//! HMAC-SHA256 signatures for webhook callbacks.
//!
//! The sender signs the raw request body with the shared secret and puts the
//! hex digest in the [`SIGNATURE_HEADER`] header.

use hmac::{Hmac, KeyInit, Mac};
use sha2::Sha256;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the callback signature.
pub const SIGNATURE_HEADER: &str = "X-Kling-Signature";

fn mac_for(secret: &[u8]) -> Result<HmacSha256> {
    <HmacSha256 as KeyInit>::new_from_slice(secret)
        .map_err(|e| Error::Signature(format!("unusable callback secret: {e}")))
}

/// Hex-encoded HMAC-SHA256 of `body` under `secret`.
///
/// # Examples
///
/// ```
/// use kling::callback::signature::{sign, verify};
///
/// let body = br#"{"task_id":"t-1","task_status":"succeed"}"#;
/// let signature = sign(b"shared-secret", body).unwrap();
/// assert_eq!(signature.len(), 64);
/// assert!(verify(b"shared-secret", body, Some(&signature)).is_ok());
/// assert!(verify(b"other-secret", body, Some(&signature)).is_err());
/// ```
pub fn sign(secret: &[u8], body: &[u8]) -> Result<String> {
    let mut mac = mac_for(secret)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Checks `signature` against `body` in constant time.
///
/// Accepts an optional `sha256=` prefix. A missing signature is an error.
pub fn verify(secret: &[u8], body: &[u8], signature: Option<&str>) -> Result<()> {
    let signature = signature
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Signature(format!("missing {SIGNATURE_HEADER} header")))?;
    let hex_digest = signature.strip_prefix("sha256=").unwrap_or(signature);
    let expected = hex::decode(hex_digest)
        .map_err(|_| Error::Signature("signature is not hex-encoded".to_string()))?;

    let mut mac = mac_for(secret)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| Error::Signature("signature mismatch".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_depends_on_secret_and_body() {
        let a = sign(b"secret", b"payload").unwrap();
        assert_eq!(a, sign(b"secret", b"payload").unwrap());
        assert_ne!(a, sign(b"secret2", b"payload").unwrap());
        assert_ne!(a, sign(b"secret", b"payload2").unwrap());
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn verify_rejects_missing_and_malformed() {
        let body = b"{}";
        assert!(matches!(verify(b"k", body, None), Err(Error::Signature(_))));
        assert!(matches!(verify(b"k", body, Some("  ")), Err(Error::Signature(_))));
        assert!(matches!(verify(b"k", body, Some("zz")), Err(Error::Signature(_))));

        let good = sign(b"k", body).unwrap();
        assert!(verify(b"k", body, Some(&format!("sha256={good}"))).is_ok());
        assert!(verify(b"k", b"{ }", Some(&good)).is_err());
    }
}
