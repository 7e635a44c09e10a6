//! URL-safe base64 helpers for JWT segments.

use data_encoding::BASE64URL_NOPAD;

/// URL-safe base64, unpadded.
pub fn base64_encode(bytes: &[u8]) -> String {
    BASE64URL_NOPAD.encode(bytes)
}

/// Decode URL-safe base64. Trailing `=` padding is tolerated since some
/// issuers emit it despite RFC 7515.
pub fn base64_decode(s: &str) -> Result<Vec<u8>, data_encoding::DecodeError> {
    BASE64URL_NOPAD.decode(s.trim_end_matches('=').as_bytes())
}
