/// HMAC-SHA256 request signatures
///
/// The media-processing callback and the notification relay sign their JSON
/// bodies with a shared secret; the hex digest travels in the
/// `X-Toq-Signature` header, optionally prefixed with `sha256=`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::codes::constant_time_compare;

/// Header carrying the body signature
pub const SIGNATURE_HEADER: &str = "X-Toq-Signature";

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `body`
pub fn sign_body(secret: &[u8], body: &[u8]) -> String {
    // new_from_slice accepts keys of any length for HMAC
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a signature header value against `body`
pub fn verify_signature(secret: &[u8], body: &[u8], header_value: &str) -> bool {
    let provided = header_value.trim();
    let provided = provided.strip_prefix("sha256=").unwrap_or(provided);
    let expected = sign_body(secret, body);
    !expected.is_empty()
        && constant_time_compare(provided.to_ascii_lowercase().as_bytes(), expected.as_bytes())
}
