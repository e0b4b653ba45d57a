//! GitHub-style webhook signature verification.
//!
//! The sender signs the raw request body with HMAC-SHA1 keyed by the shared
//! secret and sends `sha1=<hex digest>` in the signature header.

use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use tracing::warn;

use crate::error::RelayError;

type HmacSha1 = Hmac<Sha1>;

/// Compute the signature header value for `body` under `secret`.
pub fn compute_signature(secret: &[u8], body: &[u8]) -> Result<String, InvalidLength> {
    let mut mac = HmacSha1::new_from_slice(secret)?;
    mac.update(body);
    Ok(format!("sha1={}", hex::encode(mac.finalize().into_bytes())))
}

/// Verify a claimed signature against the body.
///
/// # Arguments
///
/// * `secret` - The shared webhook secret
/// * `body` - The raw request body, exactly as received
/// * `claimed` - The signature header value, empty if the header was absent
///
/// # Returns
///
/// `Ok(())` if `claimed` equals the computed signature byte for byte,
/// `RelayError::Authentication` otherwise.
pub fn verify_signature(secret: &[u8], body: &[u8], claimed: &str) -> Result<(), RelayError> {
    let expected = match compute_signature(secret, body) {
        Ok(signature) => signature,
        Err(_) => {
            warn!("webhook_signature_invalid_key");
            return Err(RelayError::Authentication);
        }
    };

    if constant_time_compare(&expected, claimed) {
        Ok(())
    } else {
        warn!(
            has_signature = !claimed.is_empty(),
            expected_length = expected.len(),
            actual_length = claimed.len(),
            "webhook_signature_mismatch"
        );
        Err(RelayError::Authentication)
    }
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}
