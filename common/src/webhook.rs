// Inbound webhook signature verification

use crate::errors::ValidationError;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex-encoded HMAC-SHA256 signature of the raw body
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Verify the HMAC-SHA256 signature of a webhook request.
///
/// # Arguments
/// * `payload` - The raw request body bytes
/// * `signature` - The signature from the request header (hex-encoded)
/// * `secret` - The shared secret configured for this webhook source
///
/// # Returns
/// * `Ok(true)` if the signature is valid
/// * `Ok(false)` if the signature is invalid
/// * `Err` if the signature or secret cannot be processed at all
pub fn verify_signature(
    payload: &[u8],
    signature: &str,
    secret: &str,
) -> Result<bool, ValidationError> {
    let provided = hex::decode(signature).map_err(|e| ValidationError::InvalidFieldValue {
        field: "signature".to_string(),
        reason: format!("not valid hex: {}", e),
    })?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| {
            ValidationError::InvalidFieldValue {
                field: "secret".to_string(),
                reason: format!("Invalid secret key: {}", e),
            }
        })?;
    mac.update(payload);

    // verify_slice is a constant-time comparison
    Ok(mac.verify_slice(&provided).is_ok())
}

/// Compute the hex signature for a payload. Producers (and tests) use this
/// to sign requests the way the verifier expects.
pub fn sign_payload(payload: &[u8], secret: &str) -> Result<String, ValidationError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| {
            ValidationError::InvalidFieldValue {
                field: "secret".to_string(),
                reason: format!("Invalid secret key: {}", e),
            }
        })?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}
