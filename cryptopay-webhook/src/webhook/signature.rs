//! Crypto Pay webhook signature verification.
//!
//! Crypto Pay signs every webhook request with HMAC-SHA256 over the raw
//! request body. The HMAC key is the SHA-256 digest of the app's API token,
//! and the hex-encoded result is sent in the `crypto-pay-api-signature` header.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Name of the header carrying the hex-encoded body signature.
pub const SIGNATURE_HEADER: &str = "crypto-pay-api-signature";

/// HMAC key derived from an API token.
///
/// Only the digest is kept; the raw token is not stored anywhere in the
/// webhook subsystem.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SigningKey([u8; 32]);

impl SigningKey {
    /// Derive the signing key from the raw API token: `SHA256(token)`.
    pub fn derive(token: &str) -> Self {
        Self(Sha256::digest(token.as_bytes()).into())
    }

    /// Verify a webhook body against the signature header value.
    ///
    /// # Arguments
    ///
    /// * `body` - The complete raw request body
    /// * `signature` - The `crypto-pay-api-signature` header value (hex)
    ///
    /// # Returns
    ///
    /// `true` if the signature matches. An empty or non-hex signature is
    /// a mismatch, never an error.
    pub fn verify(&self, body: &[u8], signature: &str) -> bool {
        if signature.is_empty() {
            warn!(body_length = body.len(), "webhook_signature_missing");
            return false;
        }

        let provided = match hex::decode(signature.trim()) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    signature_length = signature.len(),
                    error = %e,
                    "webhook_signature_invalid_hex"
                );
                return false;
            }
        };

        // verify_slice compares in constant time
        let valid = self.mac(body).verify_slice(&provided).is_ok();

        if !valid {
            warn!(
                body_length = body.len(),
                signature_length = provided.len(),
                "webhook_signature_mismatch"
            );
        }

        valid
    }

    /// Compute the hex signature Crypto Pay would send for `body`.
    pub fn sign(&self, body: &[u8]) -> String {
        hex::encode(self.mac(body).finalize().into_bytes())
    }

    fn mac(&self, body: &[u8]) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.0).expect("HMAC can take key of any size");
        mac.update(body);
        mac
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(..)")
    }
}
