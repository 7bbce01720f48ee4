//! Cryptographic operations for endpoint secrets and payload signing.
//!
//! - HMAC-SHA256 computation for delivery payload signatures
//! - AES-256-GCM encryption/decryption for endpoint secrets at rest

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::WebhookError;

/// Nonce size for AES-GCM (96 bits / 12 bytes).
const NONCE_SIZE: usize = 12;

type HmacSha256 = Hmac<Sha256>;

// ---------------------------------------------------------------------------
// HMAC-SHA256 payload signing
// ---------------------------------------------------------------------------

/// Compute the signature header value for a delivery body.
///
/// The MAC covers the exact request body; the receiver verifies against
/// the bytes it read off the wire. Format: `sha256=<hex>`.
pub fn signature_header(secret: &str, body: &[u8]) -> String {
    format!("sha256={}", compute_hmac(secret, body))
}

/// Compute the hex-encoded HMAC-SHA256 of a body.
pub fn compute_hmac(secret: &str, body: &[u8]) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");

    mac.update(body);

    hex::encode(mac.finalize().into_bytes())
}

/// Verify a `sha256=<hex>` signature using constant-time comparison.
pub fn verify_signature(expected: &str, secret: &str, body: &[u8]) -> bool {
    let computed = signature_header(secret, body);
    constant_time_eq(expected.as_bytes(), computed.as_bytes())
}

/// Constant-time byte comparison.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}

// ---------------------------------------------------------------------------
// AES-256-GCM encryption/decryption (for secrets at rest)
// ---------------------------------------------------------------------------

/// Encrypt a plaintext secret to a base64-encoded string for DB storage.
///
/// Format: base64(nonce || ciphertext || auth_tag)
pub fn encrypt_secret(plaintext: &str, key: &[u8]) -> Result<String, WebhookError> {
    if key.len() != 32 {
        return Err(WebhookError::EncryptionFailed(format!(
            "Invalid key length: expected 32 bytes, got {}",
            key.len()
        )));
    }

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| WebhookError::EncryptionFailed(e.to_string()))?;

    use rand::rngs::OsRng;
    use rand::RngCore;
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| WebhookError::EncryptionFailed(e.to_string()))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(&result))
}

/// Decrypt a base64-encoded secret from DB storage back to plaintext.
pub fn decrypt_secret(encoded: &str, key: &[u8]) -> Result<String, WebhookError> {
    if key.len() != 32 {
        return Err(WebhookError::EncryptionFailed(format!(
            "Invalid key length: expected 32 bytes, got {}",
            key.len()
        )));
    }

    let encrypted = BASE64
        .decode(encoded)
        .map_err(|e| WebhookError::EncryptionFailed(format!("Base64 decode failed: {e}")))?;

    if encrypted.len() < NONCE_SIZE + 1 {
        return Err(WebhookError::EncryptionFailed(
            "Invalid encrypted data format".to_string(),
        ));
    }

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| WebhookError::EncryptionFailed(e.to_string()))?;

    let nonce = Nonce::from_slice(&encrypted[..NONCE_SIZE]);
    let ciphertext = &encrypted[NONCE_SIZE..];

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| WebhookError::EncryptionFailed(e.to_string()))?;

    String::from_utf8(plaintext).map_err(|e| WebhookError::EncryptionFailed(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; 32] {
        [0x42u8; 32]
    }

    // --- HMAC tests ---

    #[test]
    fn test_signature_deterministic() {
        let sig1 = signature_header("secret", b"payload");
        let sig2 = signature_header("secret", b"payload");
        assert_eq!(sig1, sig2);
    }

    #[test]
    fn test_signature_format() {
        let sig = signature_header("secret", b"payload");
        let hex_part = sig.strip_prefix("sha256=").expect("sha256= prefix");
        // SHA256 = 32 bytes = 64 hex chars
        assert_eq!(hex_part.len(), 64);
        assert!(hex_part.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_signature_changes_with_secret() {
        assert_ne!(
            signature_header("secret1", b"payload"),
            signature_header("secret2", b"payload")
        );
    }

    #[test]
    fn test_signature_changes_with_body() {
        assert_ne!(
            signature_header("secret", b"payload1"),
            signature_header("secret", b"payload2")
        );
    }

    #[test]
    fn test_signature_covers_exact_body_bytes() {
        // Same JSON value, different serialization: signatures must differ,
        // because the MAC covers the bytes on the wire.
        let compact = br#"{"a":1}"#;
        let spaced = br#"{"a": 1}"#;
        assert_ne!(
            signature_header("secret", compact),
            signature_header("secret", spaced)
        );
    }

    #[test]
    fn test_verify_signature_valid() {
        let sig = signature_header("my-secret", b"body");
        assert!(verify_signature(&sig, "my-secret", b"body"));
    }

    #[test]
    fn test_verify_signature_invalid() {
        assert!(!verify_signature("sha256=deadbeef", "secret", b"body"));
        let sig = signature_header("my-secret", b"body");
        assert!(!verify_signature(&sig, "other-secret", b"body"));
    }

    // --- AES-GCM tests ---

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = test_key();
        let plaintext = "my-webhook-secret-key-12345";

        let encrypted = encrypt_secret(plaintext, &key).expect("encryption failed");
        let decrypted = decrypt_secret(&encrypted, &key).expect("decryption failed");

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_different_encryptions_produce_different_ciphertext() {
        let key = test_key();
        let plaintext = "same-secret";

        let enc1 = encrypt_secret(plaintext, &key).expect("encryption failed");
        let enc2 = encrypt_secret(plaintext, &key).expect("encryption failed");

        // Random nonce makes ciphertexts differ
        assert_ne!(enc1, enc2);

        assert_eq!(
            decrypt_secret(&enc1, &key).unwrap(),
            decrypt_secret(&enc2, &key).unwrap()
        );
    }

    #[test]
    fn test_invalid_key_length() {
        let short_key = [0u8; 16];
        assert!(encrypt_secret("test", &short_key).is_err());
        assert!(decrypt_secret("dGVzdA==", &short_key).is_err());
    }

    #[test]
    fn test_decrypt_with_wrong_key() {
        let encrypted = encrypt_secret("secret", &[0x42u8; 32]).expect("encryption failed");
        assert!(decrypt_secret(&encrypted, &[0x43u8; 32]).is_err());
    }

    #[test]
    fn test_decrypt_invalid_base64() {
        assert!(decrypt_secret("not-valid-base64!!!", &test_key()).is_err());
    }

    #[test]
    fn test_decrypt_too_short() {
        let short = BASE64.encode([0u8; 5]);
        assert!(decrypt_secret(&short, &test_key()).is_err());
    }
}
