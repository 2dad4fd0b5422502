//! Field encryption for secrets at rest.
//!
//! Secret registry columns (service passwords) are stored as
//! hex(nonce ‖ ciphertext) under AES-256-GCM. The master key is
//! operator-managed and loaded from the environment or a key file.
//!
//! The empty string encrypts to the empty string, so optional secret
//! columns stay empty instead of becoming ciphertext of nothing.

use std::fs;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

const KEY_BYTES: usize = 32;
const NONCE_BYTES: usize = 12;

#[derive(Debug, Error)]
pub enum SecretsCryptoError {
    #[error("missing secrets master key (set MDSB_SECRETS_KEY or MDSB_SECRETS_KEY_FILE)")]
    MissingMasterKey,
    #[error("invalid secrets master key encoding")]
    InvalidMasterKey,
    #[error("secret encryption failed")]
    EncryptFailed,
    #[error("secret decryption failed")]
    DecryptFailed,
    #[error("stored ciphertext is malformed: {0}")]
    InvalidCiphertext(String),
}

fn load_master_key_bytes() -> Result<[u8; KEY_BYTES], SecretsCryptoError> {
    if let Ok(raw) = std::env::var("MDSB_SECRETS_KEY") {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(raw.trim())
            .map_err(|_| SecretsCryptoError::InvalidMasterKey)?;
        return bytes
            .as_slice()
            .try_into()
            .map_err(|_| SecretsCryptoError::InvalidMasterKey);
    }

    if let Ok(path) = std::env::var("MDSB_SECRETS_KEY_FILE") {
        let contents = fs::read_to_string(path).map_err(|_| SecretsCryptoError::InvalidMasterKey)?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(contents.trim())
            .map_err(|_| SecretsCryptoError::InvalidMasterKey)?;
        return bytes
            .as_slice()
            .try_into()
            .map_err(|_| SecretsCryptoError::InvalidMasterKey);
    }

    Err(SecretsCryptoError::MissingMasterKey)
}

/// Short identifier for the loaded master key, for startup logging.
///
/// Derived from a digest of the key bytes; never reveals the key itself.
pub fn master_key_id() -> Result<String, SecretsCryptoError> {
    let key_bytes = load_master_key_bytes()?;
    let digest = Sha256::digest(key_bytes);
    Ok(hex::encode(digest)[..8].to_string())
}

/// Encrypt a secret field for storage.
pub fn encrypt_field(plaintext: &str) -> Result<String, SecretsCryptoError> {
    if plaintext.is_empty() {
        return Ok(String::new());
    }

    let key_bytes = load_master_key_bytes()?;
    let cipher =
        Aes256Gcm::new_from_slice(&key_bytes).map_err(|_| SecretsCryptoError::EncryptFailed)?;

    let mut nonce_bytes = [0u8; NONCE_BYTES];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| SecretsCryptoError::EncryptFailed)?;

    let mut stored = Vec::with_capacity(NONCE_BYTES + ciphertext.len());
    stored.extend_from_slice(&nonce_bytes);
    stored.extend_from_slice(&ciphertext);
    Ok(hex::encode(stored))
}

/// Decrypt a stored secret field.
pub fn decrypt_field(stored: &str) -> Result<String, SecretsCryptoError> {
    if stored.is_empty() {
        return Ok(String::new());
    }

    let bytes = hex::decode(stored)
        .map_err(|e| SecretsCryptoError::InvalidCiphertext(e.to_string()))?;
    if bytes.len() <= NONCE_BYTES {
        return Err(SecretsCryptoError::InvalidCiphertext(format!(
            "length {} is not larger than the nonce size {}",
            bytes.len(),
            NONCE_BYTES
        )));
    }

    let key_bytes = load_master_key_bytes()?;
    let cipher =
        Aes256Gcm::new_from_slice(&key_bytes).map_err(|_| SecretsCryptoError::DecryptFailed)?;

    let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_BYTES);
    let nonce = Nonce::from_slice(nonce_bytes);
    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| SecretsCryptoError::DecryptFailed)?;

    String::from_utf8(plaintext).map_err(|e| SecretsCryptoError::InvalidCiphertext(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // 32 zero bytes, base64-encoded
    const TEST_KEY: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

    fn with_test_key() {
        std::env::set_var("MDSB_SECRETS_KEY", TEST_KEY);
    }

    #[test]
    fn empty_string_passes_through() {
        with_test_key();
        assert_eq!(encrypt_field("").unwrap(), "");
        assert_eq!(decrypt_field("").unwrap(), "");
    }

    #[test]
    fn ciphertext_differs_from_plaintext() {
        with_test_key();
        let stored = encrypt_field("pw-hunter2").unwrap();
        assert_ne!(stored, "pw-hunter2");
        assert!(!stored.contains("hunter2"));
    }

    #[test]
    fn nonces_are_fresh_per_encryption() {
        with_test_key();
        let a = encrypt_field("same input").unwrap();
        let b = encrypt_field("same input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn truncated_ciphertext_is_rejected() {
        with_test_key();
        let err = decrypt_field("0011aabb").unwrap_err();
        assert!(matches!(err, SecretsCryptoError::InvalidCiphertext(_)));
    }

    #[test]
    fn tampered_ciphertext_fails_decryption() {
        with_test_key();
        let mut stored = encrypt_field("pw-hunter2").unwrap();
        // flip the final hex digit
        let flipped = if stored.ends_with('0') { '1' } else { '0' };
        stored.pop();
        stored.push(flipped);
        assert!(decrypt_field(&stored).is_err());
    }

    #[test]
    fn master_key_id_is_stable() {
        with_test_key();
        assert_eq!(master_key_id().unwrap(), master_key_id().unwrap());
        assert_eq!(master_key_id().unwrap().len(), 8);
    }

    proptest! {
        #[test]
        fn roundtrip_recovers_any_nonempty_string(plaintext in ".{1,256}") {
            with_test_key();
            let stored = encrypt_field(&plaintext).unwrap();
            prop_assert_eq!(decrypt_field(&stored).unwrap(), plaintext);
        }
    }
}
