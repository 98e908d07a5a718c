//! Field-level encryption for stored message text
//!
//! Subject, body and snippet are encrypted individually with AES-256-GCM.
//! Each envelope is `base64(nonce || ciphertext)` with a fresh 96-bit nonce.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use thiserror::Error;

/// Nonce size for AES-GCM (96 bits / 12 bytes)
const NONCE_SIZE: usize = 12;

/// AES-256 key size
const KEY_SIZE: usize = 32;

/// Encryption errors
#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Invalid encrypted data format: {0}")]
    InvalidFormat(String),
}

/// Encrypts text fields before they reach storage
pub trait FieldEncryptor: Send + Sync {
    /// Encrypt a plaintext string into an opaque envelope
    fn encrypt(&self, plaintext: &str) -> Result<String, EncryptionError>;

    /// Recover the plaintext from an envelope produced by [`encrypt`](Self::encrypt)
    fn decrypt(&self, envelope: &str) -> Result<String, EncryptionError>;
}

/// AES-256-GCM field encryptor
pub struct AesGcmEncryptor {
    cipher: Aes256Gcm,
}

impl AesGcmEncryptor {
    /// Create an encryptor from raw key bytes
    pub fn new(key: &[u8]) -> Result<Self, EncryptionError> {
        if key.len() != KEY_SIZE {
            return Err(EncryptionError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_SIZE,
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| EncryptionError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Create an encryptor from a base64-encoded 32-byte key
    pub fn from_base64_key(encoded: &str) -> Result<Self, EncryptionError> {
        let key = BASE64
            .decode(encoded.trim())
            .map_err(|e| EncryptionError::InvalidKey(format!("Invalid base64 encoding: {}", e)))?;
        Self::new(&key)
    }

    /// Generate a random key, base64-encoded (for provisioning)
    pub fn generate_key() -> String {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        BASE64.encode(key)
    }
}

impl FieldEncryptor for AesGcmEncryptor {
    fn encrypt(&self, plaintext: &str) -> Result<String, EncryptionError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| EncryptionError::Encryption(format!("AES-GCM encryption failed: {}", e)))?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(&combined))
    }

    fn decrypt(&self, envelope: &str) -> Result<String, EncryptionError> {
        let combined = BASE64.decode(envelope).map_err(|e| {
            EncryptionError::InvalidFormat(format!("Invalid base64 encoding: {}", e))
        })?;

        if combined.len() < NONCE_SIZE {
            return Err(EncryptionError::InvalidFormat(format!(
                "Encrypted data too short: {} bytes",
                combined.len()
            )));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let plaintext_bytes = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| {
                EncryptionError::Decryption(format!(
                    "AES-GCM decryption failed (wrong key or corrupted data): {}",
                    e
                ))
            })?;

        String::from_utf8(plaintext_bytes).map_err(|e| {
            EncryptionError::Decryption(format!("Decrypted data is not valid UTF-8: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encryptor() -> AesGcmEncryptor {
        AesGcmEncryptor::new(&[7u8; KEY_SIZE]).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt() {
        let enc = encryptor();
        let envelope = enc.encrypt("Quarterly numbers").unwrap();
        assert_ne!(envelope, "Quarterly numbers");
        assert!(BASE64.decode(&envelope).is_ok());
        assert_eq!(enc.decrypt(&envelope).unwrap(), "Quarterly numbers");
    }

    #[test]
    fn test_same_plaintext_different_envelopes() {
        let enc = encryptor();
        let a = enc.encrypt("same").unwrap();
        let b = enc.encrypt("same").unwrap();
        assert_ne!(a, b);
        assert_eq!(enc.decrypt(&a).unwrap(), enc.decrypt(&b).unwrap());
    }

    #[test]
    fn test_empty_plaintext_round_trips() {
        let enc = encryptor();
        let envelope = enc.encrypt("").unwrap();
        assert_eq!(enc.decrypt(&envelope).unwrap(), "");
    }

    #[test]
    fn test_wrong_key_fails() {
        let envelope = encryptor().encrypt("secret").unwrap();
        let other = AesGcmEncryptor::new(&[8u8; KEY_SIZE]).unwrap();
        assert!(matches!(
            other.decrypt(&envelope),
            Err(EncryptionError::Decryption(_))
        ));
    }

    #[test]
    fn test_invalid_envelopes() {
        let enc = encryptor();
        assert!(enc.decrypt("not_base64!@#$%").is_err());
        assert!(enc.decrypt(&BASE64.encode("short")).is_err());
    }

    #[test]
    fn test_key_validation() {
        assert!(AesGcmEncryptor::new(&[0u8; 16]).is_err());
        assert!(AesGcmEncryptor::from_base64_key("***").is_err());

        let key = AesGcmEncryptor::generate_key();
        let enc = AesGcmEncryptor::from_base64_key(&key).unwrap();
        let envelope = enc.encrypt("hi").unwrap();
        assert_eq!(enc.decrypt(&envelope).unwrap(), "hi");
    }
}
