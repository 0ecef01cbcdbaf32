//! Sealing for provider API secrets.
//!
//! AES-256-GCM with a random 12-byte nonce prepended to the ciphertext,
//! base64-encoded for storage. The key material is padded/truncated to 32
//! bytes so operators can hand in a passphrase of any length.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use courier_core::{CoreError, CoreResult};

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;

/// Seals and opens provider secrets.
#[derive(Clone)]
pub struct SecretBox {
    cipher: Aes256Gcm,
}

impl SecretBox {
    pub fn new(key_material: &str) -> Self {
        let mut key = [0u8; KEY_SIZE];
        let bytes = key_material.as_bytes();
        let len = bytes.len().min(KEY_SIZE);
        key[..len].copy_from_slice(&bytes[..len]);
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        }
    }

    /// Encrypt a plaintext secret for storage.
    pub fn seal(&self, plaintext: &str) -> CoreResult<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CoreError::storage(format!("seal secret: {e}")))?;
        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }

    /// Decrypt a stored secret for an outbound call.
    pub fn open(&self, sealed: &str) -> CoreResult<String> {
        let bytes = BASE64
            .decode(sealed)
            .map_err(|e| CoreError::storage(format!("open secret: {e}")))?;
        if bytes.len() < NONCE_SIZE {
            return Err(CoreError::storage("open secret: ciphertext too short"));
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| CoreError::storage(format!("open secret: {e}")))?;
        String::from_utf8(plaintext)
            .map_err(|e| CoreError::storage(format!("open secret: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open_round_trips() {
        let secrets = SecretBox::new("courier-provider-key");
        let sealed = secrets.seal("vendor-api-secret").unwrap();
        assert_ne!(sealed, "vendor-api-secret");
        assert_eq!(secrets.open(&sealed).unwrap(), "vendor-api-secret");
    }

    #[test]
    fn each_seal_uses_a_fresh_nonce() {
        let secrets = SecretBox::new("courier-provider-key");
        let a = secrets.seal("same").unwrap();
        let b = secrets.seal("same").unwrap();
        assert_ne!(a, b);
        assert_eq!(secrets.open(&a).unwrap(), secrets.open(&b).unwrap());
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let sealed = SecretBox::new("key-one").seal("secret").unwrap();
        assert!(SecretBox::new("key-two").open(&sealed).is_err());
    }

    #[test]
    fn truncated_ciphertext_is_rejected() {
        let secrets = SecretBox::new("k");
        assert!(secrets.open("AAAA").is_err());
        assert!(secrets.open("not base64 !!!").is_err());
    }
}
