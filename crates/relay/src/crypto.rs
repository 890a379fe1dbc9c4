use aes_gcm::aead::{Aead as _, AeadCore as _, KeyInit as _, OsRng};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use std::sync::OnceLock;
use zeroize::{Zeroize as _, Zeroizing};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid encryption key: {0}")]
    InvalidKey(String),
    #[error("encrypt credential failed")]
    Encrypt,
    #[error("decrypt credential failed: {0}")]
    Decrypt(&'static str),
}

enum Cipher {
    Aes128(Aes128Gcm),
    Aes256(Aes256Gcm),
}

/// At-rest encryption for per-user credentials.
///
/// Blobs are `base64(nonce || ciphertext)` with a random 96-bit nonce, AES-GCM with a 128- or
/// 256-bit key supplied as standard base64. The key is imported on first use and kept for the
/// lifetime of the process; an invalid key therefore surfaces on the first credential
/// operation, not at startup.
pub struct CredentialCipher {
    key_b64: Zeroizing<String>,
    cipher: OnceLock<Cipher>,
}

impl CredentialCipher {
    #[must_use]
    pub fn new(key_b64: impl Into<String>) -> Self {
        Self {
            key_b64: Zeroizing::new(key_b64.into()),
            cipher: OnceLock::new(),
        }
    }

    /// Import the key now instead of on first use.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] if the key is not base64 or has the wrong length.
    pub fn warm_up(&self) -> Result<(), CryptoError> {
        self.cipher().map(|_| ())
    }

    fn cipher(&self) -> Result<&Cipher, CryptoError> {
        if let Some(c) = self.cipher.get() {
            return Ok(c);
        }
        let imported = import_key(&self.key_b64)?;
        Ok(self.cipher.get_or_init(|| imported))
    }

    /// # Errors
    ///
    /// Returns an error if the key cannot be imported or encryption fails.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = match self.cipher()? {
            Cipher::Aes128(c) => c.encrypt(&nonce, plaintext.as_bytes()),
            Cipher::Aes256(c) => c.encrypt(&nonce, plaintext.as_bytes()),
        }
        .map_err(|_| CryptoError::Encrypt)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(blob))
    }

    /// # Errors
    ///
    /// Returns an error if the key cannot be imported, the blob is malformed, or
    /// authentication fails (wrong key or tampered ciphertext).
    pub fn decrypt(&self, blob_b64: &str) -> Result<String, CryptoError> {
        let cipher = self.cipher()?;
        let blob = STANDARD
            .decode(blob_b64.trim())
            .map_err(|_| CryptoError::Decrypt("invalid base64"))?;
        if blob.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Decrypt("blob too short"));
        }
        let (iv, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = aes_gcm::Nonce::from_slice(iv);

        let plaintext = match cipher {
            Cipher::Aes128(c) => c.decrypt(nonce, ciphertext),
            Cipher::Aes256(c) => c.decrypt(nonce, ciphertext),
        }
        .map_err(|_| CryptoError::Decrypt("authentication failed"))?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::Decrypt("plaintext is not utf-8"))
    }
}

fn import_key(key_b64: &str) -> Result<Cipher, CryptoError> {
    let mut raw = STANDARD
        .decode(key_b64.trim())
        .map_err(|_| CryptoError::InvalidKey("not valid base64".to_string()))?;

    let cipher = match raw.len() {
        16 => Aes128Gcm::new_from_slice(&raw).map(Cipher::Aes128),
        32 => Aes256Gcm::new_from_slice(&raw).map(Cipher::Aes256),
        n => {
            raw.zeroize();
            return Err(CryptoError::InvalidKey(format!(
                "expected 16 or 32 bytes, got {n}"
            )));
        }
    };
    raw.zeroize();
    cipher.map_err(|_| CryptoError::InvalidKey("rejected by cipher".to_string()))
}

#[cfg(test)]
pub(crate) fn test_key() -> String {
    STANDARD.encode([42u8; 32])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_uses_fresh_nonces() -> anyhow::Result<()> {
        let c = CredentialCipher::new(test_key());
        let a = c.encrypt("project-test-123")?;
        let b = c.encrypt("project-test-123")?;
        assert_ne!(a, b);
        assert_eq!(c.decrypt(&a)?, "project-test-123");
        assert_eq!(c.decrypt(&b)?, "project-test-123");
        Ok(())
    }

    #[test]
    fn aes128_keys_are_accepted() -> anyhow::Result<()> {
        let c = CredentialCipher::new(STANDARD.encode([7u8; 16]));
        let blob = c.encrypt("secret-live-abc")?;
        assert_eq!(c.decrypt(&blob)?, "secret-live-abc");
        Ok(())
    }

    #[test]
    fn blob_layout_is_nonce_then_ciphertext() -> anyhow::Result<()> {
        let c = CredentialCipher::new(test_key());
        let blob = STANDARD.decode(c.encrypt("abc")?)?;
        assert_eq!(blob.len(), NONCE_LEN + 3 + TAG_LEN);
        Ok(())
    }

    #[test]
    fn wrong_key_or_tampering_fails() -> anyhow::Result<()> {
        let c1 = CredentialCipher::new(test_key());
        let c2 = CredentialCipher::new(STANDARD.encode([1u8; 32]));
        let blob = c1.encrypt("hello")?;
        assert!(c2.decrypt(&blob).is_err());

        let mut raw = STANDARD.decode(&blob)?;
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        assert!(c1.decrypt(&STANDARD.encode(raw)).is_err());
        assert!(c1.decrypt("AAAA").is_err());
        Ok(())
    }

    #[test]
    fn invalid_key_surfaces_on_first_use() {
        let c = CredentialCipher::new("not base64!!");
        assert!(matches!(c.warm_up(), Err(CryptoError::InvalidKey(_))));

        let short = CredentialCipher::new(STANDARD.encode([0u8; 20]));
        assert!(matches!(short.encrypt("x"), Err(CryptoError::InvalidKey(_))));
    }
}
