/// Authenticated symmetric encryption for secret parameters
///
/// AES-256-GCM with a 96-bit nonce drawn from the OS RNG on every call and a 128-bit
/// tag. The key is derived once at process start (PBKDF2-HMAC-SHA256) and held by an
/// explicitly constructed [`VaultService`] that callers share through an `Arc`.
/// Storage format is three hex strings: ciphertext, iv, tag.

pub mod secrets;

pub use secrets::{SecretManager, SecretRecord, SecretSummary};

use crate::config::VaultConfig;
use crate::error::{Result, TesseraError};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Ciphertext triple as persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSecret {
    pub ciphertext: String,
    pub iv: String,
    pub tag: String,
}

/// Process-scoped encryption service holding the derived key
pub struct VaultService {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for VaultService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VaultService { key: <redacted> }")
    }
}

impl VaultService {
    /// Derive the key from a configured secret. Deliberately slow; call once.
    pub fn derive(secret: &str, salt: &[u8], iterations: u32) -> Result<Self> {
        if secret.is_empty() {
            return Err(TesseraError::Config("vault secret must not be empty".to_string()));
        }
        if iterations == 0 {
            return Err(TesseraError::Config("vault KDF iterations must be positive".to_string()));
        }

        let mut key = [0u8; KEY_LEN];
        pbkdf2::pbkdf2_hmac::<Sha256>(secret.as_bytes(), salt, iterations, &mut key);
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| TesseraError::Config("derived vault key has invalid length".to_string()));
        key.fill(0);

        Ok(Self { cipher: cipher? })
    }

    pub fn from_config(config: &VaultConfig) -> Result<Self> {
        tracing::info!(
            "🔐 Deriving vault key ({} KDF iterations)",
            config.kdf_iterations
        );
        Self::derive(&config.secret, config.salt.as_bytes(), config.kdf_iterations)
    }

    /// Encrypt under a fresh random nonce
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedSecret> {
        let mut iv = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut iv);

        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
            .map_err(|_| TesseraError::Integrity("encryption failed".to_string()))?;

        // aes-gcm appends the tag to the ciphertext
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);
        Ok(EncryptedSecret {
            ciphertext: hex::encode(ciphertext),
            iv: hex::encode(iv),
            tag: hex::encode(tag),
        })
    }

    /// Decrypt a stored triple; any malformed or unauthenticated input is an integrity error
    pub fn decrypt(&self, ciphertext: &str, iv: &str, tag: &str) -> Result<String> {
        let iv = decode_hex("iv", iv)?;
        let tag = decode_hex("tag", tag)?;
        if iv.len() != NONCE_LEN {
            return Err(TesseraError::Integrity(format!(
                "iv must be {} bytes, got {}",
                NONCE_LEN,
                iv.len()
            )));
        }
        if tag.len() != TAG_LEN {
            return Err(TesseraError::Integrity(format!(
                "tag must be {} bytes, got {}",
                TAG_LEN,
                tag.len()
            )));
        }

        let mut sealed = decode_hex("ciphertext", ciphertext)?;
        sealed.extend_from_slice(&tag);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&iv), sealed.as_ref())
            .map_err(|_| TesseraError::Integrity("authentication tag mismatch".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| TesseraError::Integrity("decrypted value is not valid UTF-8".to_string()))
    }

    pub fn decrypt_secret(&self, secret: &EncryptedSecret) -> Result<String> {
        self.decrypt(&secret.ciphertext, &secret.iv, &secret.tag)
    }
}

fn decode_hex(field: &str, value: &str) -> Result<Vec<u8>> {
    hex::decode(value).map_err(|_| TesseraError::Integrity(format!("{} is not valid hex", field)))
}
