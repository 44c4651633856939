//! AES-256-GCM cipher for stored plugin API keys.
//!
//! Blob format: `base64(nonce (12 bytes) || ciphertext || tag (16 bytes))`.
//! A fresh random nonce is drawn for every encryption.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use kiro_types::{BearerToken, CipherError, CredentialCipher};

/// Size of AES-256 key in bytes
const KEY_SIZE: usize = 32;

/// Size of GCM nonce in bytes (96 bits)
const NONCE_SIZE: usize = 12;

const TAG_SIZE: usize = 16;

/// Credential cipher backed by a single AES-256-GCM key.
///
/// Key material is zeroed on drop and `Debug` never prints it.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AesGcmCipher {
    key: [u8; KEY_SIZE],
}

impl AesGcmCipher {
    /// Creates a cipher from exactly 32 raw key bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CipherError> {
        if bytes.len() != KEY_SIZE {
            return Err(CipherError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_SIZE,
                bytes.len()
            )));
        }

        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self { key })
    }

    /// Creates a cipher from a 64-character hex key.
    pub fn from_hex(hex_str: &str) -> Result<Self, CipherError> {
        let mut bytes =
            hex::decode(hex_str.trim()).map_err(|e| CipherError::InvalidKey(e.to_string()))?;
        let cipher = Self::from_bytes(&bytes);
        bytes.zeroize();
        cipher
    }

    /// Derives the key from an arbitrary passphrase with SHA-256.
    pub fn from_secret(secret: &str) -> Result<Self, CipherError> {
        if secret.is_empty() {
            return Err(CipherError::InvalidKey("empty secret".into()));
        }
        let digest = Sha256::digest(secret.as_bytes());
        Self::from_bytes(&digest)
    }

    /// Accepts either a 64-character hex key or a passphrase.
    pub fn from_config(value: &str) -> Result<Self, CipherError> {
        let trimmed = value.trim();
        if trimmed.len() == KEY_SIZE * 2 && trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
            Self::from_hex(trimmed)
        } else {
            Self::from_secret(value)
        }
    }

    /// Generates a new random key, hex-encoded.
    pub fn generate_key_hex() -> String {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        let encoded = hex::encode(key);
        key.zeroize();
        encoded
    }

    /// Encrypts a plaintext plugin API key into a storable blob.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|e| CipherError::InvalidKey(e.to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::EncryptionFailed)?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend(ciphertext);

        Ok(STANDARD.encode(blob))
    }
}

impl CredentialCipher for AesGcmCipher {
    fn decrypt(&self, encrypted_token: &str) -> Result<BearerToken, CipherError> {
        let blob = STANDARD
            .decode(encrypted_token.trim())
            .map_err(|e| CipherError::Malformed(e.to_string()))?;

        if blob.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CipherError::Malformed(format!(
                "blob too short: {} bytes",
                blob.len()
            )));
        }

        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|_| CipherError::DecryptionFailed)?;
        let nonce = Nonce::from_slice(&blob[..NONCE_SIZE]);
        let plaintext = cipher
            .decrypt(nonce, &blob[NONCE_SIZE..])
            .map_err(|_| CipherError::DecryptionFailed)?;

        String::from_utf8(plaintext)
            .map(BearerToken::new)
            .map_err(|_| CipherError::Malformed("plaintext is not UTF-8".into()))
    }
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AesGcmCipher([REDACTED, {} bytes])", KEY_SIZE)
    }
}
