//! Credential cipher port.
//!
//! Keeps the encryption scheme of stored credentials swappable.

use std::sync::Arc;

use crate::domain::BearerToken;

/// Error type for credential decryption.
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("Malformed credential blob: {0}")]
    Malformed(String),

    #[error("Credential decryption failed")]
    DecryptionFailed,

    #[error("Credential encryption failed")]
    EncryptionFailed,

    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),
}

/// Turns a stored credential blob back into a usable bearer token.
pub trait CredentialCipher: Send + Sync + 'static {
    fn decrypt(&self, encrypted_token: &str) -> Result<BearerToken, CipherError>;
}

impl<T: CredentialCipher + ?Sized> CredentialCipher for Arc<T> {
    fn decrypt(&self, encrypted_token: &str) -> Result<BearerToken, CipherError> {
        (**self).decrypt(encrypted_token)
    }
}
