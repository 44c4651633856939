//! Error types for the plugin proxy.

use crate::ports::{CipherError, StoreError};

/// Errors surfaced by every proxy operation.
///
/// Nothing is recovered locally; callers map these to their own responses.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// No credential record for the user, or the record is inactive.
    #[error("Plugin API key is not configured for this user")]
    NotConfigured,

    /// A caller-supplied identifier cannot be used as a path segment.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid upstream response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cipher(#[from] CipherError),
}

impl ProxyError {
    /// Parses the upstream body as JSON, when it is JSON.
    pub fn upstream_json(&self) -> Option<serde_json::Value> {
        match self {
            ProxyError::Upstream { body, .. } => serde_json::from_str(body).ok(),
            _ => None,
        }
    }
}
