//! # Kiro Types
//!
//! Domain types and port traits for the Kiro plugin proxy.
//! This crate has ZERO external IO dependencies - only data structures,
//! request shapes, and trait definitions.
//!
//! ## Architecture
//!
//! This crate represents the **innermost core** of the hexagonal architecture:
//! - `domain/` - Pure domain types (UserId, CredentialRecord, BearerToken)
//! - `ports/` - Trait definitions that adapters must implement
//! - `dto/` - Fixed-shape request bodies and query parameters for the upstream
//! - `error/` - Proxy error taxonomy

pub mod domain;
pub mod dto;
pub mod error;
pub mod ports;

// Re-export commonly used types
pub use domain::{BearerToken, CredentialRecord, SUPPORTED_MODELS, UserId};
pub use dto::*;
pub use error::ProxyError;
pub use ports::{CipherError, CredentialCipher, CredentialStore, StoreError};

/// Opaque JSON object exchanged with the upstream gateway.
pub type JsonObject = serde_json::Map<String, serde_json::Value>;
