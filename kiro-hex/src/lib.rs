//! # Kiro Hex
//!
//! Proxy service layer and HTTP adapter for the Kiro plugin API.
//!
//! ## Architecture
//!
//! - `service/` - Proxy service (resolves the caller's key, relays one call)
//! - `inbound/` - HTTP adapter (Axum server)
//!
//! The service is generic over `S: CredentialStore` and `C: CredentialCipher`,
//! allowing different store and cipher implementations to be injected.

pub mod inbound;
pub mod service;

#[cfg(test)]
mod service_tests;

pub use service::{ChunkStream, KiroService};
