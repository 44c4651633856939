//! Port traits (interfaces for adapters).
//!
//! These are the contracts that adapters must implement.
//! The proxy service depends on these traits, not concrete implementations.

mod cipher;
mod credential_store;

pub use cipher::{CipherError, CredentialCipher};
pub use credential_store::{CredentialStore, StoreError};
