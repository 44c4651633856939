//! Domain models for the plugin proxy.

pub mod credential;
pub mod models;

pub use credential::{BearerToken, CredentialRecord, UserId};
pub use models::SUPPORTED_MODELS;
