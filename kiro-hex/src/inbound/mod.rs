//! HTTP Inbound Adapter
//!
//! Axum-based HTTP server that exposes the proxy catalogue.

mod handlers;
mod identity;
mod server;

pub use identity::{CallerId, USER_ID_HEADER};
pub use server::HttpServer;
