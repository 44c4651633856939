//! Chat models served by the upstream Kiro endpoints.

/// Client-side copy of the model catalogue.
///
/// The upstream `/v1/kiro/models` endpoint stays authoritative; this list is
/// kept for reference and for offline listings.
pub const SUPPORTED_MODELS: [&str; 5] = [
    "claude-sonnet-4-5",
    "claude-sonnet-4-5-20250929",
    "claude-sonnet-4-20250514",
    "claude-opus-4-5-20251101",
    "claude-haiku-4-5-20251001",
];
