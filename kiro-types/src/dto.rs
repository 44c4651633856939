//! Request bodies and query parameters sent to the upstream gateway.

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// OAuth DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// Body of `POST /api/kiro/oauth/authorize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthAuthorizeRequest {
    /// Identity provider the user signs in with (e.g. "Google", "Github")
    pub provider: String,
    /// 1 when the resulting account is shared with other users
    #[serde(default)]
    pub is_shared: i32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Account DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// Body of `PUT /api/kiro/accounts/{id}/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: i32,
}

/// Body of `PUT /api/kiro/accounts/{id}/name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateNameRequest {
    pub account_name: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Consumption queries
// ─────────────────────────────────────────────────────────────────────────────

/// Query for `GET /api/kiro/accounts/{id}/consumption`.
///
/// Unset fields are left out of the query string entirely. Empty date
/// strings count as unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumptionQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    #[serde(skip_serializing_if = "is_blank")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "is_blank")]
    pub end_date: Option<String>,
}

impl ConsumptionQuery {
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn start_date(mut self, date: impl Into<String>) -> Self {
        self.start_date = Some(date.into());
        self
    }

    pub fn end_date(mut self, date: impl Into<String>) -> Self {
        self.end_date = Some(date.into());
        self
    }
}

/// Query for `GET /api/kiro/consumption/stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsQuery {
    #[serde(skip_serializing_if = "is_blank")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "is_blank")]
    pub end_date: Option<String>,
}

impl StatsQuery {
    pub fn start_date(mut self, date: impl Into<String>) -> Self {
        self.start_date = Some(date.into());
        self
    }

    pub fn end_date(mut self, date: impl Into<String>) -> Self {
        self.end_date = Some(date.into());
        self
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(str::is_empty)
}
