//! Caller identification.
//!
//! The trusted front-end authenticates the user and forwards their id in
//! the `X-User-Id` header. Requests without a usable id are rejected here.

use axum::{
    Json,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};

use kiro_types::UserId;

/// Header carrying the authenticated user's id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The user a request acts on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerId(pub UserId);

/// Parses the header value into a user id.
/// Expected format: a decimal integer, surrounding whitespace allowed.
fn parse_user_id(header: Option<&str>) -> Option<UserId> {
    header?.parse().ok()
}

impl<S: Send + Sync> FromRequestParts<S> for CallerId {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok());

        match parse_user_id(header) {
            Some(user_id) => Ok(CallerId(user_id)),
            None => {
                tracing::debug!("Rejected request without a valid {} header", USER_ID_HEADER);
                Err(unauthorized_response("Missing or invalid X-User-Id header"))
            }
        }
    }
}

fn unauthorized_response(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "error": message,
            "code": 401
        })),
    )
        .into_response()
}
