//! HTTP request handlers.

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;

use kiro_types::{
    ConsumptionQuery, CredentialCipher, CredentialStore, JsonObject, OAuthAuthorizeRequest,
    ProxyError, StatsQuery, UpdateNameRequest, UpdateStatusRequest,
};

use super::identity::CallerId;
use crate::KiroService;

/// Application state shared across handlers.
pub struct AppState<S: CredentialStore, C: CredentialCipher> {
    pub service: KiroService<S, C>,
}

/// Wrapper to implement IntoResponse for ProxyError (orphan rule workaround).
pub struct ApiError(pub ProxyError);

impl From<ProxyError> for ApiError {
    fn from(err: ProxyError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ProxyError::NotConfigured | ProxyError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ProxyError::Upstream { status, body } => {
                // Upstream errors keep their status; JSON bodies pass through untouched.
                let status = StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY);
                return match self.0.upstream_json() {
                    Some(json) => (status, Json(json)).into_response(),
                    None => (status, Json(serde_json::json!({ "error": body }))).into_response(),
                };
            }
            ProxyError::Transport(_) => StatusCode::BAD_GATEWAY,
            ProxyError::InvalidResponse(_) | ProxyError::Store(_) | ProxyError::Cipher(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = serde_json::json!({
            "error": self.0.to_string(),
            "code": status.as_u16()
        });

        (status, Json(body)).into_response()
    }
}

type ApiResult = Result<Json<JsonObject>, ApiError>;

/// Health check endpoint.
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}

// ─────────────────────────────────────────────────────────────────────────────
// OAuth
// ─────────────────────────────────────────────────────────────────────────────

#[tracing::instrument(skip(state), fields(user_id = %user.0))]
pub async fn oauth_authorize<S: CredentialStore, C: CredentialCipher>(
    State(state): State<Arc<AppState<S, C>>>,
    user: CallerId,
    Json(req): Json<OAuthAuthorizeRequest>,
) -> ApiResult {
    let resp = state
        .service
        .get_oauth_authorize_url(user.0, &req.provider, req.is_shared)
        .await?;
    Ok(Json(resp))
}

#[tracing::instrument(skip(state), fields(user_id = %user.0))]
pub async fn oauth_status<S: CredentialStore, C: CredentialCipher>(
    State(state): State<Arc<AppState<S, C>>>,
    user: CallerId,
    Path(oauth_state): Path<String>,
) -> ApiResult {
    Ok(Json(state.service.get_oauth_status(user.0, &oauth_state).await?))
}

// ─────────────────────────────────────────────────────────────────────────────
// Accounts
// ─────────────────────────────────────────────────────────────────────────────

/// Create an account from an opaque account payload.
#[tracing::instrument(skip(state, account_data), fields(user_id = %user.0))]
pub async fn create_account<S: CredentialStore, C: CredentialCipher>(
    State(state): State<Arc<AppState<S, C>>>,
    user: CallerId,
    Json(account_data): Json<JsonObject>,
) -> ApiResult {
    Ok(Json(state.service.create_account(user.0, &account_data).await?))
}

#[tracing::instrument(skip(state), fields(user_id = %user.0))]
pub async fn list_accounts<S: CredentialStore, C: CredentialCipher>(
    State(state): State<Arc<AppState<S, C>>>,
    user: CallerId,
) -> ApiResult {
    Ok(Json(state.service.get_accounts(user.0).await?))
}

#[tracing::instrument(skip(state), fields(user_id = %user.0))]
pub async fn get_account<S: CredentialStore, C: CredentialCipher>(
    State(state): State<Arc<AppState<S, C>>>,
    user: CallerId,
    Path(account_id): Path<String>,
) -> ApiResult {
    Ok(Json(state.service.get_account(user.0, &account_id).await?))
}

#[tracing::instrument(skip(state), fields(user_id = %user.0))]
pub async fn update_account_status<S: CredentialStore, C: CredentialCipher>(
    State(state): State<Arc<AppState<S, C>>>,
    user: CallerId,
    Path(account_id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> ApiResult {
    let resp = state
        .service
        .update_account_status(user.0, &account_id, req.status)
        .await?;
    Ok(Json(resp))
}

#[tracing::instrument(skip(state), fields(user_id = %user.0))]
pub async fn update_account_name<S: CredentialStore, C: CredentialCipher>(
    State(state): State<Arc<AppState<S, C>>>,
    user: CallerId,
    Path(account_id): Path<String>,
    Json(req): Json<UpdateNameRequest>,
) -> ApiResult {
    let resp = state
        .service
        .update_account_name(user.0, &account_id, &req.account_name)
        .await?;
    Ok(Json(resp))
}

#[tracing::instrument(skip(state), fields(user_id = %user.0))]
pub async fn account_balance<S: CredentialStore, C: CredentialCipher>(
    State(state): State<Arc<AppState<S, C>>>,
    user: CallerId,
    Path(account_id): Path<String>,
) -> ApiResult {
    Ok(Json(state.service.get_account_balance(user.0, &account_id).await?))
}

#[tracing::instrument(skip(state), fields(user_id = %user.0))]
pub async fn account_consumption<S: CredentialStore, C: CredentialCipher>(
    State(state): State<Arc<AppState<S, C>>>,
    user: CallerId,
    Path(account_id): Path<String>,
    Query(query): Query<ConsumptionQuery>,
) -> ApiResult {
    let resp = state
        .service
        .get_account_consumption(user.0, &account_id, &query)
        .await?;
    Ok(Json(resp))
}

#[tracing::instrument(skip(state), fields(user_id = %user.0))]
pub async fn consumption_stats<S: CredentialStore, C: CredentialCipher>(
    State(state): State<Arc<AppState<S, C>>>,
    user: CallerId,
    Query(query): Query<StatsQuery>,
) -> ApiResult {
    Ok(Json(
        state.service.get_user_consumption_stats(user.0, &query).await?,
    ))
}

#[tracing::instrument(skip(state), fields(user_id = %user.0))]
pub async fn delete_account<S: CredentialStore, C: CredentialCipher>(
    State(state): State<Arc<AppState<S, C>>>,
    user: CallerId,
    Path(account_id): Path<String>,
) -> ApiResult {
    Ok(Json(state.service.delete_account(user.0, &account_id).await?))
}

// ─────────────────────────────────────────────────────────────────────────────
// Chat API
// ─────────────────────────────────────────────────────────────────────────────

#[tracing::instrument(skip(state), fields(user_id = %user.0))]
pub async fn list_models<S: CredentialStore, C: CredentialCipher>(
    State(state): State<Arc<AppState<S, C>>>,
    user: CallerId,
) -> ApiResult {
    Ok(Json(state.service.get_models(user.0).await?))
}

/// Local model catalogue; needs no credential.
pub async fn supported_models<S: CredentialStore, C: CredentialCipher>(
    State(state): State<Arc<AppState<S, C>>>,
) -> impl IntoResponse {
    Json(serde_json::json!({ "models": state.service.supported_models() }))
}

/// Chat completion. A body with `"stream": true` is answered with the raw
/// upstream event stream.
#[tracing::instrument(skip(state, request), fields(user_id = %user.0))]
pub async fn chat_completions<S: CredentialStore, C: CredentialCipher>(
    State(state): State<Arc<AppState<S, C>>>,
    user: CallerId,
    Json(request): Json<JsonObject>,
) -> Result<Response, ApiError> {
    let streaming = request
        .get("stream")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);

    if !streaming {
        let resp = state.service.chat_completions(user.0, &request).await?;
        return Ok(Json(resp).into_response());
    }

    let chunks = state
        .service
        .chat_completions_stream(user.0, &request)
        .await?
        .inspect_err(|e| tracing::warn!("Chat stream aborted: {}", e));

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(chunks),
    )
        .into_response())
}
