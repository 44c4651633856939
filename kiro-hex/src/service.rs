//! Kiro Proxy Service
//!
//! Resolves the caller's plugin API key through the credential ports, then
//! relays one call to the upstream gateway. Contains NO account logic - the
//! upstream owns all account state.

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use reqwest::Method;
use serde::Serialize;

use kiro_client::{UpstreamClient, upstream_path};
use kiro_types::{
    BearerToken, ConsumptionQuery, CredentialCipher, CredentialStore, JsonObject,
    OAuthAuthorizeRequest, ProxyError, SUPPORTED_MODELS, StatsQuery, UpdateNameRequest,
    UpdateStatusRequest, UserId,
};

/// Upstream body chunks relayed to the caller as they arrive.
///
/// Dropping the stream closes the upstream connection.
pub type ChunkStream = BoxStream<'static, Result<Bytes, ProxyError>>;

/// Application service for Kiro account management and chat completions.
///
/// Generic over the credential ports so stores and ciphers can be swapped
/// without touching the relay.
pub struct KiroService<S: CredentialStore, C: CredentialCipher> {
    store: S,
    cipher: C,
    upstream: UpstreamClient,
}

impl<S: CredentialStore, C: CredentialCipher> KiroService<S, C> {
    /// Creates a new service.
    pub fn new(store: S, cipher: C, upstream: UpstreamClient) -> Self {
        Self {
            store,
            cipher,
            upstream,
        }
    }

    /// Returns a reference to the underlying credential store.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn upstream(&self) -> &UpstreamClient {
        &self.upstream
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Relay primitives
    // ─────────────────────────────────────────────────────────────────────────────

    /// Looks up and decrypts the plugin API key of `user_id`.
    ///
    /// A missing record and an inactive record both yield `NotConfigured`.
    #[tracing::instrument(skip_all, fields(user_id = %user_id))]
    pub async fn resolve_token(&self, user_id: UserId) -> Result<BearerToken, ProxyError> {
        let record = self
            .store
            .get_by_user(user_id)
            .await
            .inspect_err(|e| tracing::error!("Credential lookup failed: {}", e))?;

        match record {
            Some(record) if record.is_active => Ok(self
                .cipher
                .decrypt(&record.encrypted_token)
                .inspect_err(|e| tracing::error!("Credential decryption failed: {}", e))?),
            _ => {
                tracing::debug!("No active plugin API key");
                Err(ProxyError::NotConfigured)
            }
        }
    }

    /// Sends one request to `base_url + path` on behalf of `user_id`.
    #[tracing::instrument(skip_all, fields(user_id = %user_id, method = %method, path = %path))]
    pub async fn proxy_request<B, Q>(
        &self,
        user_id: UserId,
        method: Method,
        path: &str,
        body: Option<&B>,
        query: Option<&Q>,
    ) -> Result<JsonObject, ProxyError>
    where
        B: Serialize + ?Sized,
        Q: Serialize + ?Sized,
    {
        let token = self.resolve_token(user_id).await?;

        let resp = self
            .upstream
            .send_json(token.expose(), method, path, body, query)
            .await
            .map_err(ProxyError::from)
            .inspect_err(|e| tracing::warn!("Upstream call failed: {}", e))?;

        tracing::debug!("Upstream call succeeded");
        Ok(resp)
    }

    /// Opens one streaming request to `base_url + path` on behalf of `user_id`.
    ///
    /// Errors on the initial status are returned before any chunk; later
    /// transport failures end the stream with a `Transport` item.
    #[tracing::instrument(skip_all, fields(user_id = %user_id, method = %method, path = %path))]
    pub async fn proxy_stream_request<B>(
        &self,
        user_id: UserId,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<ChunkStream, ProxyError>
    where
        B: Serialize + ?Sized,
    {
        let token = self.resolve_token(user_id).await?;

        let stream = self
            .upstream
            .send_stream(token.expose(), method, path, body)
            .await
            .map_err(ProxyError::from)
            .inspect_err(|e| tracing::warn!("Upstream stream failed to open: {}", e))?;

        tracing::debug!("Upstream stream opened");
        Ok(stream.map_err(ProxyError::from).boxed())
    }

    async fn get(&self, user_id: UserId, path: &str) -> Result<JsonObject, ProxyError> {
        self.proxy_request::<(), ()>(user_id, Method::GET, path, None, None)
            .await
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        user_id: UserId,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<JsonObject, ProxyError> {
        self.proxy_request::<B, ()>(user_id, method, path, Some(body), None)
            .await
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // OAuth
    // ─────────────────────────────────────────────────────────────────────────────

    /// Starts a Kiro OAuth authorization and returns the upstream's answer
    /// (authorization URL and polling state).
    pub async fn get_oauth_authorize_url(
        &self,
        user_id: UserId,
        provider: &str,
        is_shared: i32,
    ) -> Result<JsonObject, ProxyError> {
        let body = OAuthAuthorizeRequest {
            provider: provider.to_string(),
            is_shared,
        };
        self.send(
            user_id,
            Method::POST,
            &upstream_path(&["api", "kiro", "oauth", "authorize"]),
            &body,
        )
        .await
    }

    /// Polls the status of an OAuth authorization.
    pub async fn get_oauth_status(
        &self,
        user_id: UserId,
        state: &str,
    ) -> Result<JsonObject, ProxyError> {
        let state = path_segment("state", state)?;
        self.get(
            user_id,
            &upstream_path(&["api", "kiro", "oauth", "status", state]),
        )
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Accounts
    // ─────────────────────────────────────────────────────────────────────────────

    pub async fn create_account(
        &self,
        user_id: UserId,
        account_data: &JsonObject,
    ) -> Result<JsonObject, ProxyError> {
        self.send(
            user_id,
            Method::POST,
            &upstream_path(&["api", "kiro", "accounts"]),
            account_data,
        )
        .await
    }

    pub async fn get_accounts(&self, user_id: UserId) -> Result<JsonObject, ProxyError> {
        self.get(user_id, &upstream_path(&["api", "kiro", "accounts"]))
            .await
    }

    pub async fn get_account(
        &self,
        user_id: UserId,
        account_id: &str,
    ) -> Result<JsonObject, ProxyError> {
        self.get(user_id, &account_path(account_id, None)?).await
    }

    pub async fn update_account_status(
        &self,
        user_id: UserId,
        account_id: &str,
        status: i32,
    ) -> Result<JsonObject, ProxyError> {
        self.send(
            user_id,
            Method::PUT,
            &account_path(account_id, Some("status"))?,
            &UpdateStatusRequest { status },
        )
        .await
    }

    pub async fn update_account_name(
        &self,
        user_id: UserId,
        account_id: &str,
        account_name: &str,
    ) -> Result<JsonObject, ProxyError> {
        let body = UpdateNameRequest {
            account_name: account_name.to_string(),
        };
        self.send(
            user_id,
            Method::PUT,
            &account_path(account_id, Some("name"))?,
            &body,
        )
        .await
    }

    pub async fn get_account_balance(
        &self,
        user_id: UserId,
        account_id: &str,
    ) -> Result<JsonObject, ProxyError> {
        self.get(user_id, &account_path(account_id, Some("balance"))?)
            .await
    }

    /// Lists consumption records of one account. Unset filters are not sent.
    pub async fn get_account_consumption(
        &self,
        user_id: UserId,
        account_id: &str,
        query: &ConsumptionQuery,
    ) -> Result<JsonObject, ProxyError> {
        self.proxy_request::<(), _>(
            user_id,
            Method::GET,
            &account_path(account_id, Some("consumption"))?,
            None,
            Some(query),
        )
        .await
    }

    /// Aggregated consumption over all accounts of the user.
    pub async fn get_user_consumption_stats(
        &self,
        user_id: UserId,
        query: &StatsQuery,
    ) -> Result<JsonObject, ProxyError> {
        self.proxy_request::<(), _>(
            user_id,
            Method::GET,
            &upstream_path(&["api", "kiro", "consumption", "stats"]),
            None,
            Some(query),
        )
        .await
    }

    pub async fn delete_account(
        &self,
        user_id: UserId,
        account_id: &str,
    ) -> Result<JsonObject, ProxyError> {
        self.proxy_request::<(), ()>(
            user_id,
            Method::DELETE,
            &account_path(account_id, None)?,
            None,
            None,
        )
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // OpenAI-compatible chat API
    // ─────────────────────────────────────────────────────────────────────────────

    /// Model list as the upstream reports it.
    pub async fn get_models(&self, user_id: UserId) -> Result<JsonObject, ProxyError> {
        self.get(user_id, &upstream_path(&["v1", "kiro", "models"]))
            .await
    }

    /// Client-side copy of the model catalogue.
    pub fn supported_models(&self) -> &'static [&'static str] {
        &SUPPORTED_MODELS
    }

    pub async fn chat_completions(
        &self,
        user_id: UserId,
        request: &JsonObject,
    ) -> Result<JsonObject, ProxyError> {
        self.send(
            user_id,
            Method::POST,
            &upstream_path(&["v1", "kiro", "chat", "completions"]),
            request,
        )
        .await
    }

    /// Streaming chat completion; chunks are the upstream's raw bytes.
    pub async fn chat_completions_stream(
        &self,
        user_id: UserId,
        request: &JsonObject,
    ) -> Result<ChunkStream, ProxyError> {
        self.proxy_stream_request(
            user_id,
            Method::POST,
            &upstream_path(&["v1", "kiro", "chat", "completions"]),
            Some(request),
        )
        .await
    }
}

fn account_path(account_id: &str, suffix: Option<&str>) -> Result<String, ProxyError> {
    let account_id = path_segment("account_id", account_id)?;
    Ok(match suffix {
        Some(suffix) => upstream_path(&["api", "kiro", "accounts", account_id, suffix]),
        None => upstream_path(&["api", "kiro", "accounts", account_id]),
    })
}

/// Rejects identifiers that URL normalization would not keep as one segment.
///
/// Empty, `.` and `..` segments collapse into the parent path, which would
/// address a different upstream endpoint.
fn path_segment<'a>(name: &str, value: &'a str) -> Result<&'a str, ProxyError> {
    match value {
        "" | "." | ".." => Err(ProxyError::InvalidInput(format!(
            "{} must be a single non-empty path segment, got {:?}",
            name, value
        ))),
        _ => Ok(value),
    }
}
