//! # Kiro Client
//!
//! A typed Rust client for the plugin API gateway that hosts the Kiro
//! account-management and chat-completion endpoints.
//!
//! The client holds no credentials: every call receives the bearer token it
//! authenticates with, so one client can be shared by all users.

use std::time::Duration;

use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use kiro_types::{JsonObject, ProxyError};
use reqwest::{Client, Method, RequestBuilder};
use serde::Serialize;
use url::Url;

/// Ceiling for a single upstream call, and read-inactivity limit for streams.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Raw upstream body chunks, in arrival order.
///
/// The stream owns the upstream connection; dropping it closes the connection.
pub type ByteStream = BoxStream<'static, Result<Bytes, ClientError>>;

/// Error type for client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {status} - {body}")]
    Api { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Expected a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("Upstream timed out after {0:?}")]
    Timeout(Duration),
}

impl From<ClientError> for ProxyError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Api { status, body } => ProxyError::Upstream { status, body },
            ClientError::Http(e) => ProxyError::Transport(e.to_string()),
            ClientError::Timeout(_) => ProxyError::Transport(err.to_string()),
            ClientError::Json(e) => ProxyError::InvalidResponse(e.to_string()),
            ClientError::NotAnObject(_) => ProxyError::InvalidResponse(err.to_string()),
        }
    }
}

/// Plugin API gateway client.
#[derive(Clone)]
pub struct UpstreamClient {
    base_url: String,
    timeout: Duration,
    http: Client,
}

impl UpstreamClient {
    /// Creates a new client.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: DEFAULT_TIMEOUT,
            http: Client::new(),
        }
    }

    /// Overrides the upstream timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sends one request and decodes the response body as a JSON object.
    ///
    /// A successful response with an empty body yields an empty object.
    pub async fn send_json<B, Q>(
        &self,
        token: &str,
        method: Method,
        path: &str,
        body: Option<&B>,
        query: Option<&Q>,
    ) -> Result<JsonObject, ClientError>
    where
        B: Serialize + ?Sized,
        Q: Serialize + ?Sized,
    {
        let mut req = self.request(token, method, path, body).timeout(self.timeout);
        if let Some(query) = query {
            req = req.query(query);
        }
        let resp = req.send().await?;
        self.handle_response(resp).await
    }

    /// Opens one streaming request.
    ///
    /// Fails before yielding anything when the upstream answers with a
    /// non-success status. Once streaming, each chunk must arrive within the
    /// client timeout.
    pub async fn send_stream<B>(
        &self,
        token: &str,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<ByteStream, ClientError>
    where
        B: Serialize + ?Sized,
    {
        let req = self.request(token, method, path, body);
        let resp = tokio::time::timeout(self.timeout, req.send())
            .await
            .map_err(|_| ClientError::Timeout(self.timeout))??;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await?;
            return Err(ClientError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(with_idle_timeout(resp.bytes_stream(), self.timeout))
    }

    fn request<B>(&self, token: &str, method: Method, path: &str, body: Option<&B>) -> RequestBuilder
    where
        B: Serialize + ?Sized,
    {
        let mut req = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(token);
        if let Some(body) = body {
            req = req.json(body);
        }
        req
    }

    async fn handle_response(&self, resp: reqwest::Response) -> Result<JsonObject, ClientError> {
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "upstream rejected request");
            return Err(ClientError::Api {
                status: status.as_u16(),
                body,
            });
        }

        if body.trim().is_empty() {
            return Ok(JsonObject::new());
        }
        match serde_json::from_str(&body)? {
            serde_json::Value::Object(map) => Ok(map),
            serde_json::Value::Array(_) => Err(ClientError::NotAnObject("array")),
            serde_json::Value::String(_) => Err(ClientError::NotAnObject("string")),
            serde_json::Value::Number(_) => Err(ClientError::NotAnObject("number")),
            serde_json::Value::Bool(_) => Err(ClientError::NotAnObject("bool")),
            serde_json::Value::Null => Err(ClientError::NotAnObject("null")),
        }
    }
}

/// Builds an absolute upstream path from raw segments, percent-encoding each.
///
/// `.` and `..` segments are dropped by URL normalization; callers passing
/// untrusted identifiers must reject them first.
pub fn upstream_path(segments: &[&str]) -> String {
    let mut url = Url::parse("http://upstream.invalid/").expect("static URL is valid");
    url.path_segments_mut()
        .expect("http URLs can be a base")
        .pop_if_empty()
        .extend(segments);
    url.path().to_string()
}

/// Ends the stream with [`ClientError::Timeout`] when no chunk arrives within `idle`.
fn with_idle_timeout<S>(inner: S, idle: Duration) -> ByteStream
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    futures::stream::unfold(Some(Box::pin(inner)), move |state| async move {
        let mut inner = state?;
        match tokio::time::timeout(idle, inner.next()).await {
            Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(inner))),
            Ok(Some(Err(e))) => Some((Err(ClientError::Http(e)), None)),
            Ok(None) => None,
            Err(_) => Some((Err(ClientError::Timeout(idle)), None)),
        }
    })
    .boxed()
}
