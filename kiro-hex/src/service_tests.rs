//! KiroService unit tests.

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::{
        Json, Router,
        body::{Body, Bytes},
        extract::{Request, State},
        http::{StatusCode, header},
        response::{IntoResponse, Response},
    };
    use futures::StreamExt;
    use reqwest::Method;
    use serde_json::{Value, json};
    use tokio::sync::{Barrier, oneshot};

    use kiro_client::UpstreamClient;
    use kiro_types::{
        BearerToken, CipherError, ConsumptionQuery, CredentialCipher, CredentialRecord,
        CredentialStore, JsonObject, ProxyError, StatsQuery, StoreError, UserId,
    };

    use crate::KiroService;

    // ─────────────────────────────────────────────────────────────────────────────
    // Credential mocks
    // ─────────────────────────────────────────────────────────────────────────────

    /// Simple in-memory credential store for testing the service layer.
    #[derive(Default)]
    pub struct MockStore {
        records: Mutex<HashMap<UserId, CredentialRecord>>,
        lookups: AtomicUsize,
        broken: bool,
    }

    impl MockStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn broken() -> Self {
            Self {
                broken: true,
                ..Self::default()
            }
        }

        /// Stores `token` for `user`, encrypted the way [`PrefixCipher`] expects.
        pub fn with_token(self, user: i64, token: &str) -> Self {
            self.insert(CredentialRecord::new(UserId::new(user), format!("enc:{token}")));
            self
        }

        pub fn with_inactive_token(self, user: i64, token: &str) -> Self {
            self.insert(CredentialRecord::new(UserId::new(user), format!("enc:{token}")).deactivated());
            self
        }

        pub fn with_raw_blob(self, user: i64, blob: &str) -> Self {
            self.insert(CredentialRecord::new(UserId::new(user), blob.to_string()));
            self
        }

        fn insert(&self, record: CredentialRecord) {
            self.records.lock().unwrap().insert(record.user_id, record);
        }
    }

    #[async_trait]
    impl CredentialStore for MockStore {
        async fn get_by_user(&self, user_id: UserId) -> Result<Option<CredentialRecord>, StoreError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.broken {
                return Err(StoreError::Database("connection refused".into()));
            }
            Ok(self.records.lock().unwrap().get(&user_id).cloned())
        }
    }

    /// Cipher that strips an `enc:` prefix.
    pub struct PrefixCipher;

    impl CredentialCipher for PrefixCipher {
        fn decrypt(&self, encrypted_token: &str) -> Result<BearerToken, CipherError> {
            encrypted_token
                .strip_prefix("enc:")
                .map(BearerToken::new)
                .ok_or(CipherError::DecryptionFailed)
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Fake upstream gateway
    // ─────────────────────────────────────────────────────────────────────────────

    #[derive(Default)]
    pub struct Gateway {
        pub hits: AtomicUsize,
        pub bodies: Mutex<Vec<Bytes>>,
        barrier: Option<Arc<Barrier>>,
        released: Mutex<Option<oneshot::Sender<()>>>,
    }

    /// Fires when the gateway's response body is dropped.
    struct ReleaseSignal(Option<oneshot::Sender<()>>);

    impl Drop for ReleaseSignal {
        fn drop(&mut self) {
            if let Some(tx) = self.0.take() {
                let _ = tx.send(());
            }
        }
    }

    async fn gateway(State(gw): State<Arc<Gateway>>, req: Request) -> Response {
        gw.hits.fetch_add(1, Ordering::SeqCst);
        let (parts, body) = req.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        gw.bodies.lock().unwrap().push(body.clone());

        let path = parts.uri.path().to_string();
        let authorization = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let json_body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);

        match (parts.method.as_str(), path.as_str()) {
            ("GET", "/api/kiro/accounts/missing") => (
                StatusCode::NOT_FOUND,
                [(header::CONTENT_TYPE, "application/json")],
                r#"{"error":"not found"}"#,
            )
                .into_response(),
            ("GET", "/api/kiro/accounts") if gw.barrier.is_some() => {
                if let Some(barrier) = &gw.barrier {
                    barrier.wait().await;
                }
                Json(json!({ "authorization": authorization })).into_response()
            }
            ("POST", "/v1/kiro/chat/completions") if json_body["stream"] == json!(true) => {
                if json_body["model"] == json!("broken") {
                    let chunks = futures::stream::iter([
                        Ok(Bytes::from_static(b"a")),
                        Err(std::io::Error::other("upstream reset")),
                    ]);
                    return Body::from_stream(chunks).into_response();
                }
                let chunks = futures::stream::iter(["a", "b", "c"]).then(|c| async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok::<_, std::io::Error>(Bytes::from_static(c.as_bytes()))
                });
                (
                    [(header::CONTENT_TYPE, "text/event-stream")],
                    Body::from_stream(chunks),
                )
                    .into_response()
            }
            ("POST", "/v1/kiro/chat/completions") if json_body["model"] == json!("overloaded") => (
                StatusCode::SERVICE_UNAVAILABLE,
                r#"{"error":"overloaded"}"#,
            )
                .into_response(),
            ("POST", "/v1/kiro/chat/completions") => Json(json!({
                "id": "chatcmpl-1",
                "object": "chat.completion",
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "hello"}}],
                "usage": {"prompt_tokens": 3, "completion_tokens": 1}
            }))
            .into_response(),
            ("GET", "/endless") => {
                let signal = ReleaseSignal(gw.released.lock().unwrap().take());
                let chunks = futures::stream::unfold(signal, |signal| async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Some((Ok::<_, std::io::Error>(Bytes::from_static(b"tick")), signal))
                });
                Body::from_stream(chunks).into_response()
            }
            _ => Json(json!({
                "method": parts.method.as_str(),
                "path": path,
                "query": parts.uri.query(),
                "authorization": authorization,
                "body": json_body,
            }))
            .into_response(),
        }
    }

    async fn start_gateway(gw: Gateway) -> (Arc<Gateway>, String) {
        let gw = Arc::new(gw);
        let app = Router::new().fallback(gateway).with_state(gw.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (gw, format!("http://{}", addr))
    }

    async fn setup(store: MockStore) -> (KiroService<MockStore, PrefixCipher>, Arc<Gateway>) {
        let (gw, base) = start_gateway(Gateway::default()).await;
        (
            KiroService::new(store, PrefixCipher, UpstreamClient::new(base)),
            gw,
        )
    }

    fn object(value: Value) -> JsonObject {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    /// Calls every public operation once for `user`.
    async fn every_operation(
        service: &KiroService<MockStore, PrefixCipher>,
        user: UserId,
    ) -> Vec<(&'static str, Result<(), ProxyError>)> {
        let body = object(json!({"model": "claude-sonnet-4-5"}));
        vec![
            ("oauth_authorize", service.get_oauth_authorize_url(user, "Google", 0).await.map(drop)),
            ("oauth_status", service.get_oauth_status(user, "st-1").await.map(drop)),
            ("create_account", service.create_account(user, &body).await.map(drop)),
            ("list_accounts", service.get_accounts(user).await.map(drop)),
            ("get_account", service.get_account(user, "acc-1").await.map(drop)),
            ("set_status", service.update_account_status(user, "acc-1", 1).await.map(drop)),
            ("rename", service.update_account_name(user, "acc-1", "main").await.map(drop)),
            ("balance", service.get_account_balance(user, "acc-1").await.map(drop)),
            (
                "consumption",
                service
                    .get_account_consumption(user, "acc-1", &ConsumptionQuery::default())
                    .await
                    .map(drop),
            ),
            (
                "stats",
                service
                    .get_user_consumption_stats(user, &StatsQuery::default())
                    .await
                    .map(drop),
            ),
            ("delete", service.delete_account(user, "acc-1").await.map(drop)),
            ("models", service.get_models(user).await.map(drop)),
            ("chat", service.chat_completions(user, &body).await.map(drop)),
            ("chat_stream", service.chat_completions_stream(user, &body).await.map(drop)),
        ]
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Token resolution
    // ─────────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_resolve_token_success() {
        let (service, _gw) = setup(MockStore::new().with_token(1, "sk-one")).await;

        let token = service.resolve_token(UserId::new(1)).await.unwrap();

        assert_eq!(token.expose(), "sk-one");
    }

    #[tokio::test]
    async fn test_resolve_token_is_not_cached() {
        let (service, _gw) = setup(MockStore::new().with_token(1, "sk-one")).await;

        service.resolve_token(UserId::new(1)).await.unwrap();
        service.resolve_token(UserId::new(1)).await.unwrap();

        assert_eq!(service.store().lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_every_operation_fails_without_credential() {
        let (service, gw) = setup(MockStore::new()).await;

        for (name, result) in every_operation(&service, UserId::new(404)).await {
            assert!(
                matches!(result, Err(ProxyError::NotConfigured)),
                "{name} should fail with NotConfigured"
            );
        }
        assert_eq!(gw.hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_every_operation_fails_with_inactive_credential() {
        let (service, gw) = setup(MockStore::new().with_inactive_token(2, "sk-old")).await;

        for (name, result) in every_operation(&service, UserId::new(2)).await {
            assert!(
                matches!(result, Err(ProxyError::NotConfigured)),
                "{name} should fail with NotConfigured"
            );
        }
        assert_eq!(gw.hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_every_operation_reaches_upstream_with_credential() {
        let (service, gw) = setup(MockStore::new().with_token(1, "sk-one")).await;

        let results = every_operation(&service, UserId::new(1)).await;

        for (name, result) in &results {
            assert!(result.is_ok(), "{name} failed: {result:?}");
        }
        assert_eq!(gw.hits.load(Ordering::SeqCst), results.len());
    }

    #[tokio::test]
    async fn test_store_failure_surfaces() {
        let (service, gw) = setup(MockStore::broken()).await;

        let result = service.get_accounts(UserId::new(1)).await;

        assert!(matches!(result, Err(ProxyError::Store(_))));
        assert_eq!(gw.hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_undecryptable_credential_surfaces() {
        let (service, gw) = setup(MockStore::new().with_raw_blob(1, "garbage")).await;

        let result = service.get_accounts(UserId::new(1)).await;

        assert!(matches!(
            result,
            Err(ProxyError::Cipher(CipherError::DecryptionFailed))
        ));
        assert_eq!(gw.hits.load(Ordering::SeqCst), 0);
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Operation catalogue
    // ─────────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_catalogue_verbs_paths_and_bodies() {
        let (service, _gw) = setup(MockStore::new().with_token(1, "sk-one")).await;
        let user = UserId::new(1);

        let resp = service.get_oauth_authorize_url(user, "Github", 1).await.unwrap();
        assert_eq!(resp["method"], "POST");
        assert_eq!(resp["path"], "/api/kiro/oauth/authorize");
        assert_eq!(resp["body"], json!({"provider": "Github", "is_shared": 1}));
        assert_eq!(resp["authorization"], "Bearer sk-one");

        let resp = service.get_oauth_status(user, "abc").await.unwrap();
        assert_eq!(resp["method"], "GET");
        assert_eq!(resp["path"], "/api/kiro/oauth/status/abc");

        let data = object(json!({"refresh_token": "rt", "account_name": "main"}));
        let resp = service.create_account(user, &data).await.unwrap();
        assert_eq!(resp["method"], "POST");
        assert_eq!(resp["path"], "/api/kiro/accounts");
        assert_eq!(resp["body"], Value::Object(data));

        let resp = service.get_accounts(user).await.unwrap();
        assert_eq!((resp["method"].as_str(), resp["path"].as_str()), (Some("GET"), Some("/api/kiro/accounts")));
        assert_eq!(resp["body"], Value::Null);

        let resp = service.get_account(user, "acc-9").await.unwrap();
        assert_eq!(resp["path"], "/api/kiro/accounts/acc-9");

        let resp = service.update_account_status(user, "acc-9", 0).await.unwrap();
        assert_eq!(resp["method"], "PUT");
        assert_eq!(resp["path"], "/api/kiro/accounts/acc-9/status");
        assert_eq!(resp["body"], json!({"status": 0}));

        let resp = service.update_account_name(user, "acc-9", "backup").await.unwrap();
        assert_eq!(resp["method"], "PUT");
        assert_eq!(resp["path"], "/api/kiro/accounts/acc-9/name");
        assert_eq!(resp["body"], json!({"account_name": "backup"}));

        let resp = service.get_account_balance(user, "acc-9").await.unwrap();
        assert_eq!(resp["path"], "/api/kiro/accounts/acc-9/balance");

        let resp = service.delete_account(user, "acc-9").await.unwrap();
        assert_eq!(resp["method"], "DELETE");
        assert_eq!(resp["path"], "/api/kiro/accounts/acc-9");

        let resp = service.get_models(user).await.unwrap();
        assert_eq!(resp["path"], "/v1/kiro/models");
    }

    #[tokio::test]
    async fn test_account_id_is_encoded_as_one_segment() {
        let (service, _gw) = setup(MockStore::new().with_token(1, "sk-one")).await;

        let resp = service.get_account(UserId::new(1), "../admin").await.unwrap();

        assert_eq!(resp["path"], "/api/kiro/accounts/..%2Fadmin");
    }

    #[tokio::test]
    async fn test_dot_and_empty_ids_are_rejected_before_upstream() {
        let (service, gw) = setup(MockStore::new().with_token(1, "sk-one")).await;
        let user = UserId::new(1);
        let query = ConsumptionQuery::default();

        for id in ["..", ".", ""] {
            let results = vec![
                service.get_account(user, id).await.map(drop),
                service.update_account_status(user, id, 1).await.map(drop),
                service.update_account_name(user, id, "main").await.map(drop),
                service.get_account_balance(user, id).await.map(drop),
                service.get_account_consumption(user, id, &query).await.map(drop),
                service.delete_account(user, id).await.map(drop),
                service.get_oauth_status(user, id).await.map(drop),
            ];
            for result in results {
                assert!(
                    matches!(result, Err(ProxyError::InvalidInput(_))),
                    "id {id:?} gave {result:?}"
                );
            }
        }
        assert_eq!(gw.hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_consumption_query_only_sends_set_keys() {
        let (service, _gw) = setup(MockStore::new().with_token(1, "sk-one")).await;
        let user = UserId::new(1);

        let resp = service
            .get_account_consumption(user, "acc-1", &ConsumptionQuery::default().limit(10))
            .await
            .unwrap();
        assert_eq!(resp["path"], "/api/kiro/accounts/acc-1/consumption");
        assert_eq!(resp["query"], "limit=10");

        let resp = service
            .get_account_consumption(
                user,
                "acc-1",
                &ConsumptionQuery::default()
                    .limit(5)
                    .offset(10)
                    .start_date("2025-01-01")
                    .end_date("2025-01-31"),
            )
            .await
            .unwrap();
        assert_eq!(
            resp["query"],
            "limit=5&offset=10&start_date=2025-01-01&end_date=2025-01-31"
        );

        let resp = service
            .get_account_consumption(user, "acc-1", &ConsumptionQuery::default())
            .await
            .unwrap();
        assert!(resp["query"].is_null() || resp["query"] == "");
    }

    #[tokio::test]
    async fn test_stats_query_only_sends_set_keys() {
        let (service, _gw) = setup(MockStore::new().with_token(1, "sk-one")).await;

        let resp = service
            .get_user_consumption_stats(UserId::new(1), &StatsQuery::default().end_date("2025-02-01"))
            .await
            .unwrap();

        assert_eq!(resp["path"], "/api/kiro/consumption/stats");
        assert_eq!(resp["query"], "end_date=2025-02-01");
    }

    #[tokio::test]
    async fn test_get_account_not_found() {
        let (service, _gw) = setup(MockStore::new().with_token(1, "sk-one")).await;

        let err = service
            .get_account(UserId::new(1), "missing")
            .await
            .unwrap_err();

        match &err {
            ProxyError::Upstream { status, .. } => assert_eq!(*status, 404),
            other => panic!("expected Upstream, got {other:?}"),
        }
        assert_eq!(err.upstream_json(), Some(json!({"error": "not found"})));
    }

    #[tokio::test]
    async fn test_supported_models_is_static() {
        let (service, gw) = setup(MockStore::new()).await;

        assert_eq!(service.supported_models().len(), 5);
        assert!(service.supported_models().contains(&"claude-opus-4-5-20251101"));
        assert_eq!(gw.hits.load(Ordering::SeqCst), 0);
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Chat completions
    // ─────────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_chat_completion_round_trip() {
        let (service, gw) = setup(MockStore::new().with_token(1, "sk-one")).await;
        let request = object(json!({
            "model": "claude-sonnet-4-5",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 64,
            "metadata": {"trace": [1, 2, 3]}
        }));

        let resp = service.chat_completions(UserId::new(1), &request).await.unwrap();

        assert_eq!(
            gw.bodies.lock().unwrap()[0].as_ref(),
            serde_json::to_vec(&request).unwrap().as_slice()
        );
        assert_eq!(
            Value::Object(resp),
            json!({
                "id": "chatcmpl-1",
                "object": "chat.completion",
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "hello"}}],
                "usage": {"prompt_tokens": 3, "completion_tokens": 1}
            })
        );
    }

    #[tokio::test]
    async fn test_chat_completion_upstream_error() {
        let (service, _gw) = setup(MockStore::new().with_token(1, "sk-one")).await;

        let err = service
            .chat_completions(UserId::new(1), &object(json!({"model": "overloaded"})))
            .await
            .unwrap_err();

        assert!(matches!(err, ProxyError::Upstream { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_chat_stream_yields_exact_chunks() {
        let (service, _gw) = setup(MockStore::new().with_token(1, "sk-one")).await;
        let request = object(json!({"model": "claude-sonnet-4-5", "stream": true}));

        let stream = service
            .chat_completions_stream(UserId::new(1), &request)
            .await
            .unwrap();
        let chunks: Vec<Bytes> = stream.map(|c| c.unwrap()).collect().await;

        assert_eq!(
            chunks,
            vec![
                Bytes::from_static(b"a"),
                Bytes::from_static(b"b"),
                Bytes::from_static(b"c")
            ]
        );
    }

    #[tokio::test]
    async fn test_chat_stream_error_status_fails_before_data() {
        let (service, _gw) = setup(MockStore::new().with_token(1, "sk-one")).await;

        let result = service
            .chat_completions_stream(UserId::new(1), &object(json!({"model": "overloaded"})))
            .await;

        assert!(matches!(result, Err(ProxyError::Upstream { status: 503, .. })));
    }

    #[tokio::test]
    async fn test_chat_stream_mid_stream_failure_ends_with_error() {
        let (service, _gw) = setup(MockStore::new().with_token(1, "sk-one")).await;
        let request = object(json!({"model": "broken", "stream": true}));

        let mut stream = service
            .chat_completions_stream(UserId::new(1), &request)
            .await
            .unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"a"));
        assert!(matches!(stream.next().await, Some(Err(ProxyError::Transport(_)))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_stream_releases_upstream_connection() {
        let (tx, rx) = oneshot::channel();
        let gw = Gateway {
            released: Mutex::new(Some(tx)),
            ..Gateway::default()
        };
        let (_gw, base) = start_gateway(gw).await;
        let service = KiroService::new(
            MockStore::new().with_token(1, "sk-one"),
            PrefixCipher,
            UpstreamClient::new(base),
        );

        let mut stream = service
            .proxy_stream_request::<()>(UserId::new(1), Method::GET, "/endless", None)
            .await
            .unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"tick"));
        drop(stream);

        tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .expect("upstream body was not released")
            .unwrap();
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Concurrency
    // ─────────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_concurrent_users_use_their_own_tokens() {
        let gw = Gateway {
            barrier: Some(Arc::new(Barrier::new(2))),
            ..Gateway::default()
        };
        let (_gw, base) = start_gateway(gw).await;
        let service = KiroService::new(
            MockStore::new().with_token(1, "sk-alice").with_token(2, "sk-bob"),
            PrefixCipher,
            UpstreamClient::new(base),
        );

        // The gateway only answers once both requests are in flight.
        let (alice, bob) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(
                service.get_accounts(UserId::new(1)),
                service.get_accounts(UserId::new(2))
            )
        })
        .await
        .expect("calls serialized on each other");

        assert_eq!(alice.unwrap()["authorization"], "Bearer sk-alice");
        assert_eq!(bob.unwrap()["authorization"], "Bearer sk-bob");
    }
}
