//! HTTP Server configuration and startup.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::trace::TraceLayer;

use kiro_types::{CredentialCipher, CredentialStore};

use super::handlers::{self, AppState};
use crate::KiroService;

/// HTTP Server for the Kiro proxy API.
pub struct HttpServer<S: CredentialStore, C: CredentialCipher> {
    state: Arc<AppState<S, C>>,
}

impl<S: CredentialStore, C: CredentialCipher> HttpServer<S, C> {
    /// Creates a new HTTP server with the given service.
    pub fn new(service: KiroService<S, C>) -> Self {
        Self {
            state: Arc::new(AppState { service }),
        }
    }

    /// Builds the Axum router with all routes.
    pub fn router(&self) -> Router {
        // Build HTTP metrics layer (uses globally set MeterProvider)
        let metrics = axum_otel_metrics::HttpMetricsLayerBuilder::new().build();

        Router::new()
            .route("/health", get(handlers::health))
            .route(
                "/api/kiro/oauth/authorize",
                post(handlers::oauth_authorize::<S, C>),
            )
            .route(
                "/api/kiro/oauth/status/{state}",
                get(handlers::oauth_status::<S, C>),
            )
            .route(
                "/api/kiro/accounts",
                get(handlers::list_accounts::<S, C>).post(handlers::create_account::<S, C>),
            )
            .route(
                "/api/kiro/accounts/{account_id}",
                get(handlers::get_account::<S, C>).delete(handlers::delete_account::<S, C>),
            )
            .route(
                "/api/kiro/accounts/{account_id}/status",
                put(handlers::update_account_status::<S, C>),
            )
            .route(
                "/api/kiro/accounts/{account_id}/name",
                put(handlers::update_account_name::<S, C>),
            )
            .route(
                "/api/kiro/accounts/{account_id}/balance",
                get(handlers::account_balance::<S, C>),
            )
            .route(
                "/api/kiro/accounts/{account_id}/consumption",
                get(handlers::account_consumption::<S, C>),
            )
            .route(
                "/api/kiro/consumption/stats",
                get(handlers::consumption_stats::<S, C>),
            )
            .route("/v1/kiro/models", get(handlers::list_models::<S, C>))
            .route(
                "/v1/kiro/models/supported",
                get(handlers::supported_models::<S, C>),
            )
            .route(
                "/v1/kiro/chat/completions",
                post(handlers::chat_completions::<S, C>),
            )
            .layer(metrics)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Runs the server on the given address with graceful shutdown.
    pub async fn run(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Server listening on {}", listener.local_addr()?);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown...");
}
