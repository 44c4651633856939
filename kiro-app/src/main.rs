//! # Kiro Application
//!
//! Binary that wires together all the components:
//! - Load configuration from environment
//! - Initialize the credential store and cipher
//! - Create the proxy service around the upstream client
//! - Start the HTTP server

mod config;

use opentelemetry::global;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{propagation::TraceContextPropagator, trace as sdktrace};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kiro_client::UpstreamClient;
use kiro_hex::{KiroService, inbound::HttpServer};
use kiro_repo::{AesGcmCipher, build_repo};

fn init_tracer(endpoint: &str) -> anyhow::Result<(sdktrace::Tracer, sdktrace::SdkTracerProvider)> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    // Use gRPC exporter with batch processing (non-blocking)
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let provider = sdktrace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .build();

    global::set_tracer_provider(provider.clone());

    use opentelemetry::trace::TracerProvider as _;
    Ok((provider.tracer("kiro-proxy"), provider))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = config::Config::from_env()?;

    // Span export is opt-in
    let otel = config
        .otlp_endpoint
        .as_deref()
        .map(init_tracer)
        .transpose()?;
    let telemetry = otel
        .as_ref()
        .map(|(tracer, _)| tracing_opentelemetry::layer().with_tracer(tracer.clone()));

    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,kiro_app=debug,kiro_hex=debug,kiro_client=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry)
        .init();

    tracing::info!("Starting Kiro proxy on port {}", config.port);
    tracing::info!("Relaying to plugin API at {}", config.plugin_api_base_url);

    // Build credential store (handles connection and migration)
    let store = build_repo(&config.database_url).await?;
    let cipher = AesGcmCipher::from_config(&config.encryption_key)?;
    let upstream =
        UpstreamClient::new(&config.plugin_api_base_url).with_timeout(config.upstream_timeout);

    // Create the proxy service
    let service = KiroService::new(store, cipher, upstream);

    // Create and run the HTTP server
    let server = HttpServer::new(service);
    let addr = format!("0.0.0.0:{}", config.port);

    server.run(&addr).await?;

    // Ensure traces are flushed before exit
    if let Some((_, provider)) = otel {
        let _ = provider.shutdown();
    }
    Ok(())
}
