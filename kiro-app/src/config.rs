//! Configuration loading from environment.

use std::env;
use std::time::Duration;

use kiro_client::DEFAULT_TIMEOUT;

/// Application configuration.
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub plugin_api_base_url: String,
    pub encryption_key: String,
    pub upstream_timeout: Duration,
    pub otlp_endpoint: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("{} environment variable is required", key))
        };

        let port = lookup("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse()?;

        let upstream_timeout = match lookup("UPSTREAM_TIMEOUT_SECS") {
            Some(secs) => Duration::from_secs(secs.parse()?),
            None => DEFAULT_TIMEOUT,
        };

        Ok(Self {
            port,
            database_url: required("DATABASE_URL")?,
            plugin_api_base_url: required("PLUGIN_API_BASE_URL")?,
            encryption_key: required("CREDENTIAL_ENCRYPTION_KEY")?,
            upstream_timeout,
            otlp_endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT").filter(|v| !v.is_empty()),
        })
    }
}
