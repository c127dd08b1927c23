//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to automatically deserialize environment variables into a type-safe struct.

use serde::Deserialize;
use std::time::Duration;

use crate::workflows::retry::RetryPolicy;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `INTERNAL_API_KEY` (required): shared secret for `/api/v1` and internal gateway calls
/// - `API_GATEWAY_URL`, `RECSYS_SERVICE_URL`, `ECOMMERCE_SERVICE_URL` (required): service base URLs
/// - `THIRD_PARTY_SERVICE_URL` (optional): defaults to `http://localhost:8007`
/// - `SLACK_WEBHOOK_URL` (optional): backup notifications are skipped when unset
/// - `PUSHER_APP_ID`, `PUSHER_KEY`, `PUSHER_SECRET` (required): realtime credentials
/// - `PUSHER_CLUSTER` (optional): defaults to `ap1`
/// - `PUSHER_HOST`, `PUSHER_PORT` (optional): self-hosted realtime server
/// - `PUSHER_USE_TLS` (optional): defaults to true
/// - `SCHEDULER_ENABLED` (optional): run cron workflows, defaults to true
/// - `RETRY_INITIAL_BACKOFF_MS`, `RETRY_MAX_BACKOFF_MS` (optional): workflow retry pacing
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    pub internal_api_key: String,

    pub api_gateway_url: String,
    pub recsys_service_url: String,
    pub ecommerce_service_url: String,

    #[serde(default = "default_third_party_url")]
    pub third_party_service_url: String,

    #[serde(default)]
    pub slack_webhook_url: Option<String>,

    pub pusher_app_id: String,
    #[serde(alias = "next_public_pusher_key")]
    pub pusher_key: String,
    pub pusher_secret: String,
    #[serde(default = "default_cluster", alias = "next_public_pusher_cluster")]
    pub pusher_cluster: String,
    #[serde(default)]
    pub pusher_host: Option<String>,
    #[serde(default)]
    pub pusher_port: Option<u16>,
    #[serde(default = "default_true")]
    pub pusher_use_tls: bool,

    #[serde(default = "default_true")]
    pub scheduler_enabled: bool,

    #[serde(default = "default_initial_backoff_ms")]
    pub retry_initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub retry_max_backoff_ms: u64,
}

/// Default port if SERVER_PORT environment variable is not set.
fn default_port() -> u16 {
    3000
}

fn default_third_party_url() -> String {
    "http://localhost:8007".to_string()
}

fn default_cluster() -> String {
    "ap1".to_string()
}

fn default_true() -> bool {
    true
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid URL in {name}: {reason}")]
    InvalidUrl { name: &'static str, reason: String },
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This method first attempts to load a `.env` file (which is optional),
    /// then reads environment variables and deserializes them into a Config struct.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Required environment variables are missing (e.g., DATABASE_URL)
    /// - Environment variable values cannot be parsed into expected types
    /// - A service base URL is not an absolute http(s) URL
    pub fn from_env() -> Result<Self, ConfigError> {
        // Try to load .env file if it exists (does nothing if not found)
        dotenvy::dotenv().ok();

        // Field names are automatically converted: database_url -> DATABASE_URL
        let config = envy::from_env::<Config>()?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every configured service URL is usable as a base URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_base_url("API_GATEWAY_URL", &self.api_gateway_url)?;
        validate_base_url("RECSYS_SERVICE_URL", &self.recsys_service_url)?;
        validate_base_url("ECOMMERCE_SERVICE_URL", &self.ecommerce_service_url)?;
        validate_base_url("THIRD_PARTY_SERVICE_URL", &self.third_party_service_url)?;
        if let Some(ref slack) = self.slack_webhook_url {
            validate_base_url("SLACK_WEBHOOK_URL", slack)?;
        }
        Ok(())
    }

    /// Retry policy shared by every workflow; the per-workflow retry count overrides `max_retries`.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_backoff: Duration::from_millis(self.retry_initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry_max_backoff_ms),
            ..RetryPolicy::default()
        }
    }
}

fn validate_base_url(name: &'static str, value: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        name,
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::InvalidUrl {
            name,
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        database_url: "postgres://localhost/tenant_relay".to_string(),
        server_port: 3000,
        internal_api_key: "internal-test-key".to_string(),
        api_gateway_url: "http://gateway.test".to_string(),
        recsys_service_url: "http://recsys.test".to_string(),
        ecommerce_service_url: "http://ecommerce.test".to_string(),
        third_party_service_url: default_third_party_url(),
        slack_webhook_url: None,
        pusher_app_id: "3".to_string(),
        pusher_key: "278d425bdf160c739803".to_string(),
        pusher_secret: "7ad3773142a6692b25b8".to_string(),
        pusher_cluster: default_cluster(),
        pusher_host: None,
        pusher_port: None,
        pusher_use_tls: true,
        scheduler_enabled: false,
        retry_initial_backoff_ms: 0,
        retry_max_backoff_ms: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_http_urls() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_relative_gateway_url() {
        let config = Config {
            api_gateway_url: "/gateway".to_string(),
            ..test_config()
        };

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("API_GATEWAY_URL"));
    }

    #[test]
    fn test_validate_rejects_non_http_scheme() {
        let config = Config {
            slack_webhook_url: Some("ftp://hooks.example.com/x".to_string()),
            ..test_config()
        };

        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl { name: "SLACK_WEBHOOK_URL", .. })
        ));
    }

    #[test]
    fn test_retry_policy_uses_configured_backoff() {
        let config = Config {
            retry_initial_backoff_ms: 250,
            retry_max_backoff_ms: 4_000,
            ..test_config()
        };

        let policy = config.retry_policy();
        assert_eq!(policy.initial_backoff, Duration::from_millis(250));
        assert_eq!(policy.max_backoff, Duration::from_millis(4_000));
    }
}
