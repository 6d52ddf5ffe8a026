//! Main application configuration
//!
//! This module defines the primary configuration structures for the pairing-room
//! service, including environment variable and TOML file loading and validation.

use crate::config::retry::BackoffPolicy;
use crate::error::MatchmakingError;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub matchmaking: MatchmakingSettings,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging and metrics
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Host the HTTP server binds to
    pub http_host: String,
    /// Port for the HTTP server (queue, sessions, health, metrics)
    pub http_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

/// Shared store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Backoff applied when the store is unreachable
    pub retry: BackoffPolicy,
    /// How often a conflicting transaction is re-run before giving up
    pub max_transaction_retries: usize,
}

/// Matchmaking-specific settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakingSettings {
    /// Upper bound on pairing attempts a single trigger may chain
    pub max_pairing_rounds: usize,
    /// Interval of the background pairing sweep in milliseconds, 0 disables it
    pub sweep_interval_ms: u64,
    /// Prefix for sequential session ids; empty means random UUIDs
    pub session_id_prefix: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "pairing-room".to_string(),
            log_level: "info".to_string(),
            http_host: "0.0.0.0".to_string(),
            http_port: 8080,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            retry: BackoffPolicy::default(),
            max_transaction_retries: 25,
        }
    }
}

impl Default for MatchmakingSettings {
    fn default() -> Self {
        Self {
            max_pairing_rounds: 64,
            sweep_interval_ms: 1000,
            session_id_prefix: String::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        // Service settings
        if let Ok(name) = env::var("SERVICE_NAME") {
            config.service.name = name;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            config.service.log_level = log_level;
        }
        if let Ok(host) = env::var("HTTP_HOST") {
            config.service.http_host = host;
        }
        if let Ok(port) = env::var("HTTP_PORT") {
            config.service.http_port = port
                .parse()
                .map_err(|_| anyhow!("Invalid HTTP_PORT value: {}", port))?;
        }
        if let Ok(timeout) = env::var("SHUTDOWN_TIMEOUT_SECONDS") {
            config.service.shutdown_timeout_seconds = timeout
                .parse()
                .map_err(|_| anyhow!("Invalid SHUTDOWN_TIMEOUT_SECONDS value: {}", timeout))?;
        }

        // Store settings
        if let Ok(retries) = env::var("STORE_MAX_RETRY_ATTEMPTS") {
            config.store.retry.max_retries = retries
                .parse()
                .map_err(|_| anyhow!("Invalid STORE_MAX_RETRY_ATTEMPTS value: {}", retries))?;
        }
        if let Ok(delay) = env::var("STORE_RETRY_DELAY_MS") {
            config.store.retry.base_delay_ms = delay
                .parse()
                .map_err(|_| anyhow!("Invalid STORE_RETRY_DELAY_MS value: {}", delay))?;
        }
        if let Ok(delay) = env::var("STORE_RETRY_MAX_DELAY_MS") {
            config.store.retry.max_delay_ms = delay
                .parse()
                .map_err(|_| anyhow!("Invalid STORE_RETRY_MAX_DELAY_MS value: {}", delay))?;
        }
        if let Ok(retries) = env::var("STORE_MAX_TRANSACTION_RETRIES") {
            config.store.max_transaction_retries = retries.parse().map_err(|_| {
                anyhow!("Invalid STORE_MAX_TRANSACTION_RETRIES value: {}", retries)
            })?;
        }

        // Matchmaking settings
        if let Ok(rounds) = env::var("MAX_PAIRING_ROUNDS") {
            config.matchmaking.max_pairing_rounds = rounds
                .parse()
                .map_err(|_| anyhow!("Invalid MAX_PAIRING_ROUNDS value: {}", rounds))?;
        }
        if let Ok(interval) = env::var("SWEEP_INTERVAL_MS") {
            config.matchmaking.sweep_interval_ms = interval
                .parse()
                .map_err(|_| anyhow!("Invalid SWEEP_INTERVAL_MS value: {}", interval))?;
        }
        if let Ok(prefix) = env::var("SESSION_ID_PREFIX") {
            config.matchmaking.session_id_prefix = prefix;
        }

        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }

    /// Get the background sweep interval, `None` when disabled
    pub fn sweep_interval(&self) -> Option<Duration> {
        match self.matchmaking.sweep_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

/// Wrap a validation failure as a typed configuration error
fn invalid(message: impl Into<String>) -> anyhow::Error {
    MatchmakingError::ConfigurationError {
        message: message.into(),
    }
    .into()
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => {
            return Err(invalid(format!(
                "Invalid log level: {}",
                config.service.log_level
            )))
        }
    }

    if config.service.http_port == 0 {
        return Err(invalid("HTTP port cannot be 0"));
    }
    if config.service.shutdown_timeout_seconds == 0 {
        return Err(invalid("Shutdown timeout must be greater than 0"));
    }

    // Validate store settings
    if config.store.retry.max_delay_ms < config.store.retry.base_delay_ms {
        return Err(invalid(format!(
            "Store retry max delay ({}ms) must not be below the base delay ({}ms)",
            config.store.retry.max_delay_ms, config.store.retry.base_delay_ms
        )));
    }
    if config.store.max_transaction_retries == 0 {
        return Err(invalid("Max transaction retries must be greater than 0"));
    }

    // Validate matchmaking settings
    if config.matchmaking.max_pairing_rounds == 0 {
        return Err(invalid("Max pairing rounds must be greater than 0"));
    }

    Ok(())
}
