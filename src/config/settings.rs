//! Application settings and configuration
//!
//! Settings come from environment variables (a `.env` file is honoured) with
//! defaults suitable for local use. CLI flags may override some of them after
//! loading; call [`Settings::validate`] again afterwards.

use crate::services::endpoint_pool::PoolConfig;
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Application environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    #[value(alias = "dev")]
    Development,
    #[value(alias = "stage")]
    Staging,
    #[value(alias = "prod")]
    Production,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Staging => write!(f, "staging"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" | "stage" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            _ => anyhow::bail!(
                "Invalid environment: {}. Expected: development, staging, or production",
                s
            ),
        }
    }
}

/// Connection pool limits, applied to every endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolSettings {
    pub max_active: usize,
    pub max_idle: usize,
    pub acquire_wait_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_active: 10,
            max_idle: 5,
            acquire_wait_ms: 5000,
        }
    }
}

/// Bridge engine tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeSettings {
    /// Reply wait used when a request carries no positive timeout
    pub default_timeout_ms: u64,
    /// Bridging requests allowed to run at once
    pub worker_limit: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            worker_limit: default_worker_limit(),
        }
    }
}

/// Embedded reply emulator
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmulatorSettings {
    pub queue: String,
    pub broker_url: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

impl Default for EmulatorSettings {
    fn default() -> Self {
        Self {
            queue: String::new(),
            broker_url: "memory://local".to_string(),
            user: "emulator".to_string(),
            password: None,
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    // App settings
    pub app_name: String,
    pub app_version: String,
    pub environment: Environment,
    pub log_level: String,

    // Server settings
    pub host: String,
    pub port: u16,

    pub pool: PoolSettings,
    pub bridge: BridgeSettings,

    /// Present when `EMULATOR_QUEUE` is set
    pub emulator: Option<EmulatorSettings>,
}

impl Settings {
    /// Load settings from environment variables with defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let settings = Self {
            app_name: env_or_default("APP_NAME", "ems-http-bridge"),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: env_or_default("ENVIRONMENT", "development")
                .parse()
                .unwrap_or_default(),
            log_level: env_or_default("LOG_LEVEL", "info"),

            host: env_or_default("HOST", "0.0.0.0"),
            port: env_or_default("PORT", "8080")
                .parse()
                .context("Invalid PORT value")?,

            pool: PoolSettings {
                max_active: env_parse("POOL_MAX_ACTIVE", 10)?,
                max_idle: env_parse("POOL_MAX_IDLE", 5)?,
                acquire_wait_ms: env_parse("POOL_ACQUIRE_WAIT_MS", 5000)?,
            },

            bridge: BridgeSettings {
                default_timeout_ms: env_parse("BRIDGE_DEFAULT_TIMEOUT_MS", 30_000)?,
                worker_limit: env_parse("BRIDGE_WORKER_LIMIT", default_worker_limit())?,
            },

            emulator: env::var("EMULATOR_QUEUE").ok().map(|queue| EmulatorSettings {
                queue,
                broker_url: env_or_default("EMULATOR_BROKER_URL", "memory://local"),
                user: env_or_default("EMULATOR_USER", "emulator"),
                password: env::var("EMULATOR_PASSWORD").ok(),
            }),
        };

        settings.validate()?;

        Ok(settings)
    }

    /// Validate settings
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("Port cannot be 0");
        }

        if self.pool.max_active == 0 {
            anyhow::bail!("POOL_MAX_ACTIVE must be > 0");
        }
        if self.pool.max_idle > self.pool.max_active {
            anyhow::bail!(
                "POOL_MAX_IDLE ({}) cannot exceed POOL_MAX_ACTIVE ({})",
                self.pool.max_idle,
                self.pool.max_active
            );
        }

        if self.bridge.default_timeout_ms == 0 {
            anyhow::bail!("BRIDGE_DEFAULT_TIMEOUT_MS must be > 0");
        }
        if self.bridge.worker_limit == 0 {
            anyhow::bail!("BRIDGE_WORKER_LIMIT must be > 0");
        }

        if let Some(emulator) = &self.emulator {
            if emulator.queue.trim().is_empty() {
                anyhow::bail!("EMULATOR_QUEUE cannot be blank");
            }
        }

        Ok(())
    }

    /// Check if running in production mode
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Get the server address string
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::default()
            .with_max_active(self.pool.max_active)
            .with_max_idle(self.pool.max_idle)
            .with_acquire_wait(Duration::from_millis(self.pool.acquire_wait_ms))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "ems-http-bridge".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: Environment::Development,
            log_level: "info".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8080,
            pool: PoolSettings::default(),
            bridge: BridgeSettings::default(),
            emulator: None,
        }
    }
}

/// Processors × 32
fn default_worker_limit() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        * 32
}

/// Helper function to get environment variable with default
fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {} value: {}", key, raw)),
        Err(_) => Ok(default),
    }
}
