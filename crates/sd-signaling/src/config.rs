use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};

use crate::credentials::PasswordHashConfig;
use crate::rate_limit::RateLimitConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,

    // Session lifecycle
    pub pending_ttl_secs: u64,

    // Liveness
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub sweep_interval_secs: u64,

    // Authentication throttling
    pub rate_limit: RateLimitConfig,

    // Credential storage
    pub password_hash: PasswordHashConfig,
    pub max_concurrent_hashes: usize,

    // Frames queued per connection before it is dropped as a slow consumer
    pub outbox_capacity: usize,

    // Allowed browser origins, empty allows any
    pub cors_origins: Vec<String>,

    // Graceful shutdown
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
            pending_ttl_secs: 30,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            sweep_interval_secs: 30,
            rate_limit: RateLimitConfig::default(),
            password_hash: PasswordHashConfig::default(),
            max_concurrent_hashes: 4,
            outbox_capacity: 256,
            cors_origins: Vec::new(),
            shutdown_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("SD_BIND_ADDR") {
            config.bind_addr = addr.parse()?;
        }

        if let Ok(port) = std::env::var("SD_PORT") {
            config.bind_addr.set_port(port.parse()?);
        }

        if let Ok(ttl) = std::env::var("SD_PENDING_TTL_SECS") {
            config.pending_ttl_secs = ttl.parse()?;
        }

        if let Ok(interval) = std::env::var("SD_HEARTBEAT_INTERVAL_SECS") {
            config.heartbeat_interval_secs = interval.parse()?;
        }

        if let Ok(timeout) = std::env::var("SD_HEARTBEAT_TIMEOUT_SECS") {
            config.heartbeat_timeout_secs = timeout.parse()?;
        }

        if let Ok(attempts) = std::env::var("SD_MAX_AUTH_ATTEMPTS") {
            config.rate_limit.max_attempts = attempts.parse()?;
        }

        if let Ok(window) = std::env::var("SD_AUTH_WINDOW_SECS") {
            config.rate_limit.window_secs = window.parse()?;
        }

        if let Ok(hashes) = std::env::var("SD_MAX_CONCURRENT_HASHES") {
            config.max_concurrent_hashes = hashes.parse()?;
        }

        if let Ok(capacity) = std::env::var("SD_OUTBOX_CAPACITY") {
            config.outbox_capacity = capacity.parse()?;
        }

        if let Ok(origins) = std::env::var("SD_CORS_ORIGINS") {
            config.cors_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        Ok(config)
    }

    pub fn from_toml(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pending_ttl_secs == 0 {
            anyhow::bail!("pending_ttl_secs must be > 0");
        }

        if self.heartbeat_interval_secs == 0 || self.sweep_interval_secs == 0 {
            anyhow::bail!("heartbeat_interval_secs and sweep_interval_secs must be > 0");
        }

        if self.heartbeat_timeout_secs <= self.heartbeat_interval_secs {
            anyhow::bail!("heartbeat_timeout_secs must exceed heartbeat_interval_secs");
        }

        if self.rate_limit.max_attempts == 0 || self.rate_limit.window_secs == 0 {
            anyhow::bail!("rate_limit.max_attempts and rate_limit.window_secs must be > 0");
        }

        self.password_hash.params()?;

        if self.max_concurrent_hashes == 0 || self.outbox_capacity == 0 {
            anyhow::bail!("max_concurrent_hashes and outbox_capacity must be > 0");
        }

        for origin in &self.cors_origins {
            if axum::http::HeaderValue::from_str(origin).is_err() {
                anyhow::bail!("invalid CORS origin: {origin}");
            }
        }

        Ok(())
    }

    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
