// src/config.rs

//! Manages server configuration: loading, defaults, and validation.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

/// Configuration for the TLS listener.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub cert_path: String,
    #[serde(default)]
    pub key_path: String,
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    9787
}

/// Token and credential settings.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SecurityConfig {
    /// Hex-encoded 32-byte HMAC secret for session tokens. When absent, a
    /// random per-process secret is generated and all tokens rot on restart.
    #[serde(default)]
    pub token_secret: Option<String>,
    /// How long a minted token stays valid.
    #[serde(with = "humantime_serde", default = "default_token_ttl")]
    pub token_ttl: Duration,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            token_secret: None,
            token_ttl: default_token_ttl(),
        }
    }
}

fn default_token_ttl() -> Duration {
    Duration::from_secs(60 * 60)
}

/// Connection registry sweep settings.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RegistryConfig {
    /// How often the sweep runs.
    #[serde(with = "humantime_serde", default = "default_sweep_interval")]
    pub sweep_interval: Duration,
    /// The bounded acquire timeout per connection; a request still in flight
    /// past this makes the sweep skip the connection, never wait.
    #[serde(with = "humantime_serde", default = "default_sweep_lock_timeout")]
    pub sweep_lock_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            sweep_interval: default_sweep_interval(),
            sweep_lock_timeout: default_sweep_lock_timeout(),
        }
    }
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_sweep_lock_timeout() -> Duration {
    Duration::from_millis(50)
}

/// Push delivery settings.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PushConfig {
    /// Size of the delivery worker pool.
    #[serde(default = "default_push_workers")]
    pub workers: usize,
    /// Capacity of the fan-out job queue.
    #[serde(default = "default_push_queue_capacity")]
    pub queue_capacity: usize,
    /// Per-subscriber write timeout; a slower subscriber is dropped.
    #[serde(with = "humantime_serde", default = "default_push_write_timeout")]
    pub write_timeout: Duration,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            workers: default_push_workers(),
            queue_capacity: default_push_queue_capacity(),
            write_timeout: default_push_write_timeout(),
        }
    }
}

fn default_push_workers() -> usize {
    5
}

fn default_push_queue_capacity() -> usize {
    128
}

fn default_push_write_timeout() -> Duration {
    Duration::from_secs(3)
}

/// The top-level server configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    /// Path to the JSON users file; absent means no users are loaded.
    #[serde(default)]
    pub users_file: Option<String>,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub push: PushConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            max_clients: default_max_clients(),
            users_file: None,
            tls: TlsConfig::default(),
            metrics: MetricsConfig::default(),
            security: SecurityConfig::default(),
            registry: RegistryConfig::default(),
            push: PushConfig::default(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    2480
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_clients() -> usize {
    10000
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.tls.enabled && (self.tls.cert_path.is_empty() || self.tls.key_path.is_empty()) {
            anyhow::bail!("TLS is enabled but cert_path or key_path is missing");
        }
        if self.push.workers == 0 {
            anyhow::bail!("push.workers must be at least 1");
        }
        Ok(())
    }
}
