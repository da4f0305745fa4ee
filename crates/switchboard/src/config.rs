//! Configuration management.
//!
//! Settings are loaded from a TOML file. The controller creates a default file
//! when none exists; workers re-read the controller's file for proxy trust and
//! limits, falling back to defaults when they were not given one.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use switchboard_supervisor::NetworkSettings;
use switchboard_worker::admission::MAX_MESSAGE_BYTES;
use switchboard_worker::{TrustedProxies, WorkerSettings};
use tracing::{info, warn};

fn default_port() -> u16 {
    8000
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_workers() -> usize {
    1
}

fn default_max_message_bytes() -> usize {
    MAX_MESSAGE_BYTES
}

fn default_ghost_sweep_interval_secs() -> u64 {
    10 * 60
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub proxy: ProxySettings,
    #[serde(default)]
    pub limits: LimitSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Listening socket and worker pool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Port every worker listens on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Address every worker binds (e.g. "0.0.0.0")
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Number of worker processes, 0 for one per CPU core
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Encrypted listener, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsSettings>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            workers: default_workers(),
            tls: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TlsSettings {
    pub port: u16,
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Reverse proxies allowed to report client addresses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxySettings {
    /// Addresses or CIDR ranges (e.g. "10.0.0.0/8")
    #[serde(default)]
    pub trusted: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitSettings {
    /// Largest inbound client message forwarded to the controller
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    /// Seconds between two ghost-connection sweeps
    #[serde(default = "default_ghost_sweep_interval_secs")]
    pub ghost_sweep_interval_secs: u64,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_message_bytes: default_max_message_bytes(),
            ghost_sweep_interval_secs: default_ghost_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Validates the configuration for consistency and correctness.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error string describing the issue.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.parse::<std::net::IpAddr>().is_err() {
            return Err(format!("Invalid bind address: {}", self.server.bind_address));
        }

        if let Some(tls) = &self.server.tls {
            if tls.port == 0 {
                return Err("TLS port cannot be 0".to_string());
            }
        }

        if let Err(e) = TrustedProxies::parse(&self.proxy.trusted) {
            return Err(e.to_string());
        }

        if self.limits.max_message_bytes == 0 {
            return Err("max_message_bytes must be greater than 0".to_string());
        }
        if self.limits.ghost_sweep_interval_secs == 0 {
            return Err("ghost_sweep_interval_secs must be greater than 0".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }

    /// Stored network settings for the supervisor.
    pub fn network_settings(&self) -> NetworkSettings {
        NetworkSettings {
            port: self.server.port,
            bind_address: self.server.bind_address.clone(),
            workers: self.server.workers,
            tls: self.server.tls.is_some(),
        }
    }

    /// Runtime settings for a worker process.
    pub fn worker_settings(&self) -> Result<WorkerSettings> {
        let trusted_proxies =
            TrustedProxies::parse(&self.proxy.trusted).context("Invalid [proxy] section")?;
        Ok(WorkerSettings {
            max_message_bytes: self.limits.max_message_bytes,
            ghost_sweep_interval: Duration::from_secs(self.limits.ghost_sweep_interval_secs),
            trusted_proxies,
            tls_port: self.server.tls.as_ref().map(|tls| tls.port),
        })
    }
}

/// Loads configuration from file or creates a default configuration file.
///
/// # Arguments
/// * `path` - Path to the configuration file
///
/// # Errors
/// * Returns error if file I/O operations fail
/// * Returns error if TOML parsing fails
pub async fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        read_config(path).await
    } else {
        warn!("Configuration file not found: {}, using defaults", path.display());

        let default_config = AppConfig::default();
        let config_str = toml::to_string_pretty(&default_config)?;
        tokio::fs::write(path, config_str).await?;
        info!("Created default configuration file: {}", path.display());

        Ok(default_config)
    }
}

/// Reads an existing configuration file.
pub async fn read_config(path: &Path) -> Result<AppConfig> {
    let config_str = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str::<AppConfig>(&config_str)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}
