//! Configuration management for the audit collector
//!
//! Handles TOML configuration parsing, validation and environment overrides

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::{
    APP_SUBSYSTEM, COLLECTOR_CONFIG_FILE, DEFAULT_AUDIT_QUEUE_CAPACITY, DEFAULT_LOG_DIR, DEFAULT_SOCKET_PATH,
    ENV_LOG_DIR, ENV_SOCKET_PATH, MAX_LOG_SIZE_MB_MAX, MAX_LOG_SIZE_MB_MIN,
};

/// Main collector configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfiguration {
    pub collector: CollectorSettings,
}

/// Collector runtime settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorSettings {
    /// Unix socket audit sinks connect to
    pub socket_path: PathBuf,
    /// Directory holding access.log
    pub log_dir: PathBuf,
    /// Access log cap in MiB (8-1024)
    pub max_log_size_mb: u32,
    /// Queue capacity handed to in-process sinks
    pub queue_capacity: usize,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            max_log_size_mb: 64,
            queue_capacity: DEFAULT_AUDIT_QUEUE_CAPACITY,
        }
    }
}

impl CollectorConfiguration {
    /// `<user config dir>/storage-redirect/collector.toml`
    pub fn default_config_path() -> Result<PathBuf> {
        let base = dirs::config_dir().context("Could not determine the user configuration directory")?;
        Ok(base.join(APP_SUBSYSTEM).join(COLLECTOR_CONFIG_FILE))
    }

    /// Parse and validate a configuration file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse configuration file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Configuration file is invalid: {}", path.display()))?;
        Ok(config)
    }

    /// Explicit file if given, else the default file when present, else defaults.
    /// Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => match Self::default_config_path() {
                Ok(default) if default.exists() => Self::load_from_file(&default)?,
                _ => Self::default(),
            },
        };
        config.apply_overrides(
            std::env::var(ENV_SOCKET_PATH).ok(),
            std::env::var(ENV_LOG_DIR).ok(),
        );
        Ok(config)
    }

    /// Replace the socket path and log directory with non-empty overrides
    pub fn apply_overrides(&mut self, socket_path: Option<String>, log_dir: Option<String>) {
        if let Some(socket) = socket_path.filter(|s| !s.is_empty()) {
            self.collector.socket_path = PathBuf::from(socket);
        }
        if let Some(dir) = log_dir.filter(|s| !s.is_empty()) {
            self.collector.log_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<()> {
        let size = self.collector.max_log_size_mb;
        if !(MAX_LOG_SIZE_MB_MIN..=MAX_LOG_SIZE_MB_MAX).contains(&size) {
            bail!(
                "invalid max_log_size_mb {} (must be between {} and {})",
                size,
                MAX_LOG_SIZE_MB_MIN,
                MAX_LOG_SIZE_MB_MAX
            );
        }
        if self.collector.queue_capacity == 0 {
            bail!("invalid queue_capacity 0 (must be at least 1)");
        }
        if self.collector.socket_path.as_os_str().is_empty() {
            bail!("invalid socket_path (must not be empty)");
        }
        Ok(())
    }

    pub fn max_log_bytes(&self) -> u64 {
        u64::from(self.collector.max_log_size_mb) * 1024 * 1024
    }

    /// Create the socket and log directories
    pub fn ensure_directories(&self) -> Result<()> {
        if let Some(parent) = self.collector.socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create socket directory: {}", parent.display()))?;
        }
        std::fs::create_dir_all(&self.collector.log_dir)
            .with_context(|| format!("Failed to create log directory: {}", self.collector.log_dir.display()))?;
        Ok(())
    }
}
