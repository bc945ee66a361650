//! Configuration file parser for ~/.config/tidings/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde but logged as warnings, since they are
//! usually typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::util::{RetryPolicy, UrlPolicy};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file. `None` means `<data dir>/tidings/tidings.db`.
    pub database_path: Option<PathBuf>,

    /// Content cache directory. `None` means `<cache dir>/tidings/content`.
    pub cache_dir: Option<PathBuf>,

    /// Size limit applied by `cache evict`.
    pub cache_max_bytes: u64,

    /// Age limit applied by `cache evict`.
    pub cache_max_age_hours: u64,

    /// Feeds refreshed concurrently per batch.
    pub refresh_batch_size: usize,

    /// Per-request HTTP timeout.
    pub request_timeout_secs: u64,

    /// Liveness probes per feed during cleanup before it is removed.
    pub maintenance_attempts: u32,

    /// Pause between liveness probes.
    pub maintenance_delay_secs: u64,

    /// Allow fetching from localhost and private networks.
    pub allow_private_hosts: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            cache_dir: None,
            cache_max_bytes: 100 * 1024 * 1024,
            cache_max_age_hours: 24 * 30,
            refresh_batch_size: crate::feed::DEFAULT_BATCH_SIZE,
            request_timeout_secs: crate::feed::REQUEST_TIMEOUT.as_secs(),
            maintenance_attempts: 3,
            maintenance_delay_secs: 2,
            allow_private_hosts: false,
        }
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 9] = [
        "database_path",
        "cache_dir",
        "cache_max_bytes",
        "cache_max_age_hours",
        "refresh_batch_size",
        "request_timeout_secs",
        "maintenance_attempts",
        "maintenance_delay_secs",
        "allow_private_hosts",
    ];

    /// `$XDG_CONFIG_HOME/tidings/config.toml`, falling back to
    /// `~/.config/tidings/config.toml`.
    pub fn default_path() -> PathBuf {
        config_home().join("tidings").join("config.toml")
    }

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading to prevent memory exhaustion
        // from a maliciously large or corrupted config file.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| data_home().join("tidings").join("tidings.db"))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| cache_home().join("tidings").join("content"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn cache_max_age(&self) -> Duration {
        Duration::from_secs(self.cache_max_age_hours.saturating_mul(3600))
    }

    pub fn batch_size(&self) -> usize {
        self.refresh_batch_size.max(1)
    }

    pub fn url_policy(&self) -> UrlPolicy {
        if self.allow_private_hosts {
            UrlPolicy::AllowPrivate
        } else {
            UrlPolicy::PublicOnly
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.maintenance_attempts.max(1),
            delay: Duration::from_secs(self.maintenance_delay_secs),
        }
    }
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn xdg_dir(var: &str, fallback: &[&str]) -> PathBuf {
    match std::env::var_os(var) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => fallback.iter().fold(home_dir(), |path, part| path.join(part)),
    }
}

fn config_home() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", &[".config"])
}

fn data_home() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", &[".local", "share"])
}

fn cache_home() -> PathBuf {
    xdg_dir("XDG_CACHE_HOME", &[".cache"])
}

// ============================================================================
// Tests
// ============================================================================
