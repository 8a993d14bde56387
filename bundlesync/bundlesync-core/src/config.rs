//! Configuration for bundle synchronization.
//!
//! Configuration is read from `<config dir>/bundlesync/config.toml` (see
//! [`SyncConfig::config_path`]); `BUNDLESYNC_CONFIG_PATH` points elsewhere.
//! Environment variables override individual values after the file is read.
//!
//! # Example
//!
//! ```no_run
//! use bundlesync_core::config::SyncConfig;
//!
//! # async fn example() -> bundlesync_core::Result<()> {
//! let config = SyncConfig::load_or_default().await?;
//! println!("Remote: {}", config.remote.base_url);
//! # Ok(())
//! # }
//! ```

use crate::analysis::Severity;
use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

// Environment variable names
pub const ENV_CONFIG_PATH: &str = "BUNDLESYNC_CONFIG_PATH";
pub const ENV_LOG_LEVEL: &str = "BUNDLESYNC_LOG_LEVEL";
pub const ENV_BASE_URL: &str = "BUNDLESYNC_BASE_URL";
pub const ENV_TOKEN: &str = "BUNDLESYNC_TOKEN";
pub const ENV_MAX_FILE_SIZE_KB: &str = "BUNDLESYNC_MAX_FILE_SIZE_KB";
pub const ENV_REMOTE_TIMEOUT_MS: &str = "BUNDLESYNC_REMOTE_TIMEOUT_MS";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub general: GeneralConfig,
    pub remote: RemoteConfig,
    pub bundle: BundleConfig,
    pub analysis: AnalysisConfig,
    pub watcher: WatcherConfig,
}

/// General configuration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error
    pub log_level: String,
}

/// Remote service settings. `base_url` and `token` are handed to the
/// transport untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    pub token: String,
    /// Upper bound for one create/extend/upload round trip
    pub request_timeout_ms: u64,
    /// Upper bound for remote deletion during teardown
    pub teardown_timeout_ms: u64,
    /// Files per upload request
    pub upload_batch_size: usize,
}

/// Bundle scanning settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleConfig {
    /// Files above this size are left out of the bundle
    pub max_file_size_kb: u64,
    pub respect_gitignore: bool,
    pub include_hidden: bool,
    /// File or directory names excluded wherever they appear under a root
    pub ignore_patterns: Vec<String>,
    /// Allowed extensions without the dot; empty allows every file
    pub extensions: Vec<String>,
}

/// Result display settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Severities hidden when the context starts
    pub hidden_severities: Vec<Severity>,
}

/// Folder watcher settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub enabled: bool,
    pub debounce_ms: u64,
    pub max_batch_size: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://analysis.example.invalid".to_string(),
            token: String::new(),
            request_timeout_ms: 30_000,
            teardown_timeout_ms: 5_000,
            upload_batch_size: 64,
        }
    }
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            max_file_size_kb: 1024,
            respect_gitignore: true,
            include_hidden: false,
            ignore_patterns: vec!["node_modules".to_string(), ".git".to_string()],
            extensions: Vec::new(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            debounce_ms: 200,
            max_batch_size: 256,
        }
    }
}

impl RemoteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }
}

impl BundleConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_kb * 1024
    }
}

impl SyncConfig {
    /// Load configuration from the default location
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be read or parsed
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from_path(&config_path).await
    }

    /// Load from the default location, falling back to defaults (plus
    /// environment overrides) when no file exists.
    pub async fn load_or_default() -> Result<Self> {
        let config_path = Self::config_path()?;
        if tokio::fs::try_exists(&config_path).await? {
            Self::load_from_path(&config_path).await
        } else {
            debug!("No configuration at {}, using defaults", config_path.display());
            let mut config = Self::default();
            config.merge_env_vars()?;
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed
    pub async fn load_from_path(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SyncError::config(format!("Failed to read config file: {}", e)))?;

        let mut config = Self::from_toml(&content)?;

        config.merge_env_vars()?;
        config.validate()?;

        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Parse configuration from TOML text without env overrides.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| SyncError::config(format!("Failed to parse config file: {}", e)))
    }

    /// Save configuration to a specific path atomically
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be serialized or written
    pub async fn save_to_path(&self, path: &Path) -> Result<()> {
        debug!("Saving configuration to: {}", path.display());

        self.validate()?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                SyncError::config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| SyncError::config(format!("Failed to serialize config: {}", e)))?;

        // Write to a sibling temp file, then rename over the target
        let temp_path = path.with_extension("toml.tmp");

        tokio::fs::write(&temp_path, content)
            .await
            .map_err(|e| SyncError::config(format!("Failed to write config file: {}", e)))?;

        tokio::fs::rename(&temp_path, path)
            .await
            .map_err(|e| SyncError::config(format!("Failed to rename config file: {}", e)))?;

        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid
    pub fn validate(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.general.log_level.as_str()) {
            return Err(SyncError::config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.general.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.remote.base_url.is_empty() {
            return Err(SyncError::config("remote.base_url must not be empty"));
        }

        if self.remote.request_timeout_ms == 0 {
            return Err(SyncError::config(
                "remote.request_timeout_ms must be greater than 0",
            ));
        }

        if self.remote.teardown_timeout_ms == 0 {
            return Err(SyncError::config(
                "remote.teardown_timeout_ms must be greater than 0",
            ));
        }

        if self.remote.upload_batch_size == 0 {
            return Err(SyncError::config(
                "remote.upload_batch_size must be greater than 0",
            ));
        }

        if self.bundle.max_file_size_kb == 0 {
            return Err(SyncError::config(
                "bundle.max_file_size_kb must be greater than 0",
            ));
        }

        if self.bundle.extensions.iter().any(|ext| ext.starts_with('.')) {
            return Err(SyncError::config(
                "bundle.extensions entries must not start with '.'",
            ));
        }

        if self.watcher.enabled && self.watcher.max_batch_size == 0 {
            return Err(SyncError::config(
                "watcher.max_batch_size must be greater than 0",
            ));
        }

        debug!("Configuration validation passed");
        Ok(())
    }

    /// Merge environment variable overrides into the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables contain invalid values
    pub fn merge_env_vars(&mut self) -> Result<()> {
        if let Ok(log_level) = std::env::var(ENV_LOG_LEVEL) {
            debug!("Overriding log_level from environment: {}", log_level);
            self.general.log_level = log_level;
        }

        if let Ok(base_url) = std::env::var(ENV_BASE_URL) {
            debug!("Overriding remote base URL from environment: {}", base_url);
            self.remote.base_url = base_url;
        }

        if let Ok(token) = std::env::var(ENV_TOKEN) {
            debug!("Overriding remote token from environment");
            self.remote.token = token;
        }

        if let Ok(size) = std::env::var(ENV_MAX_FILE_SIZE_KB) {
            let size = size.parse::<u64>().map_err(|e| {
                SyncError::config(format!("Invalid max file size in environment: {}", e))
            })?;
            debug!("Overriding max file size from environment: {} KB", size);
            self.bundle.max_file_size_kb = size;
        }

        if let Ok(timeout) = std::env::var(ENV_REMOTE_TIMEOUT_MS) {
            let timeout = timeout.parse::<u64>().map_err(|e| {
                SyncError::config(format!("Invalid remote timeout in environment: {}", e))
            })?;
            debug!("Overriding remote timeout from environment: {} ms", timeout);
            self.remote.request_timeout_ms = timeout;
        }

        Ok(())
    }

    /// Path of the configuration file.
    pub fn config_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
            return Ok(PathBuf::from(path));
        }

        dirs::config_dir()
            .map(|dir| dir.join("bundlesync").join("config.toml"))
            .ok_or_else(|| SyncError::config("Could not determine the user config directory"))
    }
}
