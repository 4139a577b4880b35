//! Synchronization configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use cyface_core::config::{ConfigError, ValidationError, load_toml, save_toml};

use crate::retry::RetryConfig;

/// What happens to a measurement once the collector accepted it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AfterSync {
    /// Keep all data and only mark the measurement synchronized.
    Keep,
    /// Drop acceleration samples, keep the geo trace.
    #[default]
    Clean,
    /// Delete the measurement.
    Delete,
}

/// How the synchronizer obtains a bearer token.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AuthConfig {
    /// No authentication configured; uploads fail until one is set.
    #[default]
    None,
    /// A pre-issued token.
    Token { token: String },
    /// Username and password exchanged at the collector's login endpoint.
    Credentials { username: String, password: String },
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthConfig::None => f.write_str("None"),
            AuthConfig::Token { .. } => f.debug_struct("Token").finish_non_exhaustive(),
            AuthConfig::Credentials { username, .. } => f
                .debug_struct("Credentials")
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

/// Device description sent with every upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceMetadata {
    /// Device model.
    pub device_type: String,
    /// Operating system version.
    pub os_version: String,
    /// Version of the embedding application.
    pub app_version: String,
}

impl Default for DeviceMetadata {
    fn default() -> Self {
        Self {
            device_type: std::env::consts::ARCH.to_string(),
            os_version: std::env::consts::OS.to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Synchronizer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base URL of the collector API (e.g., `https://example.com/api/v2`).
    pub collector_url: String,
    /// Authentication method.
    pub auth: AuthConfig,
    /// Policy applied after a successful upload.
    pub after_sync: AfterSync,
    /// Only sync automatically on unmetered connections.
    pub unmetered_only: bool,
    /// HTTP request timeout in seconds.
    pub request_timeout: u64,
    /// Retry settings for transient failures.
    pub retry: RetryConfig,
    /// Device description.
    pub device: DeviceMetadata,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            collector_url: String::new(),
            auth: AuthConfig::default(),
            after_sync: AfterSync::default(),
            unmetered_only: true,
            request_timeout: 60,
            retry: RetryConfig::default(),
            device: DeviceMetadata::default(),
        }
    }
}

impl SyncConfig {
    /// Create a configuration for `collector_url` with default settings.
    pub fn new(collector_url: impl Into<String>) -> Self {
        Self {
            collector_url: collector_url.into(),
            ..Default::default()
        }
    }

    /// Load configuration from the default path, or defaults if it does not exist.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        load_toml(path)
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        save_toml(self, path)
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.collector_url.is_empty() {
            errors.push(ValidationError::new(
                "collector_url",
                "collector URL cannot be empty",
            ));
        } else if !self.collector_url.starts_with("http://")
            && !self.collector_url.starts_with("https://")
        {
            errors.push(ValidationError::new(
                "collector_url",
                format!(
                    "collector URL must start with http:// or https://, got '{}'",
                    self.collector_url
                ),
            ));
        }

        match &self.auth {
            AuthConfig::None => {}
            AuthConfig::Token { token } => {
                if token.trim().is_empty() {
                    errors.push(ValidationError::new("auth.token", "token cannot be empty"));
                }
            }
            AuthConfig::Credentials { username, password } => {
                if username.is_empty() {
                    errors.push(ValidationError::new(
                        "auth.username",
                        "username cannot be empty",
                    ));
                }
                if password.is_empty() {
                    errors.push(ValidationError::new(
                        "auth.password",
                        "password cannot be empty",
                    ));
                }
            }
        }

        if self.request_timeout == 0 {
            errors.push(ValidationError::new(
                "request_timeout",
                "request timeout cannot be zero",
            ));
        }

        if self.retry.backoff_multiplier < 1.0 || self.retry.backoff_multiplier.is_nan() {
            errors.push(ValidationError::new(
                "retry.backoff_multiplier",
                "backoff multiplier must be at least 1.0",
            ));
        }

        if self.retry.initial_delay > self.retry.max_delay {
            errors.push(ValidationError::new(
                "retry.initial_delay",
                "initial delay cannot exceed max delay",
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

/// Default synchronization configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cyface")
        .join("sync.toml")
}
