//! Capture configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Minimum flush interval in seconds.
pub const MIN_FLUSH_INTERVAL: u64 = 1;
/// Maximum flush interval in seconds (10 minutes).
pub const MAX_FLUSH_INTERVAL: u64 = 600;

/// Configuration of the data capturing service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Seconds between periodic flushes of the capture buffer.
    pub flush_interval: u64,
    /// Maximum accepted location accuracy in metres.
    pub max_location_accuracy: f64,
    /// Maximum difference between a fix's timestamp and now, in seconds.
    pub max_location_age: u64,
    /// Capacity of the event broadcast channel.
    pub event_buffer: usize,
    /// Free space below which a low disk space event is emitted.
    pub low_disk_space_bytes: u64,
    /// Storage settings.
    pub storage: StorageConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            flush_interval: 30,
            max_location_accuracy: crate::filter::DEFAULT_MAX_ACCURACY,
            max_location_age: crate::filter::DEFAULT_MAX_AGE.as_secs(),
            event_buffer: 100,
            low_disk_space_bytes: 100 * 1024 * 1024,
            storage: StorageConfig::default(),
        }
    }
}

impl CaptureConfig {
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

    /// Flush interval as a [`Duration`].
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval)
    }

    /// Location age tolerance as a [`Duration`].
    pub fn max_location_age(&self) -> Duration {
        Duration::from_secs(self.max_location_age)
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.flush_interval < MIN_FLUSH_INTERVAL {
            errors.push(ValidationError::new(
                "flush_interval",
                format!(
                    "flush interval {} is too short (minimum {} second)",
                    self.flush_interval, MIN_FLUSH_INTERVAL
                ),
            ));
        } else if self.flush_interval > MAX_FLUSH_INTERVAL {
            errors.push(ValidationError::new(
                "flush_interval",
                format!(
                    "flush interval {} is too long (maximum {} seconds)",
                    self.flush_interval, MAX_FLUSH_INTERVAL
                ),
            ));
        }

        if self.max_location_accuracy.is_nan() || self.max_location_accuracy <= 0.0 {
            errors.push(ValidationError::new(
                "max_location_accuracy",
                "accuracy limit must be a positive number of metres",
            ));
        }

        if self.max_location_age == 0 {
            errors.push(ValidationError::new(
                "max_location_age",
                "location age tolerance cannot be zero",
            ));
        }

        if self.event_buffer == 0 {
            errors.push(ValidationError::new(
                "event_buffer",
                "event buffer must hold at least one event",
            ));
        }

        errors.extend(self.storage.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: cyface_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.path",
                "database path cannot be empty",
            ));
        }

        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `flush_interval` or `auth.username`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    /// Create a validation error for `field`.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Read and parse a TOML file.
pub fn load_toml<T, P>(path: P) -> Result<T, ConfigError>
where
    T: serde::de::DeserializeOwned,
    P: AsRef<Path>,
{
    let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
        path: path.as_ref().to_path_buf(),
        source: e,
    })?;
    toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.as_ref().to_path_buf(),
        source: e,
    })
}

/// Serialize a value as TOML and write it, creating parent directories.
pub fn save_toml<T, P>(value: &T, path: P) -> Result<(), ConfigError>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let content = toml::to_string_pretty(value).map_err(ConfigError::Serialize)?;

    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
        path: path.as_ref().to_path_buf(),
        source: e,
    })
}

/// Default capture configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cyface")
        .join("capture.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_default() {
        let config = CaptureConfig::default();
        assert_eq!(config.flush_interval(), Duration::from_secs(30));
        assert_eq!(config.max_location_accuracy, 20.0);
        assert_eq!(config.max_location_age(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("capture.toml");

        let config = CaptureConfig {
            flush_interval: 5,
            storage: StorageConfig {
                path: dir.path().join("data.db"),
            },
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = CaptureConfig::load_validated(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: CaptureConfig = toml::from_str("flush_interval = 10\n").unwrap();
        assert_eq!(config.flush_interval, 10);
        assert_eq!(config.event_buffer, 100);
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = CaptureConfig::load("/nonexistent/capture.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("capture.toml");
        std::fs::write(&path, "flush_interval = \"soon\"").unwrap();

        let result = CaptureConfig::load(&path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let config = CaptureConfig {
            flush_interval: 0,
            max_location_accuracy: -1.0,
            max_location_age: 0,
            event_buffer: 0,
            storage: StorageConfig {
                path: PathBuf::new(),
            },
            ..Default::default()
        };

        let Err(ConfigError::Validation(errors)) = config.validate() else {
            panic!("expected validation errors");
        };
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "flush_interval",
                "max_location_accuracy",
                "max_location_age",
                "event_buffer",
                "storage.path"
            ]
        );
    }

    #[test]
    fn test_flush_interval_upper_bound() {
        let config = CaptureConfig {
            flush_interval: MAX_FLUSH_INTERVAL + 1,
            ..Default::default()
        };
        let error = config.validate().unwrap_err();
        assert!(error.to_string().contains("too long"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("cyface/capture.toml"));
    }
}
