use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Settings;

/// Configuration manager for Marquee settings
/// Provides a layered configuration system that separates schema, available options, and persisted
/// values. Configuration is stored in config.json in the working directory by default
pub struct ConfigManager {
    config_path: PathBuf,
    settings: Settings,
}

/// Available configuration options with validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSchema {
    pub timing: TimingConfigSchema,
    pub feed: FeedConfigSchema,
    pub display: DisplayConfigSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfigSchema {
    pub tick_interval_ms: ConfigOption<u64>,
    pub write_timeout_ms: ConfigOption<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfigSchema {
    pub reconnect_initial_backoff_ms: ConfigOption<u64>,
    pub reconnect_max_backoff_ms: ConfigOption<u64>,
    pub max_reconnect_attempts: ConfigOption<u32>,
    pub feed_buffer: ConfigOption<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfigSchema {
    pub break_label_suffix: ConfigOption<String>,
}

/// Configuration option with validation and available choices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigOption<T> {
    pub default: T,
    pub valid_range: Option<(T, T)>,
    pub valid_choices: Option<Vec<T>>,
    pub description: String,
    pub requires_restart: bool,
}

/// Persisted configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    pub settings: Settings,
    pub created_at: String,
    pub modified_at: String,
}

impl ConfigManager {
    /// Create a new configuration manager
    /// If no path is provided, defaults to 'config.json' in the current working directory
    pub fn new(config_path: Option<PathBuf>) -> Self {
        let config_path = config_path.unwrap_or_else(|| PathBuf::from("config.json"));

        Self {
            config_path,
            settings: Settings::default(),
        }
    }

    /// Load settings from configuration file
    /// Writes a default file when none exists yet
    pub fn load(&mut self) -> Result<Settings, ConfigError> {
        if !self.config_path.exists() {
            self.save()?;
            return Ok(self.settings.clone());
        }

        let content = fs::read_to_string(&self.config_path)
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        let config_file: ConfigFile =
            serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if config_file.version != env!("CARGO_PKG_VERSION") {
            log::warn!(
                "Config file version {} doesn't match application version {}. Using defaults for new settings.",
                config_file.version,
                env!("CARGO_PKG_VERSION")
            );
        }

        Self::validate_settings(&config_file.settings).map_err(ConfigError::ValidationError)?;

        self.settings = config_file.settings;
        Ok(self.settings.clone())
    }

    /// Save current settings to configuration file
    pub fn save(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            if parent != Path::new("") && parent != Path::new(".") {
                fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError(e.to_string()))?;
            }
        }

        let now = chrono::Utc::now().to_rfc3339();
        let config_file = ConfigFile {
            version: env!("CARGO_PKG_VERSION").to_string(),
            settings: self.settings.clone(),
            created_at: now.clone(),
            modified_at: now,
        };

        let content = serde_json::to_string_pretty(&config_file)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(&self.config_path, content)
            .map_err(|e| ConfigError::WriteError(e.to_string()))?;

        Ok(())
    }

    /// Validate, update settings and save to file
    pub fn update_settings(&mut self, settings: Settings) -> Result<(), ConfigError> {
        Self::validate_settings(&settings).map_err(ConfigError::ValidationError)?;
        self.settings = settings;
        self.save()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Get configuration schema with available options
    pub fn schema() -> ConfigSchema {
        ConfigSchema {
            timing: TimingConfigSchema {
                tick_interval_ms: ConfigOption {
                    default: 1000,
                    valid_range: Some((100, 5000)),
                    valid_choices: None,
                    description: "Countdown refresh interval in milliseconds".to_string(),
                    requires_restart: false,
                },
                write_timeout_ms: ConfigOption {
                    default: 5000,
                    valid_range: Some((100, 60_000)),
                    valid_choices: None,
                    description: "How long a console write may take before it is reverted"
                        .to_string(),
                    requires_restart: false,
                },
            },
            feed: FeedConfigSchema {
                reconnect_initial_backoff_ms: ConfigOption {
                    default: 250,
                    valid_range: Some((10, 10_000)),
                    valid_choices: None,
                    description: "Delay before the first resubscription attempt".to_string(),
                    requires_restart: false,
                },
                reconnect_max_backoff_ms: ConfigOption {
                    default: 8000,
                    valid_range: Some((100, 120_000)),
                    valid_choices: None,
                    description: "Upper bound for the resubscription delay".to_string(),
                    requires_restart: false,
                },
                max_reconnect_attempts: ConfigOption {
                    default: 5,
                    valid_range: Some((1, 100)),
                    valid_choices: None,
                    description: "Failed resubscriptions before showing the disconnected indicator"
                        .to_string(),
                    requires_restart: false,
                },
                feed_buffer: ConfigOption {
                    default: 256,
                    valid_range: Some((16, 65_536)),
                    valid_choices: None,
                    description: "Change feed events buffered per subscriber".to_string(),
                    requires_restart: true,
                },
            },
            display: DisplayConfigSchema {
                break_label_suffix: ConfigOption {
                    default: "分".to_string(),
                    valid_range: None,
                    valid_choices: None,
                    description: "Suffix appended to break lengths, e.g. 15分".to_string(),
                    requires_restart: false,
                },
            },
        }
    }

    /// Validate settings against schema
    pub fn validate_settings(settings: &Settings) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let schema = Self::schema();

        check_range(
            &mut errors,
            "tick_interval_ms",
            settings.tick_interval_ms,
            schema.timing.tick_interval_ms.valid_range,
        );
        check_range(
            &mut errors,
            "write_timeout_ms",
            settings.write_timeout_ms,
            schema.timing.write_timeout_ms.valid_range,
        );
        check_range(
            &mut errors,
            "reconnect_initial_backoff_ms",
            settings.reconnect_initial_backoff_ms,
            schema.feed.reconnect_initial_backoff_ms.valid_range,
        );
        check_range(
            &mut errors,
            "reconnect_max_backoff_ms",
            settings.reconnect_max_backoff_ms,
            schema.feed.reconnect_max_backoff_ms.valid_range,
        );
        check_range(
            &mut errors,
            "max_reconnect_attempts",
            settings.max_reconnect_attempts,
            schema.feed.max_reconnect_attempts.valid_range,
        );
        check_range(
            &mut errors,
            "feed_buffer",
            settings.feed_buffer,
            schema.feed.feed_buffer.valid_range,
        );

        if settings.reconnect_max_backoff_ms < settings.reconnect_initial_backoff_ms {
            errors.push(
                "reconnect_max_backoff_ms must not be less than reconnect_initial_backoff_ms"
                    .to_string(),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Reset settings to defaults
    pub fn reset_to_defaults(&mut self) -> Result<(), ConfigError> {
        self.settings = Settings::default();
        self.save()
    }
}

fn check_range<T>(errors: &mut Vec<String>, name: &str, value: T, range: Option<(T, T)>)
where
    T: PartialOrd + std::fmt::Display,
{
    if let Some((min, max)) = range {
        if value < min || value > max {
            errors.push(format!("{} must be between {} and {}", name, min, max));
        }
    }
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    ReadError(String),
    WriteError(String),
    ParseError(String),
    SerializeError(String),
    ValidationError(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(msg) => write!(f, "Failed to read config file: {}", msg),
            ConfigError::WriteError(msg) => write!(f, "Failed to write config file: {}", msg),
            ConfigError::ParseError(msg) => write!(f, "Failed to parse config file: {}", msg),
            ConfigError::SerializeError(msg) => write!(f, "Failed to serialize config: {}", msg),
            ConfigError::ValidationError(errors) => {
                write!(f, "Config validation errors: {}", errors.join(", "))
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_config_manager_new() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test_config.json");

        let manager = ConfigManager::new(Some(config_path.clone()));
        assert_eq!(manager.config_path(), config_path);
        assert_eq!(manager.settings(), &Settings::default());
    }

    #[test]
    fn test_load_creates_default_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.json");

        let mut manager = ConfigManager::new(Some(config_path.clone()));
        let settings = manager.load().unwrap();

        assert_eq!(settings, Settings::default());
        assert!(config_path.exists());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test_config.json");

        let mut manager = ConfigManager::new(Some(config_path.clone()));

        let mut settings = Settings::default();
        settings.tick_interval_ms = 500;
        settings.break_label_suffix = " min".to_string();
        manager.update_settings(settings).unwrap();

        let mut manager2 = ConfigManager::new(Some(config_path));
        let loaded_settings = manager2.load().unwrap();

        assert_eq!(loaded_settings.tick_interval_ms, 500);
        assert_eq!(loaded_settings.break_label_suffix, " min");
    }

    #[test]
    fn test_validation() {
        let mut settings = Settings::default();
        assert!(ConfigManager::validate_settings(&settings).is_ok());

        settings.tick_interval_ms = 10;
        assert!(ConfigManager::validate_settings(&settings).is_err());

        settings.tick_interval_ms = 1000;
        settings.reconnect_initial_backoff_ms = 5000;
        settings.reconnect_max_backoff_ms = 1000;
        let errors = ConfigManager::validate_settings(&settings).unwrap_err();
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_update_rejects_invalid_settings() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = ConfigManager::new(Some(temp_dir.path().join("config.json")));

        let mut settings = Settings::default();
        settings.feed_buffer = 1;
        assert!(matches!(
            manager.update_settings(settings),
            Err(ConfigError::ValidationError(_))
        ));
        assert_eq!(manager.settings(), &Settings::default());
    }

    #[test]
    fn test_schema_defaults_match_settings() {
        let schema = ConfigManager::schema();
        let defaults = Settings::default();

        assert_eq!(schema.timing.tick_interval_ms.default, defaults.tick_interval_ms);
        assert_eq!(schema.timing.write_timeout_ms.default, defaults.write_timeout_ms);
        assert_eq!(
            schema.feed.max_reconnect_attempts.default,
            defaults.max_reconnect_attempts
        );
        assert_eq!(schema.display.break_label_suffix.default, defaults.break_label_suffix);
    }
}
