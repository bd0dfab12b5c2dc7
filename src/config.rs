use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::BivaError;
use crate::logging::LogConfig;
use crate::metrics::EngineConfig;
use crate::trend::TrendConfig;

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Configuration format version
    pub version: String,

    /// Physiological clamp limits for the metrics engine
    pub engine: EngineConfig,

    /// Asymmetry and trend thresholds
    pub trend: TrendConfig,

    /// Visit history location
    pub history: HistorySettings,

    /// Logging output
    pub logging: LogConfig,
}

/// Visit history settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    /// CSV file holding archived visits
    pub archive_path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            version: "1.0".to_string(),
            engine: EngineConfig::default(),
            trend: TrendConfig::default(),
            history: HistorySettings::default(),
            logging: LogConfig::default(),
        }
    }
}

impl Default for HistorySettings {
    fn default() -> Self {
        HistorySettings {
            archive_path: AppConfig::config_dir().join("visits.csv"),
        }
    }
}

impl AppConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml_content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize configuration to TOML")?;

        fs::write(&path, toml_content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Directory holding the config file and default archive
    pub fn config_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".biva")
    }

    /// Get default configuration file path
    pub fn default_config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load configuration with fallback to defaults
    pub fn load_or_default() -> Self {
        let config_path = Self::default_config_path();

        match Self::load_from_file(&config_path) {
            Ok(config) => config,
            Err(err) => {
                tracing::debug!(
                    path = %config_path.display(),
                    error = %err,
                    "Config file not loaded, using defaults"
                );
                Self::default()
            }
        }
    }

    /// Reject thresholds that would make the clamps or flags meaningless
    pub fn validate(&self) -> std::result::Result<(), BivaError> {
        let engine = &self.engine;
        let fractions = [
            ("engine.ecw_min_fraction", engine.ecw_min_fraction),
            ("engine.ecw_low_reset_fraction", engine.ecw_low_reset_fraction),
            ("engine.ecw_max_fraction", engine.ecw_max_fraction),
            ("engine.ecw_high_reset_fraction", engine.ecw_high_reset_fraction),
            ("engine.ffm_max_weight_fraction", engine.ffm_max_weight_fraction),
        ];
        for (name, value) in fractions {
            if !(0.0..=1.0).contains(&value) {
                return Err(BivaError::Configuration(format!(
                    "{} must be between 0 and 1, got {}",
                    name, value
                )));
            }
        }

        // Each reset must land inside the band, or the opposite clamp fires next
        let ordering = [
            ("ecw_min_fraction", engine.ecw_min_fraction, "ecw_low_reset_fraction", engine.ecw_low_reset_fraction),
            ("ecw_low_reset_fraction", engine.ecw_low_reset_fraction, "ecw_max_fraction", engine.ecw_max_fraction),
            ("ecw_min_fraction", engine.ecw_min_fraction, "ecw_high_reset_fraction", engine.ecw_high_reset_fraction),
            ("ecw_high_reset_fraction", engine.ecw_high_reset_fraction, "ecw_max_fraction", engine.ecw_max_fraction),
        ];
        for (lower_name, lower, upper_name, upper) in ordering {
            if lower > upper {
                return Err(BivaError::Configuration(format!(
                    "engine.{} ({}) exceeds engine.{} ({})",
                    lower_name, lower, upper_name, upper
                )));
            }
        }

        if self.trend.asymmetry_threshold_percent < 0.0
            || self.trend.evident_asymmetry_degrees < 0.0
            || self.trend.stable_tolerance < 0.0
        {
            return Err(BivaError::Configuration(
                "trend thresholds must be non-negative".to_string(),
            ));
        }

        Ok(())
    }
}
