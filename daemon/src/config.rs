//! Configuration management (TOML)

use crate::collector::Pid;
use crate::detector::{validate_threshold, DEFAULT_THRESHOLD_MB_PER_MIN, DEFAULT_WINDOW_SAMPLES};
use crate::error::ConfigError;
use crate::history::DEFAULT_CAPACITY;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// PIDs to start tracking when the daemon comes up.
    #[serde(default)]
    pub track: Vec<Pid>,
    pub general: GeneralConfig,
    pub leak: LeakConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub sample_interval_ms: u64,
    pub history_capacity: usize,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeakConfig {
    pub threshold_mb_per_min: f64,
    #[serde(default = "default_window_samples")]
    pub window_samples: usize,
}

fn default_event_buffer() -> usize {
    256
}

fn default_window_samples() -> usize {
    DEFAULT_WINDOW_SAMPLES
}

impl Default for Config {
    fn default() -> Self {
        Config {
            track: vec![],
            general: GeneralConfig {
                sample_interval_ms: 1000,
                history_capacity: DEFAULT_CAPACITY,
                event_buffer: default_event_buffer(),
            },
            leak: LeakConfig {
                threshold_mb_per_min: DEFAULT_THRESHOLD_MB_PER_MIN,
                window_samples: DEFAULT_WINDOW_SAMPLES,
            },
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        directories::ProjectDirs::from("", "", "leakwatch")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if self.general.sample_interval_ms == 0 {
            return invalid("general.sample_interval_ms must be greater than 0".into());
        }
        if self.general.history_capacity == 0 {
            return invalid("general.history_capacity must be greater than 0".into());
        }
        if self.general.event_buffer == 0 {
            return invalid("general.event_buffer must be greater than 0".into());
        }
        if self.leak.window_samples < 2 {
            return invalid("leak.window_samples must be at least 2".into());
        }
        if self.leak.window_samples > self.general.history_capacity {
            return invalid(format!(
                "leak.window_samples ({}) exceeds general.history_capacity ({})",
                self.leak.window_samples, self.general.history_capacity
            ));
        }
        validate_threshold(self.leak.threshold_mb_per_min)
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.general.sample_interval_ms)
    }
}
