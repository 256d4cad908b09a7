//! TOML-based application configuration.
//!
//! Stores the phase durations and engine tuning at
//! `<data_dir>/config.toml`. Missing keys fall back to defaults, so a
//! hand-edited partial file stays valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::session::SessionConfig;
use crate::timer::EngineConfig;

use super::data_dir;

/// Phase durations, in minutes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurationsConfig {
    #[serde(default = "default_warmup_min")]
    pub warmup_min: u64,
    #[serde(default = "default_focus_min")]
    pub focus_min: u64,
    #[serde(default = "default_break_min")]
    pub break_min: u64,
}

/// Timer engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineTuning {
    /// Target cadence between ticks.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Tick gap beyond which drift is reported.
    #[serde(default = "default_drift_threshold_ms")]
    pub drift_threshold_ms: u64,
}

/// Application configuration.
///
/// Serialized to/from TOML at `<data_dir>/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub durations: DurationsConfig,
    #[serde(default)]
    pub engine: EngineTuning,
}

fn default_warmup_min() -> u64 {
    15
}
fn default_focus_min() -> u64 {
    25
}
fn default_break_min() -> u64 {
    5
}
fn default_tick_interval_ms() -> u64 {
    1_000
}
fn default_drift_threshold_ms() -> u64 {
    5_000
}

impl Default for DurationsConfig {
    fn default() -> Self {
        Self {
            warmup_min: default_warmup_min(),
            focus_min: default_focus_min(),
            break_min: default_break_min(),
        }
    }
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            drift_threshold_ms: default_drift_threshold_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            durations: DurationsConfig::default(),
            engine: EngineTuning::default(),
        }
    }
}

impl Config {
    fn path() -> Result<PathBuf, ConfigError> {
        let dir = data_dir().map_err(|e| ConfigError::LoadFailed {
            path: PathBuf::from("<data dir>"),
            message: e.to_string(),
        })?;
        Ok(dir.join("config.toml"))
    }

    /// Load from disk, writing defaults on first run.
    ///
    /// # Errors
    /// Returns an error if the config file exists but cannot be parsed, or
    /// if the default config cannot be written.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            Err(_) => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
        }
    }

    /// Persist to disk.
    ///
    /// # Errors
    /// Returns an error if the config cannot be serialized or written.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        std::fs::write(path, content).map_err(|e| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Phase durations as a [`SessionConfig`] in milliseconds.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            warmup_ms: self.durations.warmup_min * 60 * 1_000,
            focus_ms: self.durations.focus_min * 60 * 1_000,
            break_ms: self.durations.break_min * 60 * 1_000,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            nominal_interval_ms: self.engine.tick_interval_ms,
            drift_threshold_ms: self.engine.drift_threshold_ms,
        }
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(match current {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Set a config value by dot-separated key and persist.
    ///
    /// The new value must parse as the existing value's type.
    ///
    /// # Errors
    /// Returns an error for unknown keys, unparsable values, or a failed
    /// save.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.apply(key, value)?;
        self.save()
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json =
            serde_json::to_value(&*self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }
}

fn set_json_value_by_path(
    root: &mut serde_json::Value,
    key: &str,
    value: &str,
) -> Result<(), ConfigError> {
    let mut parts = key.split('.').peekable();
    if parts.peek().is_none() {
        return Err(ConfigError::UnknownKey(key.to_string()));
    }

    let mut current = root;
    while let Some(part) = parts.next() {
        let is_leaf = parts.peek().is_none();
        if is_leaf {
            let obj = current
                .as_object_mut()
                .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
            let existing = obj
                .get(part)
                .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;

            let new_value = match existing {
                serde_json::Value::Bool(_) => serde_json::Value::Bool(
                    value.parse::<bool>().map_err(|e| ConfigError::InvalidValue {
                        key: key.to_string(),
                        message: e.to_string(),
                    })?,
                ),
                serde_json::Value::Number(_) => {
                    let n = value.parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                        key: key.to_string(),
                        message: e.to_string(),
                    })?;
                    serde_json::Value::Number(n.into())
                }
                _ => serde_json::Value::String(value.into()),
            };

            obj.insert(part.to_string(), new_value);
            return Ok(());
        }

        current = current
            .get_mut(part)
            .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
    }

    Err(ConfigError::UnknownKey(key.to_string()))
}
