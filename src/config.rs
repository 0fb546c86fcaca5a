//! Engine configuration persistence, modeled on `config.rs`'s
//! `ConfigManager`: a serde-derived settings struct, a platform config
//! directory resolved via `dirs`, and a load path that falls back to
//! defaults (and tries to write them back out) rather than failing outright
//! on a missing or corrupt file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: usize,
    pub buffer_frames: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            buffer_frames: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecorderConfig {
    pub enabled: bool,
    pub bits_per_sample: u16,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bits_per_sample: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MixerConfig {
    pub default_master_volume: f32,
    pub auto_drift_correction: bool,
    pub default_sync_tolerance_frames: u64,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            default_master_volume: 1.0,
            auto_drift_correction: true,
            default_sync_tolerance_frames: crate::sync_group::DEFAULT_DRIFT_TOLERANCE_FRAMES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EngineConfig {
    pub audio: AudioConfig,
    pub recorder: RecorderConfig,
    pub mixer: MixerConfig,
    pub max_sources: usize,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(EngineError::Configuration("sample_rate must be > 0".into()));
        }
        if self.audio.channels == 0 {
            return Err(EngineError::Configuration("channels must be > 0".into()));
        }
        if self.audio.buffer_frames == 0 {
            return Err(EngineError::Configuration(
                "buffer_frames must be > 0".into(),
            ));
        }
        if self.max_sources > crate::mixer::MAX_SOURCES {
            return Err(EngineError::Configuration(format!(
                "max_sources {} exceeds the mixer's hard cap of {}",
                self.max_sources,
                crate::mixer::MAX_SOURCES
            )));
        }
        if !(0.0..=1.0).contains(&self.mixer.default_master_volume) {
            return Err(EngineError::Configuration(
                "mixer.default_master_volume must be within [0.0, 1.0]".into(),
            ));
        }
        Ok(())
    }
}

/// Reads and writes `EngineConfig` from the platform's standard config
/// directory (`$XDG_CONFIG_HOME/strata-engine/config.toml` on Linux, and
/// platform equivalents elsewhere, resolved by `dirs::config_dir`).
pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self> {
        let base = dirs::config_dir()
            .ok_or_else(|| EngineError::Configuration("no platform config directory".into()))?;
        Ok(Self {
            path: base.join("strata-engine").join("config.toml"),
        })
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the config, falling back to (and attempting to persist)
    /// `EngineConfig::default()` if the file is missing or fails to parse.
    pub fn load_or_create_default(&self) -> EngineConfig {
        match fs::read_to_string(&self.path) {
            Ok(contents) => match toml::from_str::<EngineConfig>(&contents) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!(
                        "config at {:?} failed to parse ({e}); falling back to defaults",
                        self.path
                    );
                    let defaults = EngineConfig::default();
                    let _ = self.save(&defaults);
                    defaults
                }
            },
            Err(_) => {
                let defaults = EngineConfig::default();
                let _ = self.save(&defaults);
                defaults
            }
        }
    }

    pub fn save(&self, config: &EngineConfig) -> Result<()> {
        self.save_inner(config).map_err(EngineError::from)
    }

    fn save_inner(&self, config: &EngineConfig) -> anyhow::Result<()> {
        let serialized =
            toml::to_string_pretty(config).context("failed to serialize configuration")?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("failed to create config directory")?;
        }
        fs::write(&self.path, serialized).context("failed to write configuration file")?;
        log::info!("configuration saved to {:?}", self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("strata-engine-config-{}.toml", uuid::Uuid::new_v4()))
    }

    #[test]
    fn defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_sample_rate() {
        let mut config = EngineConfig::default();
        config.audio.sample_rate = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_max_sources_above_mixer_cap() {
        let mut config = EngineConfig::default();
        config.max_sources = crate::mixer::MAX_SOURCES + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn save_then_load_round_trips() {
        let path = temp_path();
        let manager = ConfigManager::with_path(&path);
        let mut config = EngineConfig::default();
        config.audio.sample_rate = 44_100;
        manager.save(&config).unwrap();

        let loaded = manager.load_or_create_default();
        assert_eq!(loaded.audio.sample_rate, 44_100);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_file_falls_back_to_defaults_and_writes_them() {
        let path = temp_path();
        let manager = ConfigManager::with_path(&path);
        let loaded = manager.load_or_create_default();
        assert_eq!(loaded, EngineConfig::default());
        assert!(path.exists());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let path = temp_path();
        fs::write(&path, "not valid toml {{{").unwrap();
        let manager = ConfigManager::with_path(&path);
        let loaded = manager.load_or_create_default();
        assert_eq!(loaded, EngineConfig::default());
        let _ = fs::remove_file(&path);
    }
}
