use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::{mlog_debug, Error, Result};

/// Configuration for the orchestration core.
///
/// Loaded from `~/.maestro/maestro.toml`; every field has a default so an
/// absent file yields a working configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Worker pool size per agent runtime.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Whether workflows fail fast by default (submission can override).
    #[serde(default = "default_fail_fast")]
    pub fail_fast: bool,
    /// Base retry delay in milliseconds.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Retry delay multiplier.
    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: f64,
    /// Retry delay cap in milliseconds.
    #[serde(default = "default_retry_cap_ms")]
    pub retry_cap_ms: u64,
    /// Look-back window (in sequence numbers) bounding how far a
    /// high-priority event may jump ahead of the oldest normal event.
    #[serde(default = "default_bus_lookback")]
    pub bus_lookback: u64,
}

fn default_workers() -> usize {
    4
}

fn default_fail_fast() -> bool {
    true
}

fn default_retry_base_ms() -> u64 {
    1_000
}

fn default_retry_multiplier() -> f64 {
    2.0
}

fn default_retry_cap_ms() -> u64 {
    60_000
}

fn default_bus_lookback() -> u64 {
    64
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            fail_fast: default_fail_fast(),
            retry_base_ms: default_retry_base_ms(),
            retry_multiplier: default_retry_multiplier(),
            retry_cap_ms: default_retry_cap_ms(),
            bus_lookback: default_bus_lookback(),
        }
    }
}

impl Config {
    pub fn maestro_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".maestro"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::maestro_dir()?.join("maestro.toml"))
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    pub fn retry_cap(&self) -> Duration {
        Duration::from_millis(self.retry_cap_ms)
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        mlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            mlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        mlog_debug!(
            "Config loaded: workers={}, fail_fast={}, retry_base_ms={}",
            config.workers,
            config.fail_fast,
            config.retry_base_ms
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let dir = Self::maestro_dir()?;
        mlog_debug!("Config::save dir={}", dir.display());
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        mlog_debug!("Config saved to {}", path.display());
        Ok(())
    }
}
