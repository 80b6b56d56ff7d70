//! Application paths and the JSON settings file.
//!
//! Settings live in `animplay.json` inside the config directory. A missing
//! file means defaults; a malformed one is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::core::cache_man::CacheConfig;

pub const CONFIG_FILE: &str = "animplay.json";
pub const LOG_FILE: &str = "animplay.log";

const APP_DIR: &str = "animplay";
const CONFIG_DIR_ENV: &str = "ANIMPLAY_CONFIG_DIR";

/// Configuration for overriding default application paths
#[derive(Debug, Clone)]
pub struct PathConfig {
    /// Custom config directory (from CLI or ENV)
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// Priority: CLI args → ENV var (ANIMPLAY_CONFIG_DIR) → None (use defaults)
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| std::env::var(CONFIG_DIR_ENV).ok().map(PathBuf::from));
        Self { config_dir }
    }
}

/// Get path to a configuration file
///
/// Priority:
/// 1. CLI --config-dir argument
/// 2. ANIMPLAY_CONFIG_DIR environment variable
/// 3. Local folder IF animplay.json or animplay.log exist there
/// 4. Platform-specific config directory from dirs-next (default)
pub fn config_file(name: &str, config: &PathConfig) -> PathBuf {
    resolve_dir(config, dirs_next::config_dir()).join(name)
}

/// Get path to a data file (logs). Same priority as `config_file`, with
/// the platform data directory as the default.
pub fn data_file(name: &str, config: &PathConfig) -> PathBuf {
    resolve_dir(config, dirs_next::data_dir()).join(name)
}

/// Ensure that configuration and data directories exist
pub fn ensure_dirs(config: &PathConfig) -> Result<()> {
    let config_dir = resolve_dir(config, dirs_next::config_dir());
    let data_dir = resolve_dir(config, dirs_next::data_dir());

    for dir in [&config_dir, &data_dir] {
        if !dir.exists() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
    }
    Ok(())
}

fn has_local_config_files(dir: &Path) -> bool {
    [CONFIG_FILE, LOG_FILE].iter().any(|f| dir.join(f).exists())
}

fn resolve_dir(config: &PathConfig, platform_dir: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = &config.config_dir {
        return dir.clone();
    }
    if let Ok(current_dir) = std::env::current_dir()
        && has_local_config_files(&current_dir)
    {
        return current_dir;
    }
    platform_dir
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// System memory polling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PressureConfig {
    pub enabled: bool,
    /// Fire a pressure event when available memory drops below this
    pub threshold_mb: u64,
    pub poll_interval_ms: u64,
}

impl Default for PressureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_mb: 256,
            poll_interval_ms: 500,
        }
    }
}

impl PressureConfig {
    pub fn threshold_bytes(&self) -> u64 {
        self.threshold_mb.saturating_mul(1024 * 1024)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Contents of `animplay.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cache: CacheConfig,
    /// Refresh clock rate for the headless runner
    pub fps: f64,
    pub pressure: PressureConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            fps: 60.0,
            pressure: PressureConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from `path`; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load `animplay.json` from the resolved config directory
    pub fn load_from(paths: &PathConfig) -> Result<Self> {
        Self::load(&config_file(CONFIG_FILE, paths))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        debug!("Saved config to {}", path.display());
        Ok(())
    }

    /// Wall time between refresh ticks
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.clamp(1.0, 1000.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("animplay_test_{}_{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_config_file_with_custom_dir() {
        let config = PathConfig {
            config_dir: Some(PathBuf::from("/custom")),
        };
        assert_eq!(config_file("test.json", &config), PathBuf::from("/custom/test.json"));
        assert_eq!(data_file(LOG_FILE, &config), PathBuf::from("/custom/animplay.log"));
    }

    #[test]
    fn test_cli_dir_wins() {
        let config = PathConfig::from_env_and_cli(Some(PathBuf::from("/from-cli")));
        assert_eq!(config.config_dir, Some(PathBuf::from("/from-cli")));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = temp_dir("missing");
        let config = AppConfig::load(&dir.join(CONFIG_FILE)).unwrap();
        assert_eq!(config, AppConfig::default());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = temp_dir("partial");
        std::fs::write(
            dir.join(CONFIG_FILE),
            r#"{ "fps": 30.0, "cache": { "budget_cap": 3, "pressure_cooldown_ms": 500 } }"#,
        )
        .unwrap();
        let paths = PathConfig {
            config_dir: Some(dir.clone()),
        };

        let config = AppConfig::load_from(&paths).unwrap();
        assert_eq!(config.fps, 30.0);
        assert_eq!(config.cache.budget_cap, 3);
        assert_eq!(config.cache.pressure_cooldown_ms, 500);
        assert_eq!(config.cache.default_budget, 5);
        assert_eq!(config.pressure, PressureConfig::default());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = temp_dir("save");
        let path = dir.join(CONFIG_FILE);
        let mut config = AppConfig::default();
        config.pressure.enabled = false;
        config.cache.low_memory_budget = 2;
        config.save(&path).unwrap();

        assert_eq!(AppConfig::load(&path).unwrap(), config);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = temp_dir("malformed");
        let path = dir.join(CONFIG_FILE);
        std::fs::write(&path, "{ not json").unwrap();
        let err = AppConfig::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_tick_interval() {
        let config = AppConfig {
            fps: 50.0,
            ..AppConfig::default()
        };
        assert_eq!(config.tick_interval(), Duration::from_millis(20));
    }
}
