//! Configuration for the regeneration pipeline.
//!
//! Layered configuration with the usual precedence:
//! - Default values
//! - TOML configuration file (`.thermowatch/settings.toml`)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `TW_` and use double underscores
//! to separate nested levels:
//! - `TW_OUTPUT_ROOT=/data/out` sets `output_root`
//! - `TW_WATCH__DEBOUNCE_MS=250` sets `watch.debounce_ms`
//! - `TW_WATCH__WORKERS=4` sets `watch.workers`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Root directory for all derived artifacts (`json/`, `labeled/`,
    /// `filtered/`, `masks/` live beneath it)
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,

    /// Watch and regeneration behavior
    #[serde(default)]
    pub watch: WatchConfig,

    /// Logging levels
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatchConfig {
    /// Quiet period before a changed record is considered settled
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Maximum number of regenerations running at once
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Delete derived artifacts when their record is deleted
    #[serde(default = "default_false")]
    pub remove_stale_artifacts: bool,

    /// Republish the record with recomputed derived fields after a
    /// successful regeneration (skipped when the on-disk bytes already
    /// match, so an enabled rewrite converges instead of looping)
    #[serde(default = "default_false")]
    pub rewrite_records: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level for all modules
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module level overrides
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_output_root() -> PathBuf {
    PathBuf::from("output_image")
}
fn default_debounce_ms() -> u64 {
    500
}
fn default_workers() -> usize {
    num_cpus::get()
}
fn default_false() -> bool {
    false
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            output_root: default_output_root(),
            watch: WatchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            workers: default_workers(),
            remove_stale_artifacts: false,
            rewrite_records: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(".thermowatch/settings.toml"));

        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            // Double underscore separates nested levels; single underscore
            // remains part of the field name.
            .merge(Env::prefixed("TW_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("TW_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Find the workspace config by looking for a `.thermowatch` directory,
    /// searching from the current directory up to the filesystem root.
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(".thermowatch");
            if config_dir.is_dir() {
                return Some(config_dir.join("settings.toml"));
            }
        }

        None
    }

    /// Save current configuration to file, creating parent directories.
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("invalid config path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.output_root, PathBuf::from("output_image"));
        assert_eq!(settings.watch.debounce_ms, 500);
        assert!(settings.watch.workers >= 1);
        assert!(!settings.watch.remove_stale_artifacts);
        assert!(!settings.watch.rewrite_records);
    }

    #[test]
    fn load_from_toml_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            r#"
output_root = "/data/thermal"

[watch]
debounce_ms = 250
remove_stale_artifacts = true
"#,
        )
        .unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.output_root, PathBuf::from("/data/thermal"));
        assert_eq!(settings.watch.debounce_ms, 250);
        assert!(settings.watch.remove_stale_artifacts);
        // untouched fields keep defaults
        assert!(!settings.watch.rewrite_records);
    }

    #[test]
    fn save_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("settings.toml");

        let mut settings = Settings::default();
        settings.watch.debounce_ms = 750;
        settings.save(&path).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded.watch.debounce_ms, 750);
    }
}
