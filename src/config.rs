//! Configuration management for WatchPup
//!
//! A [`WatchConfig`] is built once by the controller (from a file, the
//! environment and command-line flags), validated, and then handed to the
//! watcher, which never mutates it.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use crate::core::PatternMatcher;

/// Settings for one watch session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Directory tree to scan
    #[serde(default)]
    pub watch_folder: PathBuf,
    /// Root holding snapshots, FINAL and the FINAL log
    #[serde(default)]
    pub backup_folder: PathBuf,
    /// Seconds between full scans
    #[serde(default = "default_interval_seconds", alias = "interval")]
    pub interval_seconds: u64,
    /// Snapshots to keep before rotating the oldest into FINAL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_versions: Option<usize>,
    /// Regexes searched in file names; empty matches every file
    #[serde(default, alias = "patterns")]
    pub filename_patterns: Vec<String>,
    /// Use FINAL instead of the latest snapshot as the starting baseline
    #[serde(default)]
    pub use_final_as_initial: bool,
    /// Back up files that appear while the session is running
    #[serde(default)]
    pub watch_new_files: bool,
}

fn default_interval_seconds() -> u64 {
    60
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            watch_folder: PathBuf::new(),
            backup_folder: PathBuf::new(),
            interval_seconds: default_interval_seconds(),
            max_versions: None,
            filename_patterns: Vec::new(),
            use_final_as_initial: false,
            watch_new_files: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileFormat {
    Toml,
    Json,
}

impl FileFormat {
    fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => FileFormat::Toml,
            _ => FileFormat::Json,
        }
    }
}

impl WatchConfig {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(watch_folder: P, backup_folder: Q) -> Self {
        Self {
            watch_folder: watch_folder.as_ref().to_path_buf(),
            backup_folder: backup_folder.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Get scan interval duration
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    /// Load from a `.toml` file, or JSON for any other extension.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: WatchConfig = match FileFormat::for_path(path) {
            FileFormat::Toml => toml::from_str(&raw)
                .with_context(|| format!("Invalid TOML config {}", path.display()))?,
            FileFormat::Json => serde_json::from_str(&raw)
                .with_context(|| format!("Invalid JSON config {}", path.display()))?,
        };
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let raw = match FileFormat::for_path(path) {
            FileFormat::Toml => toml::to_string_pretty(self).context("Failed to encode config as TOML")?,
            FileFormat::Json => serde_json::to_string_pretty(self).context("Failed to encode config as JSON")?,
        };
        fs::write(path, raw).with_context(|| format!("Failed to write config file {}", path.display()))
    }

    /// Override with environment variables if present
    pub fn apply_env(&mut self) {
        if let Ok(val) = std::env::var("WATCHPUP_INTERVAL_SECONDS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.interval_seconds = secs;
            }
        }

        if let Ok(val) = std::env::var("WATCHPUP_MAX_VERSIONS") {
            if let Ok(max) = val.parse::<usize>() {
                self.max_versions = Some(max);
            }
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.watch_folder.as_os_str().is_empty() {
            bail!("watch_folder must be set");
        }

        if self.backup_folder.as_os_str().is_empty() {
            bail!("backup_folder must be set");
        }

        if !self.watch_folder.is_dir() {
            bail!("watch_folder is not a directory: {}", self.watch_folder.display());
        }

        if self.interval_seconds == 0 {
            bail!("interval_seconds must be greater than 0");
        }

        if self.max_versions == Some(0) {
            bail!("max_versions must be greater than 0");
        }

        PatternMatcher::new(&self.filename_patterns[..])?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = WatchConfig::default();

        assert_eq!(config.interval_seconds, 60);
        assert_eq!(config.interval(), Duration::from_secs(60));
        assert!(config.max_versions.is_none());
        assert!(!config.use_final_as_initial);
        assert!(!config.watch_new_files);
    }

    #[test]
    fn test_config_validation() {
        let dir = TempDir::new().unwrap();
        let mut config = WatchConfig::new(dir.path(), dir.path().join("backups"));
        assert!(config.validate().is_ok());

        config.interval_seconds = 0;
        assert!(config.validate().is_err());

        config.interval_seconds = 5;
        config.max_versions = Some(0);
        assert!(config.validate().is_err());

        config.max_versions = Some(2);
        config.filename_patterns = vec!["[".to_string()];
        assert!(config.validate().is_err());

        config.filename_patterns.clear();
        config.backup_folder = PathBuf::new();
        assert!(config.validate().is_err());

        config.backup_folder = dir.path().join("backups");
        config.watch_folder = dir.path().join("missing");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_legacy_json_keys() {
        let raw = r#"{
            "watch_folder": "/data/in",
            "backup_folder": "/data/out",
            "interval": 15,
            "max_versions": 5,
            "patterns": ["\\.txt$"],
            "use_final_as_initial": true
        }"#;
        let config: WatchConfig = serde_json::from_str(raw).unwrap();

        assert_eq!(config.interval_seconds, 15);
        assert_eq!(config.max_versions, Some(5));
        assert_eq!(config.filename_patterns, vec![r"\.txt$".to_string()]);
        assert!(config.use_final_as_initial);
        assert!(!config.watch_new_files);
    }

    #[test]
    fn test_save_and_load_both_formats() {
        let dir = TempDir::new().unwrap();
        let mut config = WatchConfig::new("/watch", "/backup");
        config.max_versions = Some(3);
        config.filename_patterns = vec![r"\.csv$".to_string()];
        config.watch_new_files = true;

        for name in ["watchpup.toml", "watchpup.json"] {
            let path = dir.path().join(name);
            config.save(&path).unwrap();
            assert_eq!(WatchConfig::load(&path).unwrap(), config);
        }
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "interval_seconds = \"soon\"").unwrap();
        assert!(WatchConfig::load(&path).is_err());
        assert!(WatchConfig::load(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_env_config_loading() {
        std::env::set_var("WATCHPUP_INTERVAL_SECONDS", "7");
        std::env::set_var("WATCHPUP_MAX_VERSIONS", "9");

        let mut config = WatchConfig::default();
        config.apply_env();

        assert_eq!(config.interval_seconds, 7);
        assert_eq!(config.max_versions, Some(9));

        // Cleanup
        std::env::remove_var("WATCHPUP_INTERVAL_SECONDS");
        std::env::remove_var("WATCHPUP_MAX_VERSIONS");
    }
}
