use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::SystemTime;
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Timestamp format stored in the FINAL log.
pub const LOG_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalLogEntry {
    /// Modification time of the preserved source, local time.
    pub timestamp: String,
    #[serde(rename = "md5")]
    pub digest: String,
}

impl FinalLogEntry {
    pub fn new(modified: SystemTime, digest: String) -> Self {
        Self {
            timestamp: format_log_time(modified),
            digest,
        }
    }
}

/// Integrity index of FINAL: FINAL-relative path -> timestamp and digest.
///
/// The whole map is read, modified and written back on every update. Edits
/// made to the file by another process between load and save are lost.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FinalLog {
    entries: BTreeMap<String, FinalLogEntry>,
}

impl FinalLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Missing or unparsable files read as an empty log.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }
        match Self::try_load(path) {
            Ok(log) => log,
            Err(err) => {
                tracing::warn!("Error loading final log JSON: {:#}", err);
                Self::default()
            }
        }
    }

    fn try_load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("Corrupt final log {}", path.display()))
    }

    /// Overwrite `path` with the full log, four-space indented.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser).context("Failed to serialize final log")?;
        fs::write(path, buf).with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn insert(&mut self, key: impl Into<String>, entry: FinalLogEntry) {
        self.entries.insert(key.into(), entry);
    }

    pub fn get(&self, key: &str) -> Option<&FinalLogEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FinalLogEntry)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }
}

pub fn format_log_time(time: SystemTime) -> String {
    DateTime::<Local>::from(time).format(LOG_TIME_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_log_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(FinalLog::load(dir.path().join("final_info.json")).is_empty());
    }

    #[test]
    fn test_corrupt_log_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("final_info.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(FinalLog::load(&path).is_empty());

        fs::write(&path, "[1, 2, 3]").unwrap();
        assert!(FinalLog::load(&path).is_empty());
    }

    #[test]
    fn test_save_then_load_keeps_wire_names() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("final_info.json");

        let mut log = FinalLog::new();
        log.insert(
            "2024-01-01-00-00-00/a.txt",
            FinalLogEntry {
                timestamp: "2024-01-01 00:00:00".to_string(),
                digest: "900150983cd24fb0d6963f7d28e17f72".to_string(),
            },
        );
        log.save(&path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"md5\": \"900150983cd24fb0d6963f7d28e17f72\""));
        assert!(raw.contains("\n    \"2024-01-01-00-00-00/a.txt\""));

        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["2024-01-01-00-00-00/a.txt"]["timestamp"], "2024-01-01 00:00:00");

        assert_eq!(FinalLog::load(&path), log);
    }

    #[test]
    fn test_log_time_format() {
        let stamp = format_log_time(SystemTime::now());
        assert_eq!(stamp.len(), 19);
        assert!(chrono::NaiveDateTime::parse_from_str(&stamp, LOG_TIME_FORMAT).is_ok());
    }
}
