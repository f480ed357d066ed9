//! Backup storage for WatchPup
//!
//! A backup root holds one directory per backup event, named by a fixed-width
//! local timestamp, next to a permanent `FINAL` archive and its JSON log:
//!
//! ```text
//! <root>/2024-05-01-12-00-00/report.txt
//! <root>/FINAL/...
//! <root>/final_info.json
//! ```
//!
//! FINAL has two regions. Its root mirrors watch-folder relative paths and is
//! written by direct-to-final backups and by on-demand merges. Top-level
//! sub-folders named like snapshots hold rotation history, written when the
//! retention limit prunes a snapshot.

pub mod final_log;
pub mod manager;
pub mod snapshot;

pub use final_log::{FinalLog, FinalLogEntry};
pub use manager::{BackupManager, MergeReport, FINAL_DIR_NAME, FINAL_LOG_NAME};
