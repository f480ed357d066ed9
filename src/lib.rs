//! WatchPup: a polling folder watcher that keeps versioned backups.
//!
//! A [`Watcher`] scans a directory tree on a fixed interval, decides by
//! content digest which files really changed, and hands them to a
//! [`BackupManager`], which writes timestamped snapshots, enforces a
//! retention limit, and preserves rotated content in a permanent `FINAL`
//! archive indexed by `final_info.json`.

pub mod backup;
pub mod cli;
pub mod config;
pub mod core;

pub use backup::{BackupManager, FinalLog, FinalLogEntry, MergeReport};
pub use config::WatchConfig;
pub use crate::core::{
    ChannelSink, ContentHasher, LogLevel, LogSink, Logger, PatternMatcher, StdoutSink, WatchEvent,
    Watcher, WatcherHandle,
};
