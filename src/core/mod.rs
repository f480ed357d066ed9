//! Core functionality module
//!
//! Contains filename filtering, content hashing, log sinks, and the polling
//! watcher

pub mod events;
pub mod filter;
pub mod hasher;
pub mod watcher;

// Re-export main types
pub use events::{ChannelSink, LogLevel, LogSink, Logger, StdoutSink, WatchEvent};
pub use filter::PatternMatcher;
pub use hasher::ContentHasher;
pub use watcher::{Watcher, WatcherHandle};
