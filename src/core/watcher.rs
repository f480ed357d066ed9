use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use anyhow::Result;
use crate::backup::BackupManager;
use crate::config::WatchConfig;
use super::events::Logger;
use super::filter::{relative_key, PatternMatcher};

/// How often the poll loop checks for a stop request.
pub const DEFAULT_CONTROL_TICK: Duration = Duration::from_secs(1);

/// Stops a running [`Watcher`] from another thread.
#[derive(Debug, Clone)]
pub struct WatcherHandle {
    running: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
}

impl WatcherHandle {
    /// Ask the poll loop to finish. A scan already in progress completes
    /// first; the loop exits within one control tick afterwards.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// What initialization does with one matched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitAction {
    BackupMissing,
    BackupChanged,
    Unchanged,
}

impl InitAction {
    /// An unknown digest never counts as matching the baseline.
    fn decide(base: Option<&str>, current: Option<&str>) -> Self {
        match (base, current) {
            (None, _) => InitAction::BackupMissing,
            (Some(base), Some(current)) if base == current => InitAction::Unchanged,
            (Some(_), _) => InitAction::BackupChanged,
        }
    }
}

/// Polls a folder tree and hands changed content to a [`BackupManager`].
///
/// One watcher runs one session: `start` blocks on the calling thread until
/// `stop` is observed, and the in-memory modification-time map is discarded
/// with the watcher.
pub struct Watcher {
    config: WatchConfig,
    backup: Arc<BackupManager>,
    matcher: PatternMatcher,
    logger: Logger,
    handle: WatcherHandle,
    control_tick: Duration,
    last_mtimes: HashMap<PathBuf, SystemTime>,
}

impl Watcher {
    pub fn new(config: WatchConfig, backup: Arc<BackupManager>, logger: Logger) -> Result<Self> {
        let matcher = PatternMatcher::new(&config.filename_patterns[..])?.with_logger(logger.clone());
        Ok(Self {
            config,
            backup,
            matcher,
            logger,
            handle: WatcherHandle {
                running: Arc::new(AtomicBool::new(false)),
                stop_requested: Arc::new(AtomicBool::new(false)),
            },
            control_tick: DEFAULT_CONTROL_TICK,
            last_mtimes: HashMap::new(),
        })
    }

    pub fn with_control_tick(mut self, tick: Duration) -> Self {
        self.control_tick = tick;
        self
    }

    pub fn handle(&self) -> WatcherHandle {
        self.handle.clone()
    }

    pub fn stop(&self) {
        self.handle.stop();
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    /// Files with a recorded modification time.
    pub fn tracked_files(&self) -> usize {
        self.last_mtimes.len()
    }

    pub fn is_tracked<P: AsRef<Path>>(&self, path: P) -> bool {
        self.last_mtimes.contains_key(path.as_ref())
    }

    fn stop_requested(&self) -> bool {
        self.handle.stop_requested.load(Ordering::SeqCst)
    }

    /// Reconcile the watch folder with the baseline, then poll until stopped.
    pub fn start(&mut self) {
        self.handle.running.store(true, Ordering::SeqCst);
        self.initialize();

        if self.stop_requested() {
            self.handle.running.store(false, Ordering::SeqCst);
            self.logger.info("WatchPup stopped watching.");
            return;
        }

        self.logger.info(format!(
            "WatchPup started watching {} (every {}s).",
            self.config.watch_folder.display(),
            self.config.interval_seconds
        ));

        let interval = self.config.interval();
        let mut last_scan = Instant::now();
        while !self.stop_requested() {
            if last_scan.elapsed() >= interval {
                self.scan();
                last_scan = Instant::now();
            }
            thread::sleep(self.control_tick);
        }

        self.handle.running.store(false, Ordering::SeqCst);
        self.logger.info("WatchPup stopped watching.");
    }

    fn baseline(&self) -> HashMap<String, String> {
        if self.config.use_final_as_initial {
            self.logger.info("Initial synchronization: using FINAL folder as base.");
            return self.backup.final_digests();
        }

        match self.backup.latest_snapshot(false) {
            Some(latest) => {
                self.logger.info(format!(
                    "Initial synchronization: latest backup directory is {}",
                    latest.display()
                ));
                self.backup.snapshot_digests(&latest)
            }
            None => {
                self.logger.info("Initial synchronization: no previous backup found.");
                HashMap::new()
            }
        }
    }

    /// Initialization pass: back up every matched file that is missing from,
    /// or differs from, the baseline, and record all modification times.
    pub fn initialize(&mut self) {
        let baseline = self.baseline();
        let root = self.config.watch_folder.clone();

        // A file that cannot be hashed is still tracked and gets a backup
        // attempt, so the first scan does not treat it as new.
        let mut current = Vec::new();
        for path in self.matcher.walk(&root) {
            let digest = match self.backup.hasher().digest_file(&path) {
                Ok(digest) => Some(digest),
                Err(err) => {
                    self.logger.warn(format!("Could not hash {}: {}", path.display(), err));
                    None
                }
            };
            current.push((path, digest));
        }

        if baseline.is_empty() {
            for (path, _) in &current {
                self.logger.info(format!("Backup (no previous): {}", path.display()));
                if self.config.use_final_as_initial {
                    self.backup.backup_file_to_final(path);
                } else {
                    self.backup.backup_file(path);
                }
                self.record_mtime(path);
            }
            return;
        }

        for (path, digest) in &current {
            let base = relative_key(&root, path).and_then(|key| baseline.get(&key));
            match InitAction::decide(base.map(String::as_str), digest.as_deref()) {
                InitAction::BackupMissing => {
                    self.logger.info(format!("Backup (no previous): {}", path.display()));
                    self.backup.backup_file(path);
                }
                InitAction::BackupChanged => {
                    self.logger.info(format!(
                        "Difference detected -> Updating: {} (MD5: {} -> {})",
                        path.display(),
                        base.map_or("?", String::as_str),
                        digest.as_deref().unwrap_or("?")
                    ));
                    self.backup.backup_file(path);
                }
                InitAction::Unchanged => {
                    self.logger.info(format!("File matches backup: {}", path.display()));
                }
            }
            self.record_mtime(path);
        }
    }

    fn record_mtime(&mut self, path: &Path) {
        match fs::metadata(path).and_then(|m| m.modified()) {
            Ok(mtime) => {
                self.last_mtimes.insert(path.to_path_buf(), mtime);
            }
            Err(err) => {
                self.logger.warn(format!("Could not read modification time of {}: {}", path.display(), err));
            }
        }
    }

    /// One full pass over the watch folder.
    pub fn scan(&mut self) {
        let root = self.config.watch_folder.clone();
        if !root.is_dir() {
            self.logger.error(format!("Watcher error during scan: {} is not a directory", root.display()));
            return;
        }

        let mut seen = HashSet::new();
        for path in self.matcher.walk(&root) {
            self.check_file(&path);
            seen.insert(path);
        }

        // Forget files that disappeared so the map tracks only live files.
        self.last_mtimes.retain(|path, _| seen.contains(path));
    }

    fn check_file(&mut self, path: &Path) {
        let mtime = match fs::metadata(path).and_then(|m| m.modified()) {
            Ok(mtime) => mtime,
            Err(err) => {
                self.logger.warn(format!("Could not read modification time of {}: {}", path.display(), err));
                return;
            }
        };

        let Some(last) = self.last_mtimes.get(path).copied() else {
            if self.config.watch_new_files {
                self.logger.info(format!("New file detected: {}", path.display()));
                self.backup.backup_file(path);
                self.last_mtimes.insert(path.to_path_buf(), mtime);
            }
            return;
        };

        if mtime <= last {
            return;
        }

        let current = match self.backup.hasher().digest_file(path) {
            Ok(digest) => digest,
            Err(err) => {
                self.logger.warn(format!("Could not hash {}: {}", path.display(), err));
                return;
            }
        };

        let backed_up = self
            .backup
            .latest_snapshot(self.config.use_final_as_initial)
            .zip(path.file_name())
            .map(|(dir, name)| dir.join(name))
            .filter(|copy| copy.is_file())
            .and_then(|copy| self.backup.hasher().digest_file(copy).ok());

        if backed_up.as_deref() != Some(current.as_str()) {
            self.logger.info(format!("Backing up updated file: {}", path.display()));
            self.backup.backup_file(path);
        } else {
            tracing::debug!("Touched without content change: {}", path.display());
        }
        self.last_mtimes.insert(path.to_path_buf(), mtime);
    }
}
