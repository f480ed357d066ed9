use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;
use anyhow::{anyhow, bail, Context, Result};
use crate::core::events::Logger;
use crate::core::filter::{relative_key, walk_files_with};
use crate::core::hasher::ContentHasher;
use super::final_log::{FinalLog, FinalLogEntry};
use super::snapshot::{
    copy_preserving_mtime, digest_tree, digest_tree_filtered, is_snapshot_name,
    list_snapshot_dirs, modified_time, snapshot_name_now,
};

/// Name of the permanent archive directory under the backup root.
pub const FINAL_DIR_NAME: &str = "FINAL";
/// Name of the FINAL integrity log under the backup root.
pub const FINAL_LOG_NAME: &str = "final_info.json";

/// Owns a backup root: timestamped snapshots, retention, and the FINAL archive.
///
/// Every mutating operation runs under one lock per instance. Two processes
/// pointed at the same root are not coordinated.
///
/// Public operations never return errors. Faults are logged and the call
/// returns normally, so a quiet return is not proof of success.
#[derive(Debug)]
pub struct BackupManager {
    backup_folder: PathBuf,
    max_versions: Option<usize>,
    final_folder: PathBuf,
    final_log_file: PathBuf,
    hasher: ContentHasher,
    logger: Logger,
    lock: Mutex<()>,
}

/// Outcome of a consolidation into FINAL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub snapshots_scanned: usize,
    pub files_merged: usize,
}

impl BackupManager {
    /// `max_versions` of `None` (or zero) disables retention.
    pub fn new<P: AsRef<Path>>(backup_folder: P, max_versions: Option<usize>) -> Self {
        Self::with_logger(backup_folder, max_versions, Logger::default())
    }

    pub fn with_logger<P: AsRef<Path>>(backup_folder: P, max_versions: Option<usize>, logger: Logger) -> Self {
        let backup_folder = backup_folder.as_ref().to_path_buf();
        let final_folder = backup_folder.join(FINAL_DIR_NAME);
        let final_log_file = backup_folder.join(FINAL_LOG_NAME);

        if let Err(err) = fs::create_dir_all(&final_folder) {
            logger.error(format!(
                "Could not create FINAL folder {}: {}",
                final_folder.display(),
                err
            ));
        }

        Self {
            backup_folder,
            max_versions: max_versions.filter(|n| *n > 0),
            final_folder,
            final_log_file,
            hasher: ContentHasher::default(),
            logger,
            lock: Mutex::new(()),
        }
    }

    pub fn backup_folder(&self) -> &Path {
        &self.backup_folder
    }

    pub fn final_folder(&self) -> &Path {
        &self.final_folder
    }

    pub fn final_log_file(&self) -> &Path {
        &self.final_log_file
    }

    pub fn max_versions(&self) -> Option<usize> {
        self.max_versions
    }

    pub fn hasher(&self) -> &ContentHasher {
        &self.hasher
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy `path` into a new snapshot named for the current second, then
    /// prune. Returns the written copy.
    ///
    /// Two backups within the same second share a snapshot directory; a file
    /// with the same name is overwritten.
    pub fn backup_file<P: AsRef<Path>>(&self, path: P) -> Option<PathBuf> {
        let path = path.as_ref();
        let _guard = self.guard();

        match self.write_snapshot(path) {
            Ok(dest) => {
                self.prune_locked();
                Some(dest)
            }
            Err(err) => {
                self.logger.error(format!("Backup failed for {}: {:#}", path.display(), err));
                None
            }
        }
    }

    fn write_snapshot(&self, path: &Path) -> Result<PathBuf> {
        fs::create_dir_all(&self.backup_folder)
            .with_context(|| format!("Failed to create {}", self.backup_folder.display()))?;

        let dest_dir = self.backup_folder.join(snapshot_name_now());
        fs::create_dir_all(&dest_dir)
            .with_context(|| format!("Failed to create {}", dest_dir.display()))?;

        let file_name = path
            .file_name()
            .ok_or_else(|| anyhow!("{} has no file name", path.display()))?;
        let dest = dest_dir.join(file_name);
        copy_preserving_mtime(path, &dest)?;
        tracing::debug!("Snapshot written: {}", dest.display());
        Ok(dest)
    }

    /// Enforce the retention limit, preserving pruned snapshots into FINAL.
    pub fn prune(&self) {
        let _guard = self.guard();
        self.prune_locked();
    }

    fn prune_locked(&self) {
        let Some(max_versions) = self.max_versions else {
            return;
        };
        if let Err(err) = self.try_prune(max_versions) {
            self.logger.error(format!("Backup pruning failed: {:#}", err));
        }
    }

    fn try_prune(&self, max_versions: usize) -> Result<()> {
        let mut snapshots = list_snapshot_dirs(&self.backup_folder, FINAL_DIR_NAME)?;
        let excess = snapshots.len().saturating_sub(max_versions);

        for oldest in snapshots.drain(..excess) {
            // A snapshot whose content did not reach FINAL is kept.
            self.try_preserve(&oldest)
                .with_context(|| format!("Could not preserve {}", oldest.display()))?;
            fs::remove_dir_all(&oldest)
                .with_context(|| format!("Failed to remove {}", oldest.display()))?;
            self.logger.info(format!("Pruned old backup: {}", oldest.display()));
        }
        Ok(())
    }

    /// Copy every file of `snapshot` into `FINAL/<snapshot name>/` unless it
    /// is already there, logging each newly preserved file.
    pub fn preserve_into_final<P: AsRef<Path>>(&self, snapshot: P) {
        let _guard = self.guard();
        self.preserve_locked(snapshot.as_ref());
    }

    fn preserve_locked(&self, snapshot: &Path) {
        if let Err(err) = self.try_preserve(snapshot) {
            self.logger.error(format!("Error preserving files to FINAL folder: {:#}", err));
        }
    }

    /// Preserve file by file. Entries for every file that reached FINAL are
    /// saved even when some copies fail; the error then reports the count.
    fn try_preserve(&self, snapshot: &Path) -> Result<()> {
        let folder_name = snapshot
            .file_name()
            .ok_or_else(|| anyhow!("{} has no folder name", snapshot.display()))?;
        let final_subfolder = self.final_folder.join(folder_name);
        fs::create_dir_all(&final_subfolder)
            .with_context(|| format!("Failed to create {}", final_subfolder.display()))?;

        let entries = fs::read_dir(snapshot)
            .with_context(|| format!("Failed to list {}", snapshot.display()))?;

        let mut log = FinalLog::load(&self.final_log_file);
        let mut failed = 0usize;

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    self.logger.warn(format!("Could not read entry in {}: {}", snapshot.display(), err));
                    failed += 1;
                    continue;
                }
            };
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let src = entry.path();
            let dest = final_subfolder.join(entry.file_name());
            let Some(key) = relative_key(&self.final_folder, &dest) else {
                continue;
            };

            match self.preserve_file(&src, &dest, log.contains(&key)) {
                Ok(Some(log_entry)) => log.insert(key, log_entry),
                Ok(None) => {}
                Err(err) => {
                    self.logger.warn(format!("Could not preserve {}: {:#}", src.display(), err));
                    failed += 1;
                }
            }
        }

        log.save(&self.final_log_file)?;
        if failed > 0 {
            bail!("{} file(s) of {} were not preserved", failed, snapshot.display());
        }
        Ok(())
    }

    /// Copy one file into FINAL unless already there. A copy already present
    /// but missing from the log is hashed and logged as found.
    fn preserve_file(&self, src: &Path, dest: &Path, logged: bool) -> Result<Option<FinalLogEntry>> {
        if dest.exists() {
            if logged {
                return Ok(None);
            }
            return self.entry_for(dest, modified_time(dest)?).map(Some);
        }

        copy_preserving_mtime(src, dest)?;
        self.entry_for(dest, modified_time(src)?).map(Some)
    }

    fn entry_for(&self, path: &Path, modified: SystemTime) -> Result<FinalLogEntry> {
        let digest = self
            .hasher
            .digest_file(path)
            .with_context(|| format!("Failed to hash {}", path.display()))?;
        Ok(FinalLogEntry::new(modified, digest))
    }

    /// Copy `path` flat into FINAL's root and record it in the log.
    pub fn backup_file_to_final<P: AsRef<Path>>(&self, path: P) -> Option<PathBuf> {
        let path = path.as_ref();
        let _guard = self.guard();

        match self.try_backup_to_final(path) {
            Ok(dest) => Some(dest),
            Err(err) => {
                self.logger.error(format!("Backup to FINAL failed for {}: {:#}", path.display(), err));
                None
            }
        }
    }

    fn try_backup_to_final(&self, path: &Path) -> Result<PathBuf> {
        fs::create_dir_all(&self.final_folder)
            .with_context(|| format!("Failed to create {}", self.final_folder.display()))?;

        let file_name = path
            .file_name()
            .ok_or_else(|| anyhow!("{} has no file name", path.display()))?;
        let dest = self.final_folder.join(file_name);
        copy_preserving_mtime(path, &dest)?;

        let modified = modified_time(path)?;
        let digest = self
            .hasher
            .digest_file(path)
            .with_context(|| format!("Failed to hash {}", path.display()))?;

        let mut log = FinalLog::load(&self.final_log_file);
        log.insert(file_name.to_string_lossy(), FinalLogEntry::new(modified, digest));
        log.save(&self.final_log_file)?;
        Ok(dest)
    }

    /// Consolidate every snapshot into FINAL, keeping the newest copy of each
    /// relative path, and rebuild the log from exactly that set.
    ///
    /// Must not run while a watcher is scanning this root. Files preserved
    /// earlier under snapshot-named sub-folders stay on disk but leave the log.
    pub fn merge_final_on_demand(&self) -> MergeReport {
        let _guard = self.guard();

        match self.try_merge() {
            Ok(report) => {
                self.logger.info(format!(
                    "Final folder merged and updated successfully ({} files from {} backups).",
                    report.files_merged, report.snapshots_scanned
                ));
                report
            }
            Err(err) => {
                self.logger.error(format!("Error during final merge: {:#}", err));
                MergeReport::default()
            }
        }
    }

    fn try_merge(&self) -> Result<MergeReport> {
        let snapshots = list_snapshot_dirs(&self.backup_folder, FINAL_DIR_NAME)?;
        let mut latest: HashMap<String, (SystemTime, PathBuf)> = HashMap::new();

        for snapshot in &snapshots {
            let files = walk_files_with(snapshot, |err| {
                self.logger.warn(format!("Error walking {}: {}", snapshot.display(), err))
            });
            for path in files {
                let Some(key) = relative_key(snapshot, &path) else {
                    continue;
                };
                let modified = match modified_time(&path) {
                    Ok(modified) => modified,
                    Err(err) => {
                        self.logger.warn(format!("Skipping {}: {:#}", path.display(), err));
                        continue;
                    }
                };
                let newer = latest
                    .get(&key)
                    .map_or(true, |(current, _)| modified > *current);
                if newer {
                    latest.insert(key, (modified, path));
                }
            }
        }

        fs::create_dir_all(&self.final_folder)
            .with_context(|| format!("Failed to create {}", self.final_folder.display()))?;

        let mut log = FinalLog::new();
        let mut failed = 0usize;
        for (key, (modified, src)) in &latest {
            let dest = self.final_folder.join(key);
            match self.merge_file(src, &dest, *modified) {
                Ok(entry) => log.insert(key.clone(), entry),
                Err(err) => {
                    self.logger.warn(format!("Could not merge {}: {:#}", src.display(), err));
                    failed += 1;
                    // Whatever already sits at the destination stays logged.
                    if dest.is_file() {
                        if let Ok(entry) = modified_time(&dest).and_then(|t| self.entry_for(&dest, t)) {
                            log.insert(key.clone(), entry);
                        }
                    }
                }
            }
        }

        log.save(&self.final_log_file)?;
        if failed > 0 {
            bail!("{} of {} file(s) could not be merged", failed, latest.len());
        }
        Ok(MergeReport {
            snapshots_scanned: snapshots.len(),
            files_merged: latest.len(),
        })
    }

    fn merge_file(&self, src: &Path, dest: &Path, modified: SystemTime) -> Result<FinalLogEntry> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        copy_preserving_mtime(src, dest)?;
        self.entry_for(dest, modified)
    }

    /// Snapshot directories (FINAL excluded), oldest first.
    pub fn snapshots(&self) -> Vec<PathBuf> {
        if !self.backup_folder.exists() {
            return Vec::new();
        }
        list_snapshot_dirs(&self.backup_folder, FINAL_DIR_NAME).unwrap_or_else(|err| {
            self.logger.warn(format!("Could not list backups: {:#}", err));
            Vec::new()
        })
    }

    /// The snapshot with the newest directory modification time. FINAL is a
    /// candidate only when `include_final` is set, judged by its own folder
    /// time rather than per file.
    pub fn latest_snapshot(&self, include_final: bool) -> Option<PathBuf> {
        let mut candidates: Vec<(SystemTime, PathBuf)> = self
            .snapshots()
            .into_iter()
            .filter_map(|dir| modified_time(&dir).ok().map(|t| (t, dir)))
            .collect();

        if include_final && self.final_folder.is_dir() {
            if let Ok(t) = modified_time(&self.final_folder) {
                candidates.push((t, self.final_folder.clone()));
            }
        }

        // Name breaks ties between equal directory times.
        candidates.into_iter().max().map(|(_, dir)| dir)
    }

    /// Digest of every file in `snapshot`, keyed by path relative to it.
    pub fn snapshot_digests<P: AsRef<Path>>(&self, snapshot: P) -> HashMap<String, String> {
        digest_tree(snapshot.as_ref(), &self.hasher, &self.logger)
    }

    /// Digest of FINAL's mirrored tree, keyed by FINAL-relative path.
    /// Rotation history under snapshot-named sub-folders is left out.
    pub fn final_digests(&self) -> HashMap<String, String> {
        digest_tree_filtered(&self.final_folder, &self.hasher, &self.logger, |key| {
            match key.split_once('/') {
                Some((top, _)) => !is_snapshot_name(top),
                None => true,
            }
        })
    }

    pub fn final_log(&self) -> FinalLog {
        FinalLog::load(&self.final_log_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn quiet_manager(root: &Path, max_versions: Option<usize>) -> BackupManager {
        BackupManager::with_logger(root, max_versions, Logger::silent())
    }

    #[test]
    fn test_new_creates_final() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("backups");
        let manager = quiet_manager(&root, Some(3));

        assert!(root.join(FINAL_DIR_NAME).is_dir());
        assert_eq!(manager.max_versions(), Some(3));
        assert_eq!(manager.final_log_file(), root.join(FINAL_LOG_NAME));
    }

    #[test]
    fn test_zero_retention_means_unlimited() {
        let dir = TempDir::new().unwrap();
        assert_eq!(quiet_manager(dir.path(), Some(0)).max_versions(), None);
    }

    #[test]
    fn test_backup_missing_file_is_swallowed() {
        let dir = TempDir::new().unwrap();
        let manager = quiet_manager(&dir.path().join("backups"), None);

        assert!(manager.backup_file(dir.path().join("nope.txt")).is_none());
        assert!(manager.backup_file_to_final(dir.path().join("nope.txt")).is_none());
    }

    #[test]
    fn test_prune_without_retention_keeps_everything() {
        let dir = TempDir::new().unwrap();
        let manager = quiet_manager(dir.path(), None);
        for name in ["2024-01-01-00-00-00", "2024-01-02-00-00-00", "2024-01-03-00-00-00"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }

        manager.prune();
        assert_eq!(manager.snapshots().len(), 3);
    }

    #[test]
    fn test_preserve_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let manager = quiet_manager(dir.path(), None);
        let snapshot = dir.path().join("2024-01-01-00-00-00");
        fs::create_dir(&snapshot).unwrap();
        fs::write(snapshot.join("a.txt"), "first").unwrap();

        manager.preserve_into_final(&snapshot);
        let preserved = manager.final_folder().join("2024-01-01-00-00-00/a.txt");
        assert_eq!(fs::read_to_string(&preserved).unwrap(), "first");

        // Drift in the source is not picked up once preserved.
        fs::write(snapshot.join("a.txt"), "second").unwrap();
        manager.preserve_into_final(&snapshot);
        assert_eq!(fs::read_to_string(&preserved).unwrap(), "first");

        let log = manager.final_log();
        assert_eq!(log.len(), 1);
        assert_eq!(
            log.get("2024-01-01-00-00-00/a.txt").unwrap().digest,
            manager.hasher().digest_bytes(b"first")
        );
    }

    #[test]
    fn test_final_digests_skip_history() {
        let dir = TempDir::new().unwrap();
        let manager = quiet_manager(dir.path(), None);
        let final_dir = manager.final_folder().to_path_buf();
        fs::create_dir_all(final_dir.join("2024-01-01-00-00-00")).unwrap();
        fs::create_dir_all(final_dir.join("docs")).unwrap();
        fs::write(final_dir.join("2024-01-01-00-00-00/old.txt"), "old").unwrap();
        fs::write(final_dir.join("docs/note.txt"), "note").unwrap();
        fs::write(final_dir.join("root.txt"), "root").unwrap();

        let mut keys: Vec<String> = manager.final_digests().into_keys().collect();
        keys.sort();
        assert_eq!(keys, vec!["docs/note.txt", "root.txt"]);
    }

    #[test]
    fn test_latest_snapshot_empty_root() {
        let dir = TempDir::new().unwrap();
        let manager = quiet_manager(dir.path(), None);

        assert!(manager.latest_snapshot(false).is_none());
        assert_eq!(manager.latest_snapshot(true), Some(manager.final_folder().to_path_buf()));
    }
}
