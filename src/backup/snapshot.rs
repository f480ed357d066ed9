//! On-disk layout helpers for snapshot directories.

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use crate::core::events::Logger;
use crate::core::filter::{relative_key, walk_files_with};
use crate::core::hasher::ContentHasher;

/// Snapshot directory name format. Fixed width, so lexicographic order is
/// chronological order.
pub const SNAPSHOT_NAME_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

pub fn snapshot_name_now() -> String {
    Local::now().format(SNAPSHOT_NAME_FORMAT).to_string()
}

pub fn is_snapshot_name(name: &str) -> bool {
    name.len() == 19 && NaiveDateTime::parse_from_str(name, SNAPSHOT_NAME_FORMAT).is_ok()
}

/// Sub-directories of `root` other than `exclude`, sorted by name.
pub fn list_snapshot_dirs(root: &Path, exclude: &str) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(root).with_context(|| format!("Failed to list {}", root.display()))? {
        let entry = entry?;
        if entry.file_name() == exclude {
            continue;
        }
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

pub fn modified_time(path: &Path) -> Result<SystemTime> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .with_context(|| format!("Failed to read modification time of {}", path.display()))
}

/// Copy `src` to `dest`, carrying over the source modification time.
pub fn copy_preserving_mtime(src: &Path, dest: &Path) -> Result<()> {
    let modified = modified_time(src)?;
    fs::copy(src, dest)
        .with_context(|| format!("Failed to copy {} to {}", src.display(), dest.display()))?;

    let file = File::options()
        .write(true)
        .open(dest)
        .or_else(|_| File::open(dest))
        .with_context(|| format!("Failed to open {}", dest.display()))?;
    file.set_modified(modified)
        .with_context(|| format!("Failed to set modification time on {}", dest.display()))?;
    Ok(())
}

/// Digest of every file under `dir`, keyed by its `/`-separated path relative
/// to `dir`. Files that cannot be read are skipped with a warning to `logger`.
pub fn digest_tree(dir: &Path, hasher: &ContentHasher, logger: &Logger) -> HashMap<String, String> {
    digest_tree_filtered(dir, hasher, logger, |_| true)
}

pub fn digest_tree_filtered<F>(dir: &Path, hasher: &ContentHasher, logger: &Logger, keep: F) -> HashMap<String, String>
where
    F: Fn(&str) -> bool,
{
    let mut digests = HashMap::new();
    let files = walk_files_with(dir, |err| logger.warn(format!("Error walking {}: {}", dir.display(), err)));
    for path in files {
        let Some(key) = relative_key(dir, &path) else {
            continue;
        };
        if !keep(&key) {
            continue;
        }
        match hasher.digest_file(&path) {
            Ok(digest) => {
                digests.insert(key, digest);
            }
            Err(err) => {
                logger.warn(format!("Could not hash {}: {}", path.display(), err));
            }
        }
    }
    digests
}
