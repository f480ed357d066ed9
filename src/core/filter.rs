use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use ignore::WalkBuilder;
use regex::Regex;
use super::events::Logger;

/// Filters candidate filenames against an ordered list of regex patterns.
///
/// Patterns use search semantics: a filename matches when any pattern finds a
/// substring match anywhere in it. An empty pattern list matches everything.
///
/// Listing faults go to the attached [`Logger`], or to `tracing` without one.
#[derive(Debug, Clone, Default)]
pub struct PatternMatcher {
    patterns: Vec<Regex>,
    logger: Option<Logger>,
}

impl PatternMatcher {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                let p = p.as_ref();
                Regex::new(p).with_context(|| format!("Invalid filename pattern: {}", p))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            patterns,
            logger: None,
        })
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    fn warn(&self, message: String) {
        match &self.logger {
            Some(logger) => logger.warn(message),
            None => tracing::warn!("{}", message),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn matches(&self, filename: &str) -> bool {
        if self.patterns.is_empty() {
            return true;
        }
        self.patterns.iter().any(|p| p.is_match(filename))
    }

    /// Match against the final component of `path`.
    pub fn matches_path<P: AsRef<Path>>(&self, path: P) -> bool {
        path.as_ref()
            .file_name()
            .map(|name| self.matches(&name.to_string_lossy()))
            .unwrap_or(false)
    }

    /// Regular files directly inside `folder` whose names match.
    ///
    /// Not recursive. A read failure is logged and yields whatever was
    /// collected so far.
    pub fn filter_files<P: AsRef<Path>>(&self, folder: P) -> Vec<String> {
        let folder = folder.as_ref();
        let mut matched = Vec::new();

        let entries = match fs::read_dir(folder) {
            Ok(entries) => entries,
            Err(err) => {
                self.warn(format!("Error while filtering files in {}: {}", folder.display(), err));
                return matched;
            }
        };

        for entry in entries {
            match entry {
                Ok(entry) => {
                    let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if is_file && self.matches(&name) {
                        matched.push(name);
                    }
                }
                Err(err) => {
                    self.warn(format!("Error while filtering files in {}: {}", folder.display(), err));
                }
            }
        }

        matched.sort();
        matched
    }

    /// Recursively collect matching regular files under `root`.
    pub fn walk<P: AsRef<Path>>(&self, root: P) -> Vec<PathBuf> {
        walk_files_with(root, |err| self.warn(format!("Error walking directory: {}", err)))
            .into_iter()
            .filter(|path| self.matches_path(path))
            .collect()
    }
}

/// Every regular file under `root`, hidden files included, ignore files not
/// consulted. Each walk error goes to `on_error` and the entry is skipped.
pub fn walk_files_with<P, F>(root: P, mut on_error: F) -> Vec<PathBuf>
where
    P: AsRef<Path>,
    F: FnMut(ignore::Error),
{
    let mut files = Vec::new();

    for result in WalkBuilder::new(root.as_ref())
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_path(|a, b| a.cmp(b))
        .build()
    {
        match result {
            Ok(entry) => {
                if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                    files.push(entry.into_path());
                }
            }
            Err(err) => on_error(err),
        }
    }

    files
}

/// `path` relative to `root`, with `/` separators regardless of platform.
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
