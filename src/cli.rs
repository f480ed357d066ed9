use std::path::PathBuf;
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use crate::config::WatchConfig;

#[derive(Parser)]
#[command(name = "watchpup")]
#[command(version)]
#[command(about = "Watch a folder and keep versioned backups of changed files")]
#[command(long_about = "WatchPup scans a folder on a fixed interval, backs up files whose content changed into timestamped snapshot folders, rotates old snapshots into a permanent FINAL archive, and can consolidate all snapshots into FINAL on demand.")]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Watch a folder and back up changes until interrupted
    Watch(WatchArgs),
    /// Consolidate every snapshot into FINAL, newest copy per path
    Merge(MergeArgs),
    /// Write a default configuration file
    InitConfig {
        #[arg(value_name = "FILE", help = "Destination (.toml or .json)")]
        path: PathBuf,
    },
}

#[derive(Args, Debug, Default)]
pub struct WatchArgs {
    #[arg(short, long, value_name = "FILE", help = "Configuration file (.toml or .json)")]
    pub config: Option<PathBuf>,

    #[arg(short, long, value_name = "DIR", help = "Folder to watch")]
    pub watch: Option<PathBuf>,

    #[arg(short, long, value_name = "DIR", help = "Backup root folder")]
    pub backup: Option<PathBuf>,

    #[arg(short, long, value_name = "SECS", help = "Seconds between scans")]
    pub interval: Option<u64>,

    #[arg(short, long, value_name = "N", help = "Snapshots to keep before rotating into FINAL")]
    pub max_versions: Option<usize>,

    #[arg(short, long = "pattern", value_name = "REGEX", help = "Filename pattern (repeatable)")]
    pub patterns: Vec<String>,

    #[arg(long, help = "Use FINAL as the initial baseline")]
    pub use_final_as_initial: bool,

    #[arg(long, help = "Back up files created while watching")]
    pub watch_new_files: bool,
}

#[derive(Args, Debug, Default)]
pub struct MergeArgs {
    #[arg(short, long, value_name = "FILE", help = "Configuration file (.toml or .json)")]
    pub config: Option<PathBuf>,

    #[arg(short, long, value_name = "DIR", help = "Backup root folder")]
    pub backup: Option<PathBuf>,
}

impl WatchArgs {
    /// Config file first, then environment, then flags.
    pub fn resolve(&self) -> Result<WatchConfig> {
        let mut config = match &self.config {
            Some(path) => WatchConfig::load(path)?,
            None => WatchConfig::default(),
        };
        config.apply_env();

        if let Some(watch) = &self.watch {
            config.watch_folder = watch.clone();
        }
        if let Some(backup) = &self.backup {
            config.backup_folder = backup.clone();
        }
        if let Some(interval) = self.interval {
            config.interval_seconds = interval;
        }
        if let Some(max_versions) = self.max_versions {
            config.max_versions = Some(max_versions);
        }
        if !self.patterns.is_empty() {
            config.filename_patterns = self.patterns.clone();
        }
        config.use_final_as_initial |= self.use_final_as_initial;
        config.watch_new_files |= self.watch_new_files;

        config.validate()?;
        Ok(config)
    }
}

impl MergeArgs {
    pub fn resolve(&self) -> Result<WatchConfig> {
        let mut config = match &self.config {
            Some(path) => WatchConfig::load(path)?,
            None => WatchConfig::default(),
        };
        config.apply_env();

        if let Some(backup) = &self.backup {
            config.backup_folder = backup.clone();
        }
        if config.backup_folder.as_os_str().is_empty() {
            anyhow::bail!("backup_folder must be set");
        }
        Ok(config)
    }
}

impl Cli {
    pub fn setup_logging(&self) {
        let level = if self.verbose { "debug" } else { "info" };
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_watch_command() {
        let cli = Cli::try_parse_from([
            "watchpup", "watch", "-w", "/in", "-b", "/out", "-i", "5", "-m", "3",
            "-p", r"\.txt$", "-p", r"\.md$", "--watch-new-files",
        ])
        .unwrap();

        match cli.command {
            Command::Watch(args) => {
                assert_eq!(args.watch, Some(PathBuf::from("/in")));
                assert_eq!(args.interval, Some(5));
                assert_eq!(args.max_versions, Some(3));
                assert_eq!(args.patterns.len(), 2);
                assert!(args.watch_new_files);
                assert!(!args.use_final_as_initial);
            }
            _ => panic!("Expected watch command"),
        }
    }

    #[test]
    fn test_flags_override_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("watchpup.toml");
        let mut file_config = WatchConfig::new(dir.path(), dir.path().join("from-file"));
        file_config.filename_patterns = vec![r"\.log$".to_string()];
        file_config.save(&path).unwrap();

        let args = WatchArgs {
            config: Some(path),
            backup: Some(dir.path().join("from-flag")),
            use_final_as_initial: true,
            ..Default::default()
        };
        let config = args.resolve().unwrap();

        assert_eq!(config.backup_folder, dir.path().join("from-flag"));
        assert_eq!(config.filename_patterns, vec![r"\.log$".to_string()]);
        assert!(config.use_final_as_initial);
    }

    #[test]
    fn test_watch_requires_folders() {
        assert!(WatchArgs::default().resolve().is_err());
        assert!(MergeArgs::default().resolve().is_err());
    }
}
