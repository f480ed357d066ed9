use std::path::Path;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use anyhow::{Context, Result};
use clap::Parser;

use watchpup::{
    cli::{Cli, Command, MergeArgs, WatchArgs},
    BackupManager, ChannelSink, Logger, WatchConfig, WatchEvent, Watcher,
};

/// Log lines the worker may queue before it blocks on the controller.
const LOG_CHANNEL_CAPACITY: usize = 256;

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.setup_logging();

    match &cli.command {
        Command::Watch(args) => run_watch(args),
        Command::Merge(args) => run_merge(args),
        Command::InitConfig { path } => run_init_config(path),
    }
}

fn run_watch(args: &WatchArgs) -> Result<()> {
    let config = match args.resolve() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            std::process::exit(1);
        }
    };
    tracing::info!("Starting WatchPup on: {}", config.watch_folder.display());

    let (sink, events) = ChannelSink::bounded(LOG_CHANNEL_CAPACITY);
    let done = sink.sender();
    let logger = Logger::new(sink);

    let backup = Arc::new(BackupManager::with_logger(
        &config.backup_folder,
        config.max_versions,
        logger.clone(),
    ));
    let mut watcher = Watcher::new(config, backup, logger)?;
    let handle = watcher.handle();

    let ctrlc_handle = handle.clone();
    ctrlc::set_handler(move || {
        ctrlc_handle.stop();
    })?;

    println!("Press Ctrl+C to stop watching");

    let worker = thread::Builder::new()
        .name("watchpup-worker".to_string())
        .spawn(move || {
            watcher.start();
            let _ = done.send(WatchEvent::Stopped);
        })
        .context("Failed to spawn watcher thread")?;

    loop {
        match events.recv_timeout(Duration::from_millis(100)) {
            Ok(WatchEvent::Log(line)) => println!("{}", line),
            Ok(WatchEvent::Stopped) => break,
            Err(RecvTimeoutError::Timeout) => {
                if worker.is_finished() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // Flush whatever the worker queued after the stop notice.
    while let Ok(WatchEvent::Log(line)) = events.try_recv() {
        println!("{}", line);
    }

    if worker.join().is_err() {
        eprintln!("Watcher error: worker thread panicked");
        tracing::error!("Watcher stopped after a panic in the worker thread");
    }
    println!("Watcher thread finished.");

    Ok(())
}

fn run_merge(args: &MergeArgs) -> Result<()> {
    let config = match args.resolve() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            std::process::exit(1);
        }
    };

    let backup = BackupManager::with_logger(&config.backup_folder, config.max_versions, Logger::stdout());
    println!("Merging backups to FINAL folder...");
    let report = backup.merge_final_on_demand();
    println!(
        "Merged {} files from {} backups into {}",
        report.files_merged,
        report.snapshots_scanned,
        backup.final_folder().display()
    );

    Ok(())
}

fn run_init_config(path: &Path) -> Result<()> {
    let config = WatchConfig::default();
    config.save(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
