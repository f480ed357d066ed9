use std::fmt;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use chrono::Local;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARNING",
            LogLevel::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Messages carried from the watch worker to the controller.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Log(String),
    Stopped,
}

/// Receives formatted log lines from the engine.
///
/// Implementations are called from the worker thread and must not touch
/// controller-owned state directly.
pub trait LogSink: Send + Sync {
    fn emit(&self, line: &str);
}

impl<F> LogSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn emit(&self, line: &str) {
        self(line)
    }
}

/// Writes every line to standard output. Used when no sink is supplied.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

impl LogSink for StdoutSink {
    fn emit(&self, line: &str) {
        println!("{}", line);
    }
}

/// Forwards lines over a bounded channel; the controller drains the receiver
/// on its own schedule. Sending blocks while the channel is full.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: SyncSender<WatchEvent>,
}

impl ChannelSink {
    pub fn bounded(capacity: usize) -> (Self, Receiver<WatchEvent>) {
        let (tx, rx) = mpsc::sync_channel(capacity);
        (Self { tx }, rx)
    }

    pub fn sender(&self) -> SyncSender<WatchEvent> {
        self.tx.clone()
    }
}

impl LogSink for ChannelSink {
    fn emit(&self, line: &str) {
        // Receiver gone means the controller is shutting down.
        let _ = self.tx.send(WatchEvent::Log(line.to_string()));
    }
}

/// Cloneable logging handle shared by the watcher and the backup manager.
///
/// Each message is mirrored as a `tracing` event and, formatted with a local
/// timestamp and level, handed to the sink.
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn LogSink>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").finish_non_exhaustive()
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::stdout()
    }
}

impl Logger {
    pub fn new<S: LogSink + 'static>(sink: S) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    pub fn stdout() -> Self {
        Self::new(StdoutSink)
    }

    /// Drop every line. Handy for callers that only want `tracing` output.
    pub fn silent() -> Self {
        Self::new(|_: &str| {})
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Info, message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Warn, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Error, message.as_ref());
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info => tracing::debug!(target: "watchpup::events", "{}", message),
            LogLevel::Warn => tracing::warn!(target: "watchpup::events", "{}", message),
            LogLevel::Error => tracing::error!(target: "watchpup::events", "{}", message),
        }
        self.sink.emit(&format_line(level, message));
    }
}

pub fn format_line(level: LogLevel, message: &str) -> String {
    format!(
        "{} - {} - {}",
        Local::now().format("%Y.%m.%d %H:%M:%S%.6f"),
        level,
        message
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_closure_sink_receives_formatted_line() {
        let lines = Arc::new(Mutex::new(Vec::<String>::new()));
        let captured = lines.clone();
        let logger = Logger::new(move |line: &str| captured.lock().unwrap().push(line.to_string()));

        logger.info("hello");
        logger.error("boom");

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" - INFO - hello"));
        assert!(lines[1].ends_with(" - ERROR - boom"));
    }

    #[test]
    fn test_channel_sink_crosses_threads() {
        let (sink, rx) = ChannelSink::bounded(4);
        let logger = Logger::new(sink);

        let worker = std::thread::spawn(move || {
            logger.warn("from worker");
        });
        worker.join().unwrap();

        match rx.recv().unwrap() {
            WatchEvent::Log(line) => assert!(line.contains("WARNING - from worker")),
            other => panic!("Expected log line, got {:?}", other),
        }
    }

    #[test]
    fn test_channel_sink_ignores_dropped_receiver() {
        let (sink, rx) = ChannelSink::bounded(1);
        drop(rx);
        Logger::new(sink).info("nobody listening");
    }

    #[test]
    fn test_line_timestamp_shape() {
        let line = format_line(LogLevel::Warn, "x");
        // "YYYY.MM.DD HH:MM:SS.ffffff"
        let stamp = line.split(" - ").next().unwrap();
        assert_eq!(stamp.len(), 26);
        assert_eq!(&stamp[4..5], ".");
    }
}
