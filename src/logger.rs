// Logger capability and tracing subscriber setup

use crate::config::LogConfig;
use crate::error::{ProcguardError, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Sink for lifecycle messages
pub trait Logger: Send + Sync {
    fn info(&self, msg: &str);
    fn warn(&self, msg: &str);
    fn error(&self, msg: &str);
}

/// Logger that forwards to the installed `tracing` subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn info(&self, msg: &str) {
        tracing::info!(target: "procguard", "{}", msg);
    }

    fn warn(&self, msg: &str) {
        tracing::warn!(target: "procguard", "{}", msg);
    }

    fn error(&self, msg: &str) {
        tracing::error!(target: "procguard", "{}", msg);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Logger that keeps every message in memory
#[derive(Debug, Default)]
pub struct MemoryLogger {
    entries: Mutex<Vec<(LogLevel, String)>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything logged so far
    pub fn entries(&self) -> Vec<(LogLevel, String)> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Messages logged at `level`, in order
    pub fn messages(&self, level: LogLevel) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, msg)| msg)
            .collect()
    }

    fn push(&self, level: LogLevel, msg: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((level, msg.to_string()));
        }
    }
}

impl Logger for MemoryLogger {
    fn info(&self, msg: &str) {
        self.push(LogLevel::Info, msg);
    }

    fn warn(&self, msg: &str) {
        self.push(LogLevel::Warn, msg);
    }

    fn error(&self, msg: &str) {
        self.push(LogLevel::Error, msg);
    }
}

/// Install the global fmt subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. When a log file is
/// configured, output is appended there instead of stderr, since a
/// daemonized process has no usable stderr.
pub fn init_tracing(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| ProcguardError::ConfigError(format!("Invalid log level: {}", e)))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    ProcguardError::ConfigError(format!(
                        "Failed to open log file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };

    installed.map_err(|e| ProcguardError::Other(format!("Failed to install logger: {}", e)))
}
