use std::path::PathBuf;
use thiserror::Error;

/// Main error type for procguard
#[derive(Debug, Error)]
pub enum ProcguardError {
    // Daemonization errors
    #[error("Failed to switch to daemon mode (fork failed): {0}")]
    Fork(#[source] std::io::Error),

    #[error("Unable to unmount the inherited filesystem in the daemon process: {0}")]
    ChangeDir(#[source] std::io::Error),

    // PID file errors
    #[error("Could not remove old PID file {}: {source}", .path.display())]
    StalePidFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot open PID file {}: {source}", .path.display())]
    PidFileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("PID file {} is locked by another running instance", .path.display())]
    AlreadyLocked { path: PathBuf },

    #[error("Cannot set the lock on PID file {}: {source}", .path.display())]
    PidFileLock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot write PID file {}: {source}", .path.display())]
    PidFileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Short write to PID file {}: wrote {written} of {expected} bytes", .path.display())]
    ShortWrite {
        path: PathBuf,
        expected: usize,
        written: usize,
    },

    #[error("Failed to read PID file: {0}")]
    PidFileRead(String),

    #[error("Invalid PID in file: {0}")]
    InvalidPid(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // Control errors
    #[error("Daemon not running")]
    DaemonNotRunning,

    #[error("Signal error: {0}")]
    SignalError(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),

    // IO errors (automatically converted from std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl ProcguardError {
    /// Errors raised before the server has any state; the process must exit.
    pub fn is_fatal_startup(&self) -> bool {
        matches!(
            self,
            Self::Fork(_)
                | Self::ChangeDir(_)
                | Self::StalePidFile { .. }
                | Self::PidFileOpen { .. }
                | Self::AlreadyLocked { .. }
                | Self::PidFileLock { .. }
                | Self::PidFileWrite { .. }
                | Self::ShortWrite { .. }
        )
    }
}

/// Result type alias for procguard operations
pub type Result<T> = std::result::Result<T, ProcguardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_startup_classification() {
        let locked = ProcguardError::AlreadyLocked {
            path: PathBuf::from("/tmp/x.pid"),
        };
        assert!(locked.is_fatal_startup());
        assert!(ProcguardError::Fork(std::io::Error::other("no")).is_fatal_startup());
        assert!(!ProcguardError::DaemonNotRunning.is_fatal_startup());
        assert!(!ProcguardError::ConfigError("x".into()).is_fatal_startup());
    }

    #[test]
    fn test_locked_message_names_path() {
        let err = ProcguardError::AlreadyLocked {
            path: PathBuf::from("/run/server.pid"),
        };
        assert_eq!(
            err.to_string(),
            "PID file /run/server.pid is locked by another running instance"
        );
    }
}
