// Daemon module - background mode and single-instance PID file

pub mod daemonize;
pub mod manager;
pub mod pid;

pub use daemonize::{Daemonizer, Fork, NixProcessOps, ProcessOps, Role};
pub use manager::{DaemonManager, DaemonStatus, Startup};
pub use pid::{FsPidFileOps, PidFile, PidFileGuard, PidFileOps, PidFileState};
