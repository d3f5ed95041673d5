// Startup sequence and control of a running instance

use super::daemonize::{Daemonizer, NixProcessOps, ProcessOps, Role};
use super::pid::{FsPidFileOps, PidFile, PidFileGuard, PidFileOps, PidFileState};
use crate::config::ServerConfig;
use crate::context::ProcessContext;
use crate::error::{ProcguardError, Result};
use std::time::{Duration, Instant};

#[cfg(unix)]
use nix::sys::signal::{kill, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// Result of [`DaemonManager::start`]
#[derive(Debug)]
pub enum Startup {
    /// The launching process after a successful fork; it should exit 0.
    Parent { child: u32 },
    /// This process owns the PID file and should serve.
    Running(PidFileGuard),
}

/// Daemon status information
#[derive(Debug, Clone)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub pid_file: std::path::PathBuf,
    /// Set when the file exists but no process holds its lock
    pub stale: bool,
    pub process_name: Option<String>,
    pub memory_bytes: Option<u64>,
}

/// Runs daemonization and PID file claiming in order
pub struct DaemonManager<O = NixProcessOps, F = FsPidFileOps> {
    pid_file: PidFile<F>,
    background: bool,
    daemonizer: Daemonizer<O>,
    ctx: ProcessContext,
}

impl DaemonManager<NixProcessOps, FsPidFileOps> {
    /// Create a manager for the given configuration
    pub fn new(config: &ServerConfig, ctx: ProcessContext) -> Self {
        Self::with_ops(config, ctx, NixProcessOps, FsPidFileOps)
    }
}

impl<O: ProcessOps, F: PidFileOps> DaemonManager<O, F> {
    pub fn with_ops(config: &ServerConfig, ctx: ProcessContext, ops: O, pid_ops: F) -> Self {
        Self {
            pid_file: PidFile::with_ops(&config.pid_file, pid_ops),
            background: config.background,
            daemonizer: Daemonizer::with_ops(ops),
            ctx,
        }
    }

    pub fn pid_file(&self) -> &PidFile<F> {
        &self.pid_file
    }

    /// Daemonize if configured, then claim the PID file under the final pid.
    ///
    /// Every error returned here is a fatal startup error and has already
    /// been logged; the caller only has to exit with a failure status.
    pub fn start(&self) -> Result<Startup> {
        if self.background {
            let role = self
                .daemonizer
                .enter_background(&self.ctx)
                .inspect_err(|e| self.ctx.logger().error(&format!("Error: {}", e)))?;
            if let Role::Parent { child } = role {
                return Ok(Startup::Parent { child });
            }
        }

        let guard = self
            .pid_file
            .acquire()
            .inspect_err(|e| self.ctx.logger().error(&format!("Error: {}", e)))?;

        tracing::debug!(pid = guard.pid(), path = %guard.path().display(), "PID file claimed");
        Ok(Startup::Running(guard))
    }

    /// Release the PID file at graceful shutdown
    pub fn shutdown(&self, guard: PidFileGuard) {
        guard.release(self.ctx.logger());
        self.ctx.logger().info(&format!(
            "Shutting down after {}s",
            self.ctx.uptime().as_secs()
        ));
    }

    /// Check if a process currently holds the PID file
    pub fn is_running(&self) -> bool {
        matches!(self.pid_file.probe(), Ok(PidFileState::Claimed { .. }))
    }

    /// Get daemon status information
    pub fn status(&self) -> Result<DaemonStatus> {
        let state = self.pid_file.probe()?;
        let mut status = DaemonStatus {
            running: false,
            pid: None,
            pid_file: self.pid_file.path().to_path_buf(),
            stale: false,
            process_name: None,
            memory_bytes: None,
        };

        match state {
            PidFileState::Absent => {}
            PidFileState::Unclaimed => {
                status.stale = true;
                status.pid = self.pid_file.read().ok();
            }
            PidFileState::Claimed { pid } => {
                status.running = true;
                status.pid = pid;
                if let Some(pid) = pid {
                    let (name, memory) = process_details(pid);
                    status.process_name = name;
                    status.memory_bytes = memory;
                }
            }
        }

        Ok(status)
    }

    /// Stop the running instance by sending SIGTERM, then SIGKILL after `timeout`
    #[cfg(unix)]
    pub fn stop(&self, timeout: Duration) -> Result<u32> {
        let pid = match self.pid_file.probe()? {
            PidFileState::Claimed { pid: Some(pid) } => pid,
            PidFileState::Claimed { pid: None } => {
                return Err(ProcguardError::InvalidPid(
                    "PID file is locked but its content is unreadable".to_string(),
                ))
            }
            PidFileState::Absent | PidFileState::Unclaimed => {
                return Err(ProcguardError::DaemonNotRunning)
            }
        };

        let target = Pid::from_raw(pid as i32);
        kill(target, Signal::SIGTERM)
            .map_err(|e| ProcguardError::SignalError(format!("Failed to send SIGTERM: {}", e)))?;

        if self.wait_until_released(timeout) {
            self.remove_if_unclaimed();
            return Ok(pid);
        }

        tracing::warn!(pid, "Process did not stop gracefully, sending SIGKILL");
        kill(target, Signal::SIGKILL)
            .map_err(|e| ProcguardError::SignalError(format!("Failed to send SIGKILL: {}", e)))?;

        if self.wait_until_released(Duration::from_secs(1)) {
            self.remove_if_unclaimed();
            return Ok(pid);
        }

        Err(ProcguardError::TimeoutError(format!(
            "Process {} still holds {} after SIGKILL",
            pid,
            self.pid_file.path().display()
        )))
    }

    #[cfg(not(unix))]
    pub fn stop(&self, _timeout: Duration) -> Result<u32> {
        Err(ProcguardError::Other(
            "Daemon stop is only supported on Unix systems".to_string(),
        ))
    }

    /// A holder that died from a signal leaves its file behind
    fn remove_if_unclaimed(&self) {
        if let Ok(PidFileState::Unclaimed) = self.pid_file.probe() {
            self.pid_file.release(self.ctx.logger());
        }
    }

    fn wait_until_released(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if !self.is_running() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        !self.is_running()
    }
}

/// Name and resident memory of a live process
fn process_details(pid: u32) -> (Option<String>, Option<u64>) {
    use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

    let sys_pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[sys_pid]),
        true,
        ProcessRefreshKind::everything(),
    );

    match system.process(sys_pid) {
        Some(process) => (
            Some(process.name().to_string_lossy().into_owned()),
            Some(process.memory()),
        ),
        None => (None, None),
    }
}
