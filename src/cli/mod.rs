// CLI module - run the guarded server and control a running instance

mod output;

use crate::config::ServerConfig;
use crate::context::ProcessContext;
use crate::daemon::{DaemonManager, Startup};
use crate::error::{ProcguardError, Result};
use crate::logger::{self, TracingLogger};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// procguard - single-instance server lifecycle
#[derive(Parser)]
#[command(name = "procguard")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct Common {
    /// Configuration file (.toml or .json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// PID file path, overrides the configuration file
    #[arg(short, long)]
    pid_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server, holding the PID file until SIGTERM or SIGINT
    Run {
        #[command(flatten)]
        common: Common,

        /// Run in background mode
        #[arg(short = 'D', long, conflicts_with = "foreground")]
        daemon: bool,

        /// Stay in the foreground even if the configuration says otherwise
        #[arg(long)]
        foreground: bool,
    },

    /// Show whether an instance holds the PID file
    Status {
        #[command(flatten)]
        common: Common,
    },

    /// Stop the instance holding the PID file
    Stop {
        #[command(flatten)]
        common: Common,

        /// Seconds to wait after SIGTERM before sending SIGKILL
        #[arg(short, long, default_value = "10")]
        timeout: u64,
    },
}

impl Cli {
    /// Run the CLI application
    pub fn run() -> Result<()> {
        let cli = Cli::parse();
        cli.execute()
    }

    /// Execute the parsed command
    fn execute(&self) -> Result<()> {
        match &self.command {
            Commands::Run {
                common,
                daemon,
                foreground,
            } => {
                let background = match (*daemon, *foreground) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                };
                let config = load_config(common, background)?;
                run_server(&config)
            }

            Commands::Status { common } => {
                let config = load_config(common, None)?;
                let manager = DaemonManager::new(&config, ProcessContext::default());
                let status = manager.status()?;
                output::print_status(&status);
                Ok(())
            }

            Commands::Stop { common, timeout } => {
                let config = load_config(common, None)?;
                let manager = DaemonManager::new(&config, ProcessContext::default());

                let pb = output::create_progress_bar("Stopping server...");
                match manager.stop(Duration::from_secs(*timeout)) {
                    Ok(pid) => {
                        output::finish_progress_success(pb, &format!("Server {} stopped", pid));
                        Ok(())
                    }
                    Err(ProcguardError::DaemonNotRunning) => {
                        pb.finish_and_clear();
                        output::print_info("Server is not running");
                        Ok(())
                    }
                    Err(e) => {
                        output::finish_progress_error(pb, "Stop failed");
                        Err(e)
                    }
                }
            }
        }
    }
}

/// Print a fatal error unless it was already logged during startup
pub fn report_error(error: &ProcguardError) {
    if !error.is_fatal_startup() {
        output::print_error(&error.to_string());
    }
}

/// Build the effective configuration: file, then CLI overrides
fn load_config(common: &Common, background: Option<bool>) -> Result<ServerConfig> {
    let mut config = match &common.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };

    if let Some(ref pid_file) = common.pid_file {
        config.pid_file = pid_file.clone();
    }
    if let Some(background) = background {
        config.background = background;
    }

    config.validate()?;
    config.resolve_paths()?;
    Ok(config)
}

fn run_server(config: &ServerConfig) -> Result<()> {
    logger::init_tracing(&config.log)?;

    let ctx = ProcessContext::new(Arc::new(TracingLogger));
    let manager = DaemonManager::new(config, ctx);

    match manager.start()? {
        Startup::Parent { child } => {
            tracing::debug!(child, "Detached into background");
            Ok(())
        }
        Startup::Running(guard) => {
            tracing::info!(
                pid = guard.pid(),
                pid_file = %guard.path().display(),
                "Server started"
            );
            if !config.background {
                output::print_success_msg(&format!("Running as PID {}", guard.pid()));
            }

            let signal = wait_for_shutdown();
            match signal {
                Ok(name) => tracing::info!("Received {}, stopping", name),
                Err(ref e) => tracing::error!("Signal handling failed: {}", e),
            }

            manager.shutdown(guard);
            signal.map(|_| ())
        }
    }
}

/// Block until SIGTERM or SIGINT.
///
/// The runtime is created here, after any fork, so the daemon never forks
/// with runtime threads alive.
fn wait_for_shutdown() -> Result<&'static str> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| ProcguardError::SignalError(format!("Failed to start runtime: {}", e)))?;

    runtime.block_on(shutdown_signal())
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| ProcguardError::SignalError(format!("SIGTERM handler: {}", e)))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| ProcguardError::SignalError(format!("SIGINT handler: {}", e)))?;

    tokio::select! {
        _ = sigterm.recv() => Ok("SIGTERM"),
        _ = sigint.recv() => Ok("SIGINT"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| ProcguardError::SignalError(e.to_string()))?;
    Ok("Ctrl-C")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn common(config: Option<PathBuf>, pid_file: Option<PathBuf>) -> Common {
        Common { config, pid_file }
    }

    #[test]
    fn test_cli_overrides_config_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("server.toml");
        std::fs::write(
            &config_path,
            "pid_file = \"/tmp/from-file.pid\"\nbackground = true\n",
        )
        .unwrap();

        let override_path = temp_dir.path().join("override.pid");
        let config = load_config(
            &common(Some(config_path), Some(override_path.clone())),
            Some(false),
        )
        .unwrap();

        assert_eq!(config.pid_file, override_path);
        assert!(!config.background);
    }

    #[test]
    fn test_config_file_values_kept_without_overrides() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("server.toml");
        std::fs::write(
            &config_path,
            "pid_file = \"/tmp/from-file.pid\"\nbackground = true\n",
        )
        .unwrap();

        let config = load_config(&common(Some(config_path), None), None).unwrap();

        assert_eq!(config.pid_file, PathBuf::from("/tmp/from-file.pid"));
        assert!(config.background);
    }

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from(["procguard", "run", "-D", "-p", "/tmp/a.pid"]).unwrap();
        match cli.command {
            Commands::Run {
                common,
                daemon,
                foreground,
            } => {
                assert!(daemon);
                assert!(!foreground);
                assert_eq!(common.pid_file, Some(PathBuf::from("/tmp/a.pid")));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_daemon_conflicts_with_foreground() {
        assert!(Cli::try_parse_from(["procguard", "run", "-D", "--foreground"]).is_err());
    }
}
