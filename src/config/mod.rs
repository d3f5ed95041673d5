use crate::error::{ProcguardError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Server lifecycle configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path of the single-instance PID file
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,

    /// Detach from the terminal before claiming the PID file
    #[serde(default)]
    pub background: bool,

    /// Logging settings
    #[serde(default)]
    pub log: LogConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Append log output to this file instead of stderr
    #[serde(default)]
    pub file: Option<PathBuf>,
}

// Default value functions for serde
fn default_pid_file() -> PathBuf {
    PathBuf::from("/tmp/procguard.pid")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            pid_file: default_pid_file(),
            background: false,
            log: LogConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<ServerConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ProcguardError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let mut config: ServerConfig = match extension {
            "toml" => toml::from_str(&contents)
                .map_err(|e| ProcguardError::InvalidConfig(format!("Failed to parse TOML: {}", e)))?,
            "json" => serde_json::from_str(&contents)
                .map_err(|e| ProcguardError::InvalidConfig(format!("Failed to parse JSON: {}", e)))?,
            _ => {
                return Err(ProcguardError::InvalidConfig(format!(
                    "Unsupported file format: {}. Use .toml or .json",
                    extension
                )))
            }
        };

        config.expand_env_vars();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.pid_file.as_os_str().is_empty() {
            return Err(ProcguardError::ConfigValidationError(
                "pid_file must not be empty".to_string(),
            ));
        }

        if self.pid_file.is_dir() {
            return Err(ProcguardError::ConfigValidationError(format!(
                "pid_file is a directory: {}",
                self.pid_file.display()
            )));
        }

        // The directive may carry per-target filters, e.g. "warn,procguard=debug"
        let base = self.log.level.split(',').next().unwrap_or("").trim();
        if !base.contains('=') && !LOG_LEVELS.contains(&base.to_ascii_lowercase().as_str()) {
            return Err(ProcguardError::ConfigValidationError(format!(
                "Invalid log level: {}. Must be one of: {}",
                self.log.level,
                LOG_LEVELS.join(", ")
            )));
        }

        if let Some(ref file) = self.log.file {
            if file.is_dir() {
                return Err(ProcguardError::ConfigValidationError(format!(
                    "log file is a directory: {}",
                    file.display()
                )));
            }
        }

        Ok(())
    }

    /// Make relative paths absolute against the current directory.
    ///
    /// Must run before daemonizing, which moves the process to `/`.
    pub fn resolve_paths(&mut self) -> Result<()> {
        self.pid_file = std::path::absolute(&self.pid_file)?;
        if let Some(ref file) = self.log.file {
            self.log.file = Some(std::path::absolute(file)?);
        }
        Ok(())
    }

    /// Expand environment variables in configuration fields
    fn expand_env_vars(&mut self) {
        self.pid_file = expand_env_in_path(&self.pid_file);
        if let Some(ref file) = self.log.file {
            self.log.file = Some(expand_env_in_path(file));
        }
    }
}

/// Expand `$VAR` and `${VAR}` references in a string
fn expand_env_in_string(s: &str) -> String {
    let mut result = s.to_string();

    // Longest names first so $HOMEDIR is not clobbered by $HOME
    let mut vars: Vec<(String, String)> = std::env::vars().collect();
    vars.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    for (key, value) in vars {
        result = result.replace(&format!("${{{}}}", key), &value);
        result = result.replace(&format!("${}", key), &value);
    }

    result
}

fn expand_env_in_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    PathBuf::from(expand_env_in_string(&path_str))
}
