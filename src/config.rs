//! Configuration module for clusterdeck
//!
//! Handles loading and merging configuration from multiple sources:
//! - Default values
//! - System configuration (/etc/clusterdeck/clusterdeck.toml)
//! - User configuration (~/.clusterdeck.toml)
//! - Project configuration (./clusterdeck.toml)
//! - Environment variables
//!
//! An explicit `--config` path replaces the search list entirely.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::executor::DEFAULT_CONCURRENCY;
use crate::telemetry::LogFormat;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Playbook execution settings
    pub execution: ExecutionConfig,

    /// SSH settings
    pub ssh: SshConfig,

    /// Logging settings
    pub logging: LoggingConfig,

    /// Local state store settings
    pub storage: StorageConfig,
}

/// Playbook execution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Maximum number of tasks running at once within a step
    pub concurrency: usize,

    /// Deadline for a single remote command, in seconds (unset = no deadline)
    pub command_timeout: Option<u64>,

    /// Keep going when some tasks of a step fail
    pub skip_error: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            command_timeout: None,
            skip_error: false,
        }
    }
}

impl ExecutionConfig {
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout.map(Duration::from_secs)
    }
}

/// SSH configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Fallback login user when the topology does not name one
    pub user: Option<String>,

    /// Fallback SSH port
    pub port: u16,

    /// Fallback private key file
    pub private_key_file: Option<PathBuf>,

    /// Connect timeout in seconds
    pub connect_timeout: u64,

    /// SSH executable
    pub ssh_executable: String,

    /// SCP executable
    pub scp_executable: String,

    /// Extra arguments passed to every ssh/scp invocation
    pub ssh_args: Vec<String>,

    /// Seconds the multiplexing master outlives its last client
    pub control_persist: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: None,
            port: 22,
            private_key_file: None,
            connect_timeout: 10,
            ssh_executable: "ssh".to_string(),
            scp_executable: "scp".to_string(),
            ssh_args: vec![
                "-o".to_string(),
                "StrictHostKeyChecking=no".to_string(),
                "-o".to_string(),
                "BatchMode=yes".to_string(),
            ],
            control_persist: 60,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base log level, overridden by `-v` flags and `RUST_LOG`
    pub level: String,

    /// Output format
    pub format: LogFormat,

    /// Include the event target in log lines
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Compact,
            with_target: false,
        }
    }
}

/// Local state store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path of the JSON state file
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            path: base.join(".clusterdeck").join("state.json"),
        }
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Config::default();

        for path in Self::get_config_paths(config_path) {
            if path.exists() {
                config = config.merge_from_file(&path)?;
            }
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Get the list of configuration file paths to check
    fn get_config_paths(explicit_path: Option<&PathBuf>) -> Vec<PathBuf> {
        if let Some(path) = explicit_path {
            return vec![path.clone()];
        }

        let mut paths = vec![PathBuf::from("/etc/clusterdeck/clusterdeck.toml")];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".clusterdeck.toml"));
            paths.push(home.join(".clusterdeck").join("config.toml"));
        }
        paths.push(PathBuf::from("clusterdeck.toml"));

        if let Ok(env_config) = std::env::var("CLUSTERDECK_CONFIG") {
            paths.insert(0, PathBuf::from(env_config));
        }
        paths
    }

    /// Merge configuration from a file
    fn merge_from_file(&self, path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let file_config: Config = match extension {
            "yml" | "yaml" => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            _ => toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
        };

        Ok(self.merge(file_config))
    }

    /// Merge another config into this one; sections present in `other` win
    fn merge(&self, other: Config) -> Config {
        Config {
            execution: ExecutionConfig {
                concurrency: if other.execution.concurrency != DEFAULT_CONCURRENCY {
                    other.execution.concurrency
                } else {
                    self.execution.concurrency
                },
                command_timeout: other
                    .execution
                    .command_timeout
                    .or(self.execution.command_timeout),
                skip_error: other.execution.skip_error || self.execution.skip_error,
            },
            ssh: SshConfig {
                user: other.ssh.user.or_else(|| self.ssh.user.clone()),
                private_key_file: other
                    .ssh
                    .private_key_file
                    .or_else(|| self.ssh.private_key_file.clone()),
                ..other.ssh
            },
            logging: other.logging,
            storage: other.storage,
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("CLUSTERDECK_CONCURRENCY") {
            if let Ok(n) = value.parse() {
                self.execution.concurrency = n;
            }
        }

        if let Ok(value) = std::env::var("CLUSTERDECK_COMMAND_TIMEOUT") {
            if let Ok(n) = value.parse() {
                self.execution.command_timeout = Some(n);
            }
        }

        if let Ok(user) = std::env::var("CLUSTERDECK_SSH_USER") {
            self.ssh.user = Some(user);
        }

        if let Ok(file) = std::env::var("CLUSTERDECK_PRIVATE_KEY_FILE") {
            self.ssh.private_key_file = Some(PathBuf::from(file));
        }

        if let Ok(level) = std::env::var("CLUSTERDECK_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(path) = std::env::var("CLUSTERDECK_STATE_FILE") {
            self.storage.path = PathBuf::from(path);
        }
    }

    /// Load from a specific file only
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Config::default().merge_from_file(path.as_ref())
    }
}
