//! Connection layer for remote host communication.
//!
//! Tasks never talk to a transport directly: every command, upload and
//! download goes through the [`Connection`] trait, and connections are
//! opened by a [`Connector`]. The default [`ConnectionFactory`] hands out
//! an [`SshConnection`] when an entity carries an [`SshTarget`] and a
//! [`LocalConnection`] otherwise. Tests substitute their own connector.
//!
//! # Example
//!
//! ```rust,ignore
//! use clusterdeck::connection::{ConnectionFactory, Connector, SshTarget};
//!
//! let factory = ConnectionFactory::default();
//! let target = SshTarget::new("10.0.0.1", "curve");
//! let conn = factory.connect(Some(&target)).await?;
//!
//! let result = conn.execute("docker ps", None).await?;
//! println!("{}", result.stdout);
//! conn.close().await?;
//! ```

/// Local execution connection implementation.
pub mod local;

/// SSH connection driving the system `ssh`/`scp` binaries.
pub mod ssh;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::SshConfig;

pub use local::LocalConnection;
pub use ssh::SshConnection;

/// Errors that can occur during connection operations.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Failed to establish initial connection to the host.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Command execution failed (not to be confused with non-zero exit code).
    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    /// File upload or download operation failed.
    #[error("File transfer failed: {0}")]
    TransferFailed(String),

    /// Connection or operation timed out.
    #[error("Connection timeout after {0} seconds")]
    Timeout(u64),

    /// Configuration is invalid or incomplete.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error during connection operations.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Connection was closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// The result of executing a command on a connection.
///
/// ```rust
/// use clusterdeck::connection::CommandResult;
///
/// let result = CommandResult::success("Hello".into(), String::new());
/// assert!(result.success);
/// assert_eq!(result.exit_code, 0);
///
/// let failed = CommandResult::failure(1, String::new(), "error".into());
/// assert!(!failed.success);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Exit code of the command (0 typically indicates success).
    pub exit_code: i32,
    /// Content written to standard output.
    pub stdout: String,
    /// Content written to standard error.
    pub stderr: String,
    /// Convenience flag: `true` if `exit_code == 0`.
    pub success: bool,
}

impl CommandResult {
    /// Create a new successful command result
    pub fn success(stdout: String, stderr: String) -> Self {
        Self {
            exit_code: 0,
            stdout,
            stderr,
            success: true,
        }
    }

    /// Create a new failed command result
    pub fn failure(exit_code: i32, stdout: String, stderr: String) -> Self {
        Self {
            exit_code,
            stdout,
            stderr,
            success: false,
        }
    }

    /// Get the combined output (stdout + stderr)
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Options for command execution
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Working directory for the command
    pub cwd: Option<String>,
    /// Environment variables to set
    pub env: HashMap<String, String>,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the working directory
    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Render the options as a shell prefix for transports without native support
    pub(crate) fn wrap(&self, command: &str) -> String {
        let mut prefix = String::new();
        if let Some(cwd) = &self.cwd {
            prefix.push_str(&format!("cd {} && ", shell_words::quote(cwd)));
        }
        let mut env: Vec<_> = self.env.iter().collect();
        env.sort();
        for (key, value) in env {
            prefix.push_str(&format!("{}={} ", key, shell_words::quote(value)));
        }
        format!("{}{}", prefix, command)
    }
}

/// Options for file transfer
#[derive(Debug, Clone, Default)]
pub struct TransferOptions {
    /// File mode (permissions) to set
    pub mode: Option<u32>,
    /// Create parent directories if they don't exist
    pub create_dirs: bool,
}

impl TransferOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set file mode
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Enable directory creation
    pub fn with_create_dirs(mut self) -> Self {
        self.create_dirs = true;
        self
    }
}

/// The main connection trait that all transport implementations must implement
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the connection identifier (hostname)
    fn identifier(&self) -> &str;

    /// Execute a command on the target host
    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult>;

    /// Upload a file to the target host
    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &Path,
        options: Option<TransferOptions>,
    ) -> ConnectionResult<()>;

    /// Upload content directly to a remote file
    async fn upload_content(
        &self,
        content: &[u8],
        remote_path: &Path,
        options: Option<TransferOptions>,
    ) -> ConnectionResult<()>;

    /// Download a file content from the target host
    async fn download_content(&self, remote_path: &Path) -> ConnectionResult<Vec<u8>>;

    /// Close the connection
    async fn close(&self) -> ConnectionResult<()>;
}

/// Where and how to reach a remote host over SSH.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SshTarget {
    /// Address used to connect (IP or resolvable name)
    pub host: String,
    /// SSH port
    pub port: u16,
    /// Login user
    pub user: String,
    /// Private key used for authentication
    pub private_key_file: Option<PathBuf>,
    /// Connect timeout in seconds
    pub connect_timeout: u64,
}

impl SshTarget {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
            private_key_file: None,
            connect_timeout: 10,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_private_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.private_key_file = Some(path.into());
        self
    }

    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout = secs;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }
}

impl fmt::Display for SshTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

/// Opens connections for tasks.
///
/// Every task execution asks the connector for a fresh connection and
/// closes it when the task finishes.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection to `target`, or to the local host when `None`
    async fn connect(&self, target: Option<&SshTarget>) -> ConnectionResult<Arc<dyn Connection>>;
}

/// Default connector: SSH for remote targets, local shell otherwise.
#[derive(Debug, Clone, Default)]
pub struct ConnectionFactory {
    ssh: SshConfig,
}

impl ConnectionFactory {
    pub fn new(ssh: SshConfig) -> Self {
        Self { ssh }
    }
}

#[async_trait]
impl Connector for ConnectionFactory {
    async fn connect(&self, target: Option<&SshTarget>) -> ConnectionResult<Arc<dyn Connection>> {
        match target {
            Some(target) => {
                let conn = SshConnection::connect(target.clone(), &self.ssh).await?;
                Ok(Arc::new(conn))
            }
            None => Ok(Arc::new(LocalConnection::new())),
        }
    }
}
