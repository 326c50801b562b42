//! Local connection module
//!
//! Runs commands through `sh -c` on the control node. Used for entities
//! without an SSH target (playground, local checks).

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, trace};

use super::{
    CommandResult, Connection, ConnectionError, ConnectionResult, ExecuteOptions,
    TransferOptions,
};

/// Local connection for executing commands on the current host
#[derive(Debug, Clone)]
pub struct LocalConnection {
    identifier: String,
}

impl LocalConnection {
    pub fn new() -> Self {
        let identifier = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "localhost".to_string());

        Self { identifier }
    }

    /// Create a local connection with a custom identifier
    pub fn with_identifier(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
        }
    }

    fn build_command(command: &str, options: &ExecuteOptions) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);

        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn prepare_destination(
        path: &Path,
        options: &TransferOptions,
    ) -> ConnectionResult<()> {
        if options.create_dirs {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    ConnectionError::TransferFailed(format!(
                        "Failed to create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        Ok(())
    }

    async fn set_mode(path: &Path, mode: u32) -> ConnectionResult<()> {
        use std::os::unix::fs::PermissionsExt;

        fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .await
            .map_err(|e| {
                ConnectionError::TransferFailed(format!(
                    "Failed to set permissions on {}: {}",
                    path.display(),
                    e
                ))
            })
    }
}

impl Default for LocalConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connection for LocalConnection {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult> {
        let options = options.unwrap_or_default();
        debug!(command = %command, "Executing local command");

        let output = Self::build_command(command, &options)
            .output()
            .await
            .map_err(|e| {
                ConnectionError::ExecutionFailed(format!("Failed to spawn process: {}", e))
            })?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        trace!(exit_code = %exit_code, stdout_len = %stdout.len(), stderr_len = %stderr.len(), "Command completed");

        if output.status.success() {
            Ok(CommandResult::success(stdout, stderr))
        } else {
            Ok(CommandResult::failure(exit_code, stdout, stderr))
        }
    }

    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &Path,
        options: Option<TransferOptions>,
    ) -> ConnectionResult<()> {
        let options = options.unwrap_or_default();
        debug!(src = %local_path.display(), dst = %remote_path.display(), "Copying file locally");

        Self::prepare_destination(remote_path, &options).await?;
        fs::copy(local_path, remote_path).await.map_err(|e| {
            ConnectionError::TransferFailed(format!(
                "Failed to copy {} to {}: {}",
                local_path.display(),
                remote_path.display(),
                e
            ))
        })?;

        if let Some(mode) = options.mode {
            Self::set_mode(remote_path, mode).await?;
        }
        Ok(())
    }

    async fn upload_content(
        &self,
        content: &[u8],
        remote_path: &Path,
        options: Option<TransferOptions>,
    ) -> ConnectionResult<()> {
        let options = options.unwrap_or_default();
        debug!(dst = %remote_path.display(), size = %content.len(), "Writing content locally");

        Self::prepare_destination(remote_path, &options).await?;
        fs::write(remote_path, content).await.map_err(|e| {
            ConnectionError::TransferFailed(format!(
                "Failed to write to {}: {}",
                remote_path.display(),
                e
            ))
        })?;

        if let Some(mode) = options.mode {
            Self::set_mode(remote_path, mode).await?;
        }
        Ok(())
    }

    async fn download_content(&self, remote_path: &Path) -> ConnectionResult<Vec<u8>> {
        debug!(src = %remote_path.display(), "Reading file content locally");

        fs::read(remote_path).await.map_err(|e| {
            ConnectionError::TransferFailed(format!(
                "Failed to read {}: {}",
                remote_path.display(),
                e
            ))
        })
    }

    async fn close(&self) -> ConnectionResult<()> {
        Ok(())
    }
}
