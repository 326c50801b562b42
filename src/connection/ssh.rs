//! SSH connection module
//!
//! Drives the system `ssh` and `scp` binaries through `tokio::process`.
//! Each connection owns a private OpenSSH multiplexing master (a unique
//! control socket), opened by [`SshConnection::connect`] and torn down by
//! [`Connection::close`], so every command of a task reuses one
//! authenticated session.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, trace, warn};

use super::{
    CommandResult, Connection, ConnectionError, ConnectionResult, ExecuteOptions, SshTarget,
    TransferOptions,
};
use crate::config::SshConfig;

/// SSH connection to a single remote host
#[derive(Debug)]
pub struct SshConnection {
    target: SshTarget,
    identifier: String,
    ssh_executable: String,
    scp_executable: String,
    /// Options shared by ssh and scp (`-o` pairs, identity, control socket)
    common_args: Vec<String>,
    control_path: PathBuf,
}

impl SshConnection {
    /// Build a connection without contacting the host
    pub fn new(target: SshTarget, config: &SshConfig) -> Self {
        let control_path =
            std::env::temp_dir().join(format!("clusterdeck-{}", uuid::Uuid::new_v4().simple()));

        let mut common_args = config.ssh_args.clone();
        common_args.extend([
            "-o".to_string(),
            format!("ConnectTimeout={}", target.connect_timeout),
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            format!("ControlPersist={}", config.control_persist),
            "-o".to_string(),
            format!("ControlPath={}", control_path.display()),
        ]);
        if let Some(key) = &target.private_key_file {
            common_args.push("-i".to_string());
            common_args.push(key.display().to_string());
        }

        Self {
            identifier: target.host.clone(),
            target,
            ssh_executable: config.ssh_executable.clone(),
            scp_executable: config.scp_executable.clone(),
            common_args,
            control_path,
        }
    }

    /// Open the multiplexing master and verify the host answers
    pub async fn connect(target: SshTarget, config: &SshConfig) -> ConnectionResult<Self> {
        let conn = Self::new(target, config);
        debug!(target = %conn.target, "Opening SSH connection");

        let result = conn.run_ssh("true", None).await?;
        if !result.success {
            return Err(ConnectionError::ConnectionFailed(format!(
                "{}: {}",
                conn.target,
                result.stderr.trim()
            )));
        }
        Ok(conn)
    }

    pub fn target(&self) -> &SshTarget {
        &self.target
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.target.user, self.target.host)
    }

    fn ssh_command(&self, remote_command: &str) -> Command {
        let mut cmd = Command::new(&self.ssh_executable);
        cmd.args(&self.common_args)
            .arg("-p")
            .arg(self.target.port.to_string())
            .arg(self.destination())
            .arg("--")
            .arg(remote_command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn scp_command(&self, from: &str, to: &str) -> Command {
        let mut cmd = Command::new(&self.scp_executable);
        cmd.args(&self.common_args)
            .arg("-P")
            .arg(self.target.port.to_string())
            .arg(from)
            .arg(to)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn remote_spec(&self, path: &Path) -> String {
        format!("{}:{}", self.destination(), path.display())
    }

    async fn run_ssh(
        &self,
        remote_command: &str,
        stdin: Option<&[u8]>,
    ) -> ConnectionResult<CommandResult> {
        let mut cmd = self.ssh_command(remote_command);
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = cmd.spawn().map_err(|e| {
            ConnectionError::ExecutionFailed(format!("Failed to spawn ssh: {}", e))
        })?;

        if let (Some(content), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(content).await?;
            pipe.shutdown().await?;
        }

        let output = child.wait_with_output().await.map_err(|e| {
            ConnectionError::ExecutionFailed(format!("Failed to wait for ssh: {}", e))
        })?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        trace!(host = %self.target.host, exit_code = %exit_code, "SSH command completed");

        // 255 is reserved by ssh for its own failures
        if exit_code == 255 {
            return Err(ConnectionError::ConnectionFailed(format!(
                "{}: {}",
                self.target,
                stderr.trim()
            )));
        }

        if output.status.success() {
            Ok(CommandResult::success(stdout, stderr))
        } else {
            Ok(CommandResult::failure(exit_code, stdout, stderr))
        }
    }

    async fn run_scp(&self, from: &str, to: &str) -> ConnectionResult<()> {
        let output = self.scp_command(from, to).output().await.map_err(|e| {
            ConnectionError::TransferFailed(format!("Failed to spawn scp: {}", e))
        })?;
        if !output.status.success() {
            return Err(ConnectionError::TransferFailed(format!(
                "scp {} -> {}: {}",
                from,
                to,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn ensure_parent(&self, path: &Path) -> ConnectionResult<()> {
        if let Some(parent) = path.parent() {
            let quoted = shell_words::quote(&parent.display().to_string()).into_owned();
            let result = self.run_ssh(&format!("mkdir -p {}", quoted), None).await?;
            if !result.success {
                return Err(ConnectionError::TransferFailed(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    result.stderr.trim()
                )));
            }
        }
        Ok(())
    }

    async fn apply_mode(&self, path: &Path, mode: Option<u32>) -> ConnectionResult<()> {
        if let Some(mode) = mode {
            let quoted = shell_words::quote(&path.display().to_string()).into_owned();
            let result = self
                .run_ssh(&format!("chmod {:o} {}", mode, quoted), None)
                .await?;
            if !result.success {
                return Err(ConnectionError::TransferFailed(format!(
                    "Failed to set permissions on {}: {}",
                    path.display(),
                    result.stderr.trim()
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for SshConnection {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult> {
        let command = options.unwrap_or_default().wrap(command);
        debug!(host = %self.target.host, command = %command, "Executing remote command");
        self.run_ssh(&command, None).await
    }

    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &Path,
        options: Option<TransferOptions>,
    ) -> ConnectionResult<()> {
        let options = options.unwrap_or_default();
        debug!(host = %self.target.host, src = %local_path.display(), dst = %remote_path.display(), "Uploading file");

        if options.create_dirs {
            self.ensure_parent(remote_path).await?;
        }
        self.run_scp(&local_path.display().to_string(), &self.remote_spec(remote_path))
            .await?;
        self.apply_mode(remote_path, options.mode).await
    }

    async fn upload_content(
        &self,
        content: &[u8],
        remote_path: &Path,
        options: Option<TransferOptions>,
    ) -> ConnectionResult<()> {
        let options = options.unwrap_or_default();
        debug!(host = %self.target.host, dst = %remote_path.display(), size = %content.len(), "Uploading content");

        if options.create_dirs {
            self.ensure_parent(remote_path).await?;
        }
        let quoted = shell_words::quote(&remote_path.display().to_string()).into_owned();
        let result = self
            .run_ssh(&format!("cat > {}", quoted), Some(content))
            .await?;
        if !result.success {
            return Err(ConnectionError::TransferFailed(format!(
                "Failed to write {}: {}",
                remote_path.display(),
                result.stderr.trim()
            )));
        }
        self.apply_mode(remote_path, options.mode).await
    }

    async fn download_content(&self, remote_path: &Path) -> ConnectionResult<Vec<u8>> {
        let quoted = shell_words::quote(&remote_path.display().to_string()).into_owned();
        let result = self.run_ssh(&format!("cat {}", quoted), None).await?;
        if !result.success {
            return Err(ConnectionError::TransferFailed(format!(
                "Failed to read {}: {}",
                remote_path.display(),
                result.stderr.trim()
            )));
        }
        Ok(result.stdout.into_bytes())
    }

    async fn close(&self) -> ConnectionResult<()> {
        let output = Command::new(&self.ssh_executable)
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .arg("-O")
            .arg("exit")
            .arg(self.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;
        if !output.status.success() {
            warn!(host = %self.target.host, "Failed to stop SSH control master");
        }
        Ok(())
    }
}
