//! Per-task execution context.
//!
//! A [`Context`] is created when a task starts and closed when it ends. It
//! owns the task's connection and a [`Register`] through which steps of the
//! same task hand values to each other. Every remote call made through the
//! context honors the step's command timeout.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use crate::connection::{
    CommandResult, Connection, ConnectionResult, Connector, ExecuteOptions, TransferOptions,
};
use crate::error::{Error, Result};
use crate::topology::Entity;

/// Key/value scratch space shared by the steps of one task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Register {
    values: IndexMap<String, JsonValue>,
}

impl Register {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<JsonValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.values.get(key)
    }

    /// String value of `key`; `None` when absent or not a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(JsonValue::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<JsonValue> {
        self.values.shift_remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.values.iter()
    }
}

/// Connection, entity and register of one running task.
pub struct Context {
    entity: Option<Arc<dyn Entity>>,
    host: String,
    connection: Arc<dyn Connection>,
    register: Register,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("host", &self.host)
            .field("connection", &self.connection.identifier())
            .field("register", &self.register)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Context {
    /// Wrap an already opened connection.
    pub fn new(
        entity: Option<Arc<dyn Entity>>,
        connection: Arc<dyn Connection>,
        timeout: Option<Duration>,
    ) -> Self {
        let host = entity
            .as_ref()
            .map(|e| e.host().to_string())
            .unwrap_or_else(|| "localhost".to_string());
        Self {
            entity,
            host,
            connection,
            register: Register::new(),
            timeout,
        }
    }

    /// Open a connection for `entity` through `connector`.
    ///
    /// Entities without an SSH target get whatever the connector hands out
    /// for the local host.
    pub async fn open(
        entity: Option<Arc<dyn Entity>>,
        connector: &dyn Connector,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let target = entity.as_ref().and_then(|e| e.ssh_target().cloned());
        debug!(
            target = target.as_ref().map(ToString::to_string).unwrap_or_default(),
            "Opening connection"
        );
        let connection = connector.connect(target.as_ref()).await?;
        Ok(Self::new(entity, connection, timeout))
    }

    pub fn entity(&self) -> Option<&Arc<dyn Entity>> {
        self.entity.as_ref()
    }

    /// Host label used in errors and logs
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn register(&self) -> &Register {
        &self.register
    }

    pub fn register_mut(&mut self) -> &mut Register {
        &mut self.register
    }

    pub(crate) fn take_register(&mut self) -> Register {
        std::mem::take(&mut self.register)
    }

    async fn with_deadline<T>(
        &self,
        fut: impl Future<Output = ConnectionResult<T>>,
    ) -> Result<T> {
        match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, fut).await {
                Ok(result) => Ok(result?),
                Err(_) => Err(Error::Timeout {
                    host: self.host.clone(),
                    timeout,
                }),
            },
            None => Ok(fut.await?),
        }
    }

    /// Run `command` remotely and return the raw result, whatever the exit code.
    pub async fn run(&self, command: &str, options: Option<ExecuteOptions>) -> Result<CommandResult> {
        trace!(host = %self.host, command, "Running remote command");
        self.with_deadline(self.connection.execute(command, options))
            .await
    }

    /// Run `command` remotely; a non-zero exit is an error.
    ///
    /// Returns stdout with trailing whitespace removed.
    pub async fn execute(&self, command: &str) -> Result<String> {
        let result = self.run(command, None).await?;
        check_exit(&self.host, result)
    }

    pub async fn upload(&self, local_path: &Path, remote_path: &Path) -> Result<()> {
        self.with_deadline(self.connection.upload(
            local_path,
            remote_path,
            Some(TransferOptions::new().with_create_dirs()),
        ))
        .await
    }

    pub async fn upload_content(
        &self,
        content: &[u8],
        remote_path: &Path,
        options: Option<TransferOptions>,
    ) -> Result<()> {
        self.with_deadline(self.connection.upload_content(content, remote_path, options))
            .await
    }

    pub async fn download_content(&self, remote_path: &Path) -> Result<Vec<u8>> {
        self.with_deadline(self.connection.download_content(remote_path))
            .await
    }

    /// Release the connection.
    pub async fn close(&self) -> Result<()> {
        self.connection.close().await?;
        Ok(())
    }
}

fn check_exit(host: &str, result: CommandResult) -> Result<String> {
    if result.success {
        return Ok(result.stdout.trim_end().to_string());
    }
    let message = if result.stderr.trim().is_empty() {
        result.stdout.trim().to_string()
    } else {
        result.stderr.trim().to_string()
    };
    Err(Error::remote_command_failed(host, result.exit_code, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;

    struct Scripted {
        delay: Duration,
        result: CommandResult,
    }

    #[async_trait]
    impl Connection for Scripted {
        fn identifier(&self) -> &str {
            "scripted"
        }

        async fn execute(
            &self,
            _command: &str,
            _options: Option<ExecuteOptions>,
        ) -> ConnectionResult<CommandResult> {
            tokio::time::sleep(self.delay).await;
            Ok(self.result.clone())
        }

        async fn upload(&self, _: &Path, _: &Path, _: Option<TransferOptions>) -> ConnectionResult<()> {
            Ok(())
        }

        async fn upload_content(
            &self,
            _: &[u8],
            _: &Path,
            _: Option<TransferOptions>,
        ) -> ConnectionResult<()> {
            Ok(())
        }

        async fn download_content(&self, _: &Path) -> ConnectionResult<Vec<u8>> {
            Ok(Vec::new())
        }

        async fn close(&self) -> ConnectionResult<()> {
            Ok(())
        }
    }

    fn context(delay: Duration, result: CommandResult, timeout: Option<Duration>) -> Context {
        Context::new(None, Arc::new(Scripted { delay, result }), timeout)
    }

    #[test]
    fn test_register() {
        let mut register = Register::new();
        register.set("container_id", "abc");
        register.set("count", 3);
        assert_eq!(register.get_str("container_id"), Some("abc"));
        assert_eq!(register.get_str("count"), None);
        assert_eq!(register.len(), 2);
        assert!(register.remove("container_id").is_some());
        assert!(!register.contains("container_id"));
    }

    #[tokio::test]
    async fn test_execute_trims_stdout() {
        let ctx = context(
            Duration::ZERO,
            CommandResult::success("abc123\n".into(), String::new()),
            None,
        );
        assert_eq!(ctx.execute("docker create").await.unwrap(), "abc123");
        assert_eq!(ctx.host(), "localhost");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_error() {
        let ctx = context(
            Duration::ZERO,
            CommandResult::failure(125, String::new(), "no such image\n".into()),
            None,
        );
        match ctx.execute("docker pull x").await {
            Err(Error::RemoteCommandFailed { exit_code, message, .. }) => {
                assert_eq!(exit_code, 125);
                assert_eq!(message, "no such image");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout() {
        let ctx = context(
            Duration::from_secs(5),
            CommandResult::success(String::new(), String::new()),
            Some(Duration::from_millis(50)),
        );
        assert!(matches!(
            ctx.execute("sleep 60").await,
            Err(Error::Timeout { .. })
        ));
    }
}
