//! Reusable steps.
//!
//! Steps are small and composable: the task factory strings them together
//! for each step type. Values flow between steps of one task through the
//! context register, e.g. [`docker::CreateContainer`] stores the new
//! container id and [`docker::StartContainer`] reads it back.

pub mod docker;
pub mod file;

use async_trait::async_trait;
use std::borrow::Cow;
use tracing::debug;

use crate::error::{Error, Result};
use crate::executor::{Context, Step};

pub use docker::{
    ContainerExec, CreateContainer, InspectContainer, PullImage, RemoveContainer,
    RestartContainer, StartContainer, StopContainer,
};
pub use file::{CleanStaged, CreateDirectory, InstallFile, RemoveFile};

/// Register key holding the container a task acts upon
pub const CONTAINER_ID: &str = "container_id";

/// Register key listing files staged on the remote host
pub const STAGED_FILES: &str = "staged_files";

/// Quote one shell word; image references and `host:path` pairs stay bare.
pub(crate) fn quote(s: &str) -> Cow<'_, str> {
    let bare = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_=/,.+:@%".contains(c));
    if bare {
        Cow::Borrowed(s)
    } else {
        shell_words::quote(s)
    }
}

/// Which container a docker step acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerRef {
    /// Fixed container name or id
    Name(String),
    /// Id stored in the register under this key
    Register(String),
}

impl ContainerRef {
    pub fn name(name: impl Into<String>) -> Self {
        ContainerRef::Name(name.into())
    }

    /// The id registered under [`CONTAINER_ID`].
    pub fn registered() -> Self {
        ContainerRef::Register(CONTAINER_ID.to_string())
    }

    /// Resolve to a container id; `None` when the register has no entry.
    pub fn resolve(&self, ctx: &Context) -> Option<String> {
        match self {
            ContainerRef::Name(name) => Some(name.clone()),
            ContainerRef::Register(key) => ctx
                .register()
                .get_str(key)
                .filter(|id| !id.is_empty())
                .map(str::to_string),
        }
    }

    pub(crate) fn require(&self, ctx: &Context, step: &str) -> Result<String> {
        self.resolve(ctx).ok_or_else(|| {
            Error::step_execution(step, format!("no container registered on {}", ctx.host()))
        })
    }
}

/// Run a shell command, optionally keeping its stdout in the register.
#[derive(Debug, Clone)]
pub struct Command {
    name: String,
    command: String,
    capture: Option<String>,
}

impl Command {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            capture: None,
        }
    }

    /// Store trimmed stdout under `key`.
    pub fn capture(mut self, key: impl Into<String>) -> Self {
        self.capture = Some(key.into());
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

#[async_trait]
impl Step for Command {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &mut Context) -> Result<()> {
        let out = ctx.execute(&self.command).await?;
        if let Some(key) = &self.capture {
            debug!(key = key.as_str(), "Captured command output");
            ctx.register_mut().set(key.clone(), out);
        }
        Ok(())
    }
}

type LambdaFn = dyn Fn(&mut Context) -> Result<()> + Send + Sync;

/// Synchronous in-process step, used for storage lookups and for checks
/// on values earlier steps registered.
pub struct Lambda {
    name: String,
    f: Box<LambdaFn>,
}

impl std::fmt::Debug for Lambda {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lambda").field("name", &self.name).finish()
    }
}

impl Lambda {
    pub fn new(
        name: impl Into<String>,
        f: impl Fn(&mut Context) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            f: Box::new(f),
        }
    }
}

#[async_trait]
impl Step for Lambda {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &mut Context) -> Result<()> {
        (self.f)(ctx)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording connection for step tests.

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::path::Path;
    use std::sync::Arc;

    use crate::connection::{
        CommandResult, Connection, ConnectionResult, ExecuteOptions, TransferOptions,
    };
    use crate::executor::Context;

    #[derive(Default)]
    pub struct Recorder {
        pub commands: Mutex<Vec<String>>,
        pub uploads: Mutex<Vec<(String, Vec<u8>)>>,
        pub fail_matching: Mutex<Option<String>>,
        pub stdout: Mutex<String>,
    }

    impl Recorder {
        pub fn commands(&self) -> Vec<String> {
            self.commands.lock().clone()
        }
    }

    pub struct Recording(pub Arc<Recorder>);

    #[async_trait]
    impl Connection for Recording {
        fn identifier(&self) -> &str {
            "recording"
        }
        async fn execute(&self, command: &str, _: Option<ExecuteOptions>) -> ConnectionResult<CommandResult> {
            self.0.commands.lock().push(command.to_string());
            let fail = self
                .0
                .fail_matching
                .lock()
                .as_ref()
                .is_some_and(|pat| command.contains(pat.as_str()));
            if fail {
                return Ok(CommandResult::failure(1, String::new(), "failed".into()));
            }
            Ok(CommandResult::success(self.0.stdout.lock().clone(), String::new()))
        }
        async fn upload(&self, _: &Path, _: &Path, _: Option<TransferOptions>) -> ConnectionResult<()> {
            Ok(())
        }
        async fn upload_content(&self, content: &[u8], path: &Path, _: Option<TransferOptions>) -> ConnectionResult<()> {
            self.0
                .uploads
                .lock()
                .push((path.display().to_string(), content.to_vec()));
            Ok(())
        }
        async fn download_content(&self, _: &Path) -> ConnectionResult<Vec<u8>> {
            Ok(Vec::new())
        }
        async fn close(&self) -> ConnectionResult<()> {
            Ok(())
        }
    }

    pub fn context() -> (Context, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let ctx = Context::new(None, Arc::new(Recording(recorder.clone())), None);
        (ctx, recorder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_command_capture() {
        let (mut ctx, recorder) = testing::context();
        *recorder.stdout.lock() = "1700000000\n".into();
        Command::new("Get Date", "date +%s")
            .capture("host_date")
            .execute(&mut ctx)
            .await
            .unwrap();
        assert_eq!(ctx.register().get_str("host_date"), Some("1700000000"));
        assert_eq!(recorder.commands(), vec!["date +%s"]);
    }

    #[tokio::test]
    async fn test_lambda_and_container_ref() {
        let (mut ctx, _) = testing::context();
        assert!(ContainerRef::registered().resolve(&ctx).is_none());
        Lambda::new("Set", |ctx: &mut Context| {
            ctx.register_mut().set(CONTAINER_ID, "abc");
            Ok(())
        })
        .execute(&mut ctx)
        .await
        .unwrap();
        assert_eq!(ContainerRef::registered().resolve(&ctx).as_deref(), Some("abc"));
        assert_eq!(ContainerRef::name("web").resolve(&ctx).as_deref(), Some("web"));
    }
}
