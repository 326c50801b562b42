//! Filesystem steps on the target host.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::path::Path;
use tracing::{debug, warn};

use super::{quote, ContainerRef, STAGED_FILES};
use crate::connection::TransferOptions;
use crate::error::Result;
use crate::executor::{Context, Step};

/// `mkdir -p` for every non-empty path.
#[derive(Debug, Clone)]
pub struct CreateDirectory {
    paths: Vec<String>,
}

impl CreateDirectory {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths
                .into_iter()
                .map(Into::into)
                .filter(|p: &String| !p.is_empty())
                .collect(),
        }
    }
}

#[async_trait]
impl Step for CreateDirectory {
    fn name(&self) -> &str {
        "CreateDirectory"
    }

    async fn execute(&self, ctx: &mut Context) -> Result<()> {
        if self.paths.is_empty() {
            return Ok(());
        }
        let paths: Vec<_> = self.paths.iter().map(|p| quote(p)).collect();
        ctx.execute(&format!("mkdir -p {}", paths.join(" "))).await?;
        Ok(())
    }
}

/// `rm -rf` for every non-empty path.
#[derive(Debug, Clone)]
pub struct RemoveFile {
    paths: Vec<String>,
}

impl RemoveFile {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths
                .into_iter()
                .map(Into::into)
                .filter(|p: &String| !p.is_empty() && p != "/")
                .collect(),
        }
    }
}

#[async_trait]
impl Step for RemoveFile {
    fn name(&self) -> &str {
        "RemoveFile"
    }

    async fn execute(&self, ctx: &mut Context) -> Result<()> {
        if self.paths.is_empty() {
            return Ok(());
        }
        let paths: Vec<_> = self.paths.iter().map(|p| quote(p)).collect();
        ctx.execute(&format!("rm -rf {}", paths.join(" "))).await?;
        Ok(())
    }
}

/// Write generated content to a path on the host, or into a container.
///
/// Container targets are staged under `/tmp` first and copied with
/// `docker cp`; the staged path is listed in the register so a
/// [`CleanStaged`] post step can remove it.
#[derive(Debug, Clone)]
pub struct InstallFile {
    content: String,
    container: Option<ContainerRef>,
    path: String,
    mode: Option<u32>,
}

impl InstallFile {
    /// Install `content` at `path` on the host.
    pub fn on_host(content: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            container: None,
            path: path.into(),
            mode: None,
        }
    }

    /// Install `content` at `path` inside `container`.
    pub fn in_container(
        content: impl Into<String>,
        container: ContainerRef,
        path: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            container: Some(container),
            path: path.into(),
            mode: None,
        }
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    fn transfer_options(&self) -> TransferOptions {
        let options = TransferOptions::new().with_create_dirs();
        match self.mode {
            Some(mode) => options.with_mode(mode),
            None => options,
        }
    }
}

#[async_trait]
impl Step for InstallFile {
    fn name(&self) -> &str {
        "InstallFile"
    }

    async fn execute(&self, ctx: &mut Context) -> Result<()> {
        let Some(container) = &self.container else {
            return ctx
                .upload_content(
                    self.content.as_bytes(),
                    Path::new(&self.path),
                    Some(self.transfer_options()),
                )
                .await;
        };

        let id = container.require(ctx, "InstallFile")?;
        let staged = format!("/tmp/clusterdeck-{}", uuid::Uuid::new_v4().simple());
        ctx.upload_content(
            self.content.as_bytes(),
            Path::new(&staged),
            Some(self.transfer_options()),
        )
        .await?;
        stage(ctx, &staged);

        debug!(container = %id, path = %self.path, "Copying file into container");
        ctx.execute(&format!(
            "docker cp {} {}",
            quote(&staged),
            quote(&format!("{}:{}", id, self.path))
        ))
        .await?;
        Ok(())
    }

    async fn rollback(&self, ctx: &mut Context) {
        if self.container.is_some() {
            if let Err(err) = CleanStaged.execute(ctx).await {
                warn!(error = %err, "Failed to remove staged files");
            }
        }
    }
}

fn stage(ctx: &mut Context, path: &str) {
    let mut staged = staged_files(ctx);
    staged.push(JsonValue::String(path.to_string()));
    ctx.register_mut().set(STAGED_FILES, JsonValue::Array(staged));
}

fn staged_files(ctx: &Context) -> Vec<JsonValue> {
    ctx.register()
        .get(STAGED_FILES)
        .and_then(JsonValue::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Remove every file staged by [`InstallFile`] during the task.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanStaged;

#[async_trait]
impl Step for CleanStaged {
    fn name(&self) -> &str {
        "CleanStaged"
    }

    async fn execute(&self, ctx: &mut Context) -> Result<()> {
        let staged: Vec<String> = staged_files(ctx)
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        if staged.is_empty() {
            return Ok(());
        }
        RemoveFile::new(staged).execute(ctx).await?;
        ctx.register_mut().remove(STAGED_FILES);
        Ok(())
    }
}
