//! Container lifecycle steps driven through the `docker` CLI on the target host.

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{quote, ContainerRef, CONTAINER_ID};
use crate::error::Result;
use crate::executor::{Context, Step};

const DOCKER: &str = "docker";

/// Label carrying the token of the step that created a container.
pub const CREATE_LABEL: &str = "clusterdeck.create";

/// `docker pull <image>`
#[derive(Debug, Clone)]
pub struct PullImage {
    image: String,
}

impl PullImage {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
        }
    }
}

#[async_trait]
impl Step for PullImage {
    fn name(&self) -> &str {
        "PullImage"
    }

    async fn execute(&self, ctx: &mut Context) -> Result<()> {
        ctx.execute(&format!("{} pull {}", DOCKER, quote(&self.image)))
            .await?;
        Ok(())
    }
}

/// `docker create ...`; the new id is stored in the register.
///
/// Every container it creates is labelled with a token unique to this step,
/// so rollback only ever removes what this step left behind.
#[derive(Debug, Clone, Default)]
pub struct CreateContainer {
    image: String,
    name: String,
    token: String,
    entrypoint: Option<String>,
    command: Vec<String>,
    envs: Vec<String>,
    volumes: Vec<(String, String)>,
    devices: Vec<String>,
    cap_add: Vec<String>,
    host_network: bool,
    privileged: bool,
    restart: Option<String>,
    capture: Option<String>,
}

impl CreateContainer {
    pub fn new(image: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            name: name.into(),
            token: uuid::Uuid::new_v4().simple().to_string(),
            capture: Some(CONTAINER_ID.to_string()),
            ..Default::default()
        }
    }

    pub fn with_entrypoint(mut self, entrypoint: impl Into<String>) -> Self {
        self.entrypoint = Some(entrypoint.into());
        self
    }

    pub fn with_command<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.envs.push(format!("{}={}", key, value));
        self
    }

    /// Bind `host` into the container at `container`; empty host paths are ignored.
    pub fn with_volume(mut self, host: &str, container: &str) -> Self {
        if !host.is_empty() {
            self.volumes.push((host.to_string(), container.to_string()));
        }
        self
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.devices.push(device.into());
        self
    }

    pub fn with_cap_add(mut self, cap: impl Into<String>) -> Self {
        self.cap_add.push(cap.into());
        self
    }

    pub fn host_network(mut self) -> Self {
        self.host_network = true;
        self
    }

    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    pub fn with_restart(mut self, policy: impl Into<String>) -> Self {
        self.restart = Some(policy.into());
        self
    }

    /// Value of [`CREATE_LABEL`] on the container this step creates
    pub fn token(&self) -> &str {
        &self.token
    }

    fn label_filter(&self) -> String {
        format!("{}={}", CREATE_LABEL, self.token)
    }

    /// Full `docker create` invocation.
    pub fn command_line(&self) -> String {
        let mut args: Vec<String> = vec![DOCKER.into(), "create".into()];
        args.push(format!("--name {}", quote(&self.name)));
        if self.host_network {
            args.push("--network host".into());
        }
        if self.privileged {
            args.push("--privileged".into());
        }
        if let Some(policy) = &self.restart {
            args.push(format!("--restart {}", quote(policy)));
        }
        for cap in &self.cap_add {
            args.push(format!("--cap-add {}", quote(cap)));
        }
        for device in &self.devices {
            args.push(format!("--device {}", quote(device)));
        }
        for env in &self.envs {
            args.push(format!("--env {}", quote(env)));
        }
        for (host, container) in &self.volumes {
            args.push(format!("--volume {}", quote(&format!("{}:{}", host, container))));
        }
        if let Some(entrypoint) = &self.entrypoint {
            args.push(format!("--entrypoint {}", quote(entrypoint)));
        }
        args.push(format!("--label {}", quote(&self.label_filter())));
        args.push(quote(&self.image).into_owned());
        args.extend(self.command.iter().map(|a| quote(a).into_owned()));
        args.join(" ")
    }
}

#[async_trait]
impl Step for CreateContainer {
    fn name(&self) -> &str {
        "CreateContainer"
    }

    async fn execute(&self, ctx: &mut Context) -> Result<()> {
        let id = ctx.execute(&self.command_line()).await?;
        debug!(container = %self.name, id = %id, "Created container");
        if let Some(key) = &self.capture {
            ctx.register_mut().set(key.clone(), id);
        }
        Ok(())
    }

    async fn rollback(&self, ctx: &mut Context) {
        // A timed out create may have left a container behind; a rejected one
        // (e.g. a name conflict) left nothing and must not touch the owner.
        let list = format!(
            "{} ps -aq --filter {}",
            DOCKER,
            quote(&format!("label={}", self.label_filter()))
        );
        let ids = match ctx.execute(&list).await {
            Ok(ids) => ids,
            Err(err) => {
                warn!(container = %self.name, error = %err, "Failed to list containers for rollback");
                return;
            }
        };
        for id in ids.split_whitespace() {
            let cmd = format!("{} rm -f {}", DOCKER, quote(id));
            if let Err(err) = ctx.execute(&cmd).await {
                warn!(container = %self.name, id, error = %err, "Rollback of container failed");
            }
        }
    }
}

macro_rules! container_action {
    ($(#[$doc:meta])* $ty:ident, $name:literal, $verb:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $ty {
            container: ContainerRef,
        }

        impl $ty {
            pub fn new(container: ContainerRef) -> Self {
                Self { container }
            }
        }

        #[async_trait]
        impl Step for $ty {
            fn name(&self) -> &str {
                $name
            }

            async fn execute(&self, ctx: &mut Context) -> Result<()> {
                let id = self.container.require(ctx, $name)?;
                ctx.execute(&format!("{} {} {}", DOCKER, $verb, quote(&id)))
                    .await?;
                Ok(())
            }
        }
    };
}

container_action!(
    /// `docker start <id>`
    StartContainer,
    "StartContainer",
    "start"
);
container_action!(
    /// `docker stop <id>`
    StopContainer,
    "StopContainer",
    "stop"
);
container_action!(
    /// `docker restart <id>`
    RestartContainer,
    "RestartContainer",
    "restart"
);

/// `docker rm -f <id>`; nothing happens when no container is registered.
#[derive(Debug, Clone)]
pub struct RemoveContainer {
    container: ContainerRef,
}

impl RemoveContainer {
    pub fn new(container: ContainerRef) -> Self {
        Self { container }
    }
}

#[async_trait]
impl Step for RemoveContainer {
    fn name(&self) -> &str {
        "RemoveContainer"
    }

    async fn execute(&self, ctx: &mut Context) -> Result<()> {
        let Some(id) = self.container.resolve(ctx) else {
            debug!("No container to remove");
            return Ok(());
        };
        ctx.execute(&format!("{} rm -f {}", DOCKER, quote(&id)))
            .await?;
        Ok(())
    }
}

/// `docker inspect --format <fmt> <id>`, stored in the register.
#[derive(Debug, Clone)]
pub struct InspectContainer {
    container: ContainerRef,
    format: String,
    capture: String,
    optional: bool,
    fallback: Option<String>,
}

impl InspectContainer {
    pub fn new(container: ContainerRef, format: impl Into<String>, capture: impl Into<String>) -> Self {
        Self {
            container,
            format: format.into(),
            capture: capture.into(),
            optional: false,
            fallback: None,
        }
    }

    /// Do nothing when no container is registered.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Store `value` instead of failing when the inspection fails.
    pub fn or_fallback(mut self, value: impl Into<String>) -> Self {
        self.fallback = Some(value.into());
        self
    }

    /// Inspect the container state string (`running`, `exited`, ...).
    pub fn status(container: ContainerRef, capture: impl Into<String>) -> Self {
        Self::new(container, "{{.State.Status}}", capture)
    }
}

#[async_trait]
impl Step for InspectContainer {
    fn name(&self) -> &str {
        "InspectContainer"
    }

    async fn execute(&self, ctx: &mut Context) -> Result<()> {
        let id = match self.container.resolve(ctx) {
            Some(id) => id,
            None if self.optional => return Ok(()),
            None => self.container.require(ctx, "InspectContainer")?,
        };
        let result = ctx
            .execute(&format!(
                "{} inspect --format {} {}",
                DOCKER,
                quote(&self.format),
                quote(&id)
            ))
            .await;
        let out = match (result, &self.fallback) {
            (Ok(out), _) => out,
            (Err(err), Some(fallback)) => {
                debug!(container = %id, error = %err, "Inspect failed, using fallback");
                fallback.clone()
            }
            (Err(err), None) => return Err(err),
        };
        ctx.register_mut().set(self.capture.clone(), out);
        Ok(())
    }
}

/// `docker exec <id> /bin/sh -c <command>`
#[derive(Debug, Clone)]
pub struct ContainerExec {
    container: ContainerRef,
    command: String,
    capture: Option<String>,
}

impl ContainerExec {
    pub fn new(container: ContainerRef, command: impl Into<String>) -> Self {
        Self {
            container,
            command: command.into(),
            capture: None,
        }
    }

    pub fn capture(mut self, key: impl Into<String>) -> Self {
        self.capture = Some(key.into());
        self
    }
}

#[async_trait]
impl Step for ContainerExec {
    fn name(&self) -> &str {
        "ContainerExec"
    }

    async fn execute(&self, ctx: &mut Context) -> Result<()> {
        let id = self.container.require(ctx, "ContainerExec")?;
        let out = ctx
            .execute(&format!(
                "{} exec {} /bin/sh -c {}",
                DOCKER,
                quote(&id),
                quote(&self.command)
            ))
            .await?;
        if let Some(key) = &self.capture {
            ctx.register_mut().set(key.clone(), out);
        }
        Ok(())
    }
}
