//! Service lifecycle tasks shared by both cluster kinds.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::{as_entity, subname, CleanItem, StepOptions, TaskFactory};
use crate::error::{Error, Result};
use crate::executor::{Context, Task};
use crate::steps::{
    CleanStaged, ContainerRef, CreateContainer, CreateDirectory, InspectContainer, InstallFile,
    Lambda, PullImage, RemoveContainer, RemoveFile, RestartContainer, StartContainer,
    StopContainer, CONTAINER_ID,
};
use crate::storage::{is_live_container, Storage, CLEANED_CONTAINER_ID};
use crate::topology::{DeployConfig, Entity};

/// Register key of a [`ServiceStatus`]
pub const SERVICE_STATUS: &str = "service_status";

const CONTAINER_STATE: &str = "container_state";
const STORED_CONTAINER_ID: &str = "stored_container_id";
const STARTED_AT: &str = "started_at";

/// One row of `clusterdeck status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub id: String,
    pub parent_id: String,
    pub role: String,
    pub host: String,
    /// `<replica sequence>/<replicas>`
    pub replica: String,
    pub container_id: String,
    pub status: String,
    pub log_dir: String,
    pub data_dir: String,
    /// Container start time, only collected for verbose status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
}

impl ServiceStatus {
    fn new(dc: &DeployConfig, container_id: &str, status: &str) -> Self {
        Self {
            id: dc.id().to_string(),
            parent_id: dc.parent_id().to_string(),
            role: dc.role().to_string(),
            host: dc.host().to_string(),
            replica: format!("{}/{}", dc.replicas_sequence() + 1, dc.replicas()),
            container_id: short_id(container_id),
            status: status.to_string(),
            log_dir: dc.log_dir().to_string(),
            data_dir: dc.data_dir().to_string(),
            started_at: None,
        }
    }

    /// Read the status a task left in its register.
    pub fn from_register(register: &crate::executor::Register) -> Option<Self> {
        register
            .get(SERVICE_STATUS)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

fn short_id(container_id: &str) -> String {
    container_id.chars().take(12).collect()
}

/// What to do when a service has no live container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnMissing {
    Skip,
    Fail,
    Ignore,
}

/// Copy the stored container id of a service into the register.
fn load_container(storage: Arc<dyn Storage>, service_id: String, on_missing: OnMissing) -> Lambda {
    Lambda::new("LoadContainerId", move |ctx: &mut Context| {
        let stored = storage.container_id(&service_id)?;
        if let Some(stored) = &stored {
            ctx.register_mut().set(STORED_CONTAINER_ID, stored.clone());
        }
        match stored.filter(|id| is_live_container(id)) {
            Some(id) => {
                ctx.register_mut().set(CONTAINER_ID, id);
                Ok(())
            }
            None => match on_missing {
                OnMissing::Skip => Err(Error::SkipTask),
                OnMissing::Ignore => Ok(()),
                OnMissing::Fail => Err(Error::step_execution(
                    "LoadContainerId",
                    format!("service {} has no container", service_id),
                )),
            },
        }
    })
}

fn container_name(factory: &TaskFactory, dc: &DeployConfig) -> String {
    format!("{}-{}-{}", dc.kind(), dc.role(), factory.service_id(dc))
}

/// Pull the image an entity runs; entities without one need no task.
pub fn pull_image(entity: Arc<dyn Entity>) -> Result<Option<Task>> {
    let image = match entity.config("container_image") {
        Some(image) if !image.is_empty() => image.to_string(),
        _ => return Ok(None),
    };
    let mut task = Task::new(
        "Pull Image",
        format!("host={} image={}", entity.host(), image),
        Some(entity),
    );
    task.add_step(PullImage::new(image));
    Ok(Some(task))
}

/// Create the service container once; later runs skip it.
pub fn create_container(factory: &TaskFactory, dc: Arc<DeployConfig>) -> Result<Option<Task>> {
    let service_id = factory.service_id(&dc);
    let prefix = dc.prefix();
    let mut task = Task::new("Create Container", subname(dc.as_ref()), as_entity(&dc));

    let storage = factory.storage().clone();
    let sid = service_id.clone();
    task.add_step(Lambda::new("CheckContainerExists", move |_ctx: &mut Context| {
        match storage.container_id(&sid)? {
            Some(id) if is_live_container(&id) => {
                debug!(service_id = %sid, container = %id, "Container already exists");
                Err(Error::SkipTask)
            }
            _ => Ok(()),
        }
    }));
    task.add_step(CreateDirectory::new([dc.log_dir(), dc.data_dir(), dc.core_dir()]));
    task.add_step(
        CreateContainer::new(dc.container_image(), container_name(factory, &dc))
            .host_network()
            .with_restart("always")
            .with_volume(dc.log_dir(), &format!("{}/logs", prefix))
            .with_volume(dc.data_dir(), &format!("{}/data", prefix))
            .with_volume(dc.core_dir(), "/core")
            .with_entrypoint("/entrypoint.sh")
            .with_command(["--role", dc.role()]),
    );

    let storage = factory.storage().clone();
    let cluster_id = factory.cluster_id().to_string();
    task.add_step(Lambda::new("SaveContainerId", move |ctx: &mut Context| {
        let id = ctx
            .register()
            .get_str(CONTAINER_ID)
            .ok_or_else(|| Error::step_execution("SaveContainerId", "no container id registered"))?;
        storage.insert_service(&cluster_id, &service_id, id)
    }));
    Ok(Some(task))
}

/// Write the rendered service configuration into the container.
pub fn sync_config(factory: &TaskFactory, dc: Arc<DeployConfig>) -> Result<Option<Task>> {
    let path = format!("{}/conf/{}", dc.prefix(), dc.service_role().config_file());
    let mut task = Task::new("Sync Config", subname(dc.as_ref()), as_entity(&dc));
    task.add_step(load_container(
        factory.storage().clone(),
        factory.service_id(&dc),
        OnMissing::Fail,
    ));
    task.add_step(InstallFile::in_container(
        dc.service_config_content(),
        ContainerRef::registered(),
        path,
    ));
    task.add_post_step(CleanStaged);
    Ok(Some(task))
}

pub fn start_service(factory: &TaskFactory, dc: Arc<DeployConfig>) -> Result<Option<Task>> {
    let mut task = Task::new("Start Service", subname(dc.as_ref()), as_entity(&dc));
    task.add_step(load_container(
        factory.storage().clone(),
        factory.service_id(&dc),
        OnMissing::Skip,
    ));
    task.add_step(StartContainer::new(ContainerRef::registered()));
    Ok(Some(task))
}

pub fn stop_service(factory: &TaskFactory, dc: Arc<DeployConfig>) -> Result<Option<Task>> {
    let mut task = Task::new("Stop Service", subname(dc.as_ref()), as_entity(&dc));
    task.add_step(load_container(
        factory.storage().clone(),
        factory.service_id(&dc),
        OnMissing::Skip,
    ));
    task.add_step(StopContainer::new(ContainerRef::registered()));
    Ok(Some(task))
}

pub fn restart_service(factory: &TaskFactory, dc: Arc<DeployConfig>) -> Result<Option<Task>> {
    let mut task = Task::new("Restart Service", subname(dc.as_ref()), as_entity(&dc));
    task.add_step(load_container(
        factory.storage().clone(),
        factory.service_id(&dc),
        OnMissing::Skip,
    ));
    task.add_step(RestartContainer::new(ContainerRef::registered()));
    Ok(Some(task))
}

/// Remove the items named by `options.clean_items`; nothing to clean means no task.
pub fn clean_service(
    factory: &TaskFactory,
    dc: Arc<DeployConfig>,
    options: &StepOptions,
) -> Result<Option<Task>> {
    if options.clean_items.is_empty() {
        return Ok(None);
    }

    let service_id = factory.service_id(&dc);
    let mut task = Task::new("Clean Service", subname(dc.as_ref()), as_entity(&dc));
    task.add_step(load_container(
        factory.storage().clone(),
        service_id.clone(),
        OnMissing::Ignore,
    ));
    for item in &options.clean_items {
        match item {
            CleanItem::Log => task.add_step(RemoveFile::new([dc.log_dir()])),
            CleanItem::Data => task.add_step(RemoveFile::new([dc.data_dir()])),
            CleanItem::Container => {
                task.add_step(RemoveContainer::new(ContainerRef::registered()));
                let storage = factory.storage().clone();
                let sid = service_id.clone();
                task.add_step(Lambda::new("MarkContainerCleaned", move |ctx: &mut Context| {
                    if ctx.register().contains(CONTAINER_ID) {
                        storage.set_container_id(&sid, CLEANED_CONTAINER_ID)?;
                    }
                    Ok(())
                }));
            }
        }
    }
    Ok(Some(task))
}

/// Placeholder status row built from storage alone.
pub fn init_service_status(factory: &TaskFactory, dc: Arc<DeployConfig>) -> Result<Option<Task>> {
    let storage = factory.storage().clone();
    let service_id = factory.service_id(&dc);
    let mut task = Task::new("Init Service Status", subname(dc.as_ref()), as_entity(&dc));
    let entity = dc.clone();
    task.add_step(Lambda::new("InitServiceStatus", move |ctx: &mut Context| {
        let container_id = storage
            .container_id(&service_id)?
            .unwrap_or_else(|| CLEANED_CONTAINER_ID.to_string());
        let status = ServiceStatus::new(&entity, &container_id, "Unknown");
        ctx.register_mut()
            .set(SERVICE_STATUS, serde_json::to_value(status)?);
        Ok(())
    }));
    Ok(Some(task))
}

/// Inspect the service container and leave a [`ServiceStatus`] in the register.
pub fn get_service_status(
    factory: &TaskFactory,
    dc: Arc<DeployConfig>,
    options: &StepOptions,
) -> Result<Option<Task>> {
    let mut task = Task::new("Get Service Status", subname(dc.as_ref()), as_entity(&dc));
    task.add_step(load_container(
        factory.storage().clone(),
        factory.service_id(&dc),
        OnMissing::Ignore,
    ));
    task.add_step(
        InspectContainer::status(ContainerRef::registered(), CONTAINER_STATE)
            .optional()
            .or_fallback("abnormal"),
    );
    if options.verbose {
        task.add_step(
            InspectContainer::new(ContainerRef::registered(), "{{.State.StartedAt}}", STARTED_AT)
                .optional()
                .or_fallback("-"),
        );
    }

    let entity = dc.clone();
    task.add_step(Lambda::new("ReportServiceStatus", move |ctx: &mut Context| {
        let register = ctx.register();
        let stored = register.get_str(STORED_CONTAINER_ID);
        let (container_id, status) = match register.get_str(CONTAINER_STATE) {
            Some(state) => (register.get_str(CONTAINER_ID).unwrap_or_default(), state),
            None if stored == Some(CLEANED_CONTAINER_ID) => (CLEANED_CONTAINER_ID, "Cleaned"),
            None => ("-", "Uninstalled"),
        };
        let mut status = ServiceStatus::new(&entity, container_id, &capitalize(status));
        status.started_at = register.get_str(STARTED_AT).map(str::to_string);
        let value = serde_json::to_value(status)?;
        ctx.register_mut().set(SERVICE_STATUS, value);
        Ok(())
    }));
    Ok(Some(task))
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
