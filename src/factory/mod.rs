//! Turns a playbook step into a batch of tasks.
//!
//! Each [`StepType`] has a constructor in one of the domain modules. A
//! constructor receives one entity plus the step's [`StepOptions`] and
//! returns the task to run for it, `None` when the entity needs no work,
//! or an error that aborts the whole batch.

pub mod bs;
pub mod checker;
pub mod common;
pub mod fs;
pub mod monitor;
pub mod playground;
pub mod website;

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::configs::SmartConfig;
use crate::error::{Error, Result};
use crate::executor::{Task, Tasks};
use crate::playbook::PlaybookStep;
use crate::storage::Storage;
use crate::topology::{self, DeployConfig, Entity};

/// Every kind of playbook step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepType {
    // checker
    CheckSshConnect,
    CheckPermission,
    CheckDockerEngine,
    CheckPortInUse,
    GetHostDate,
    // common
    PullImage,
    CreateContainer,
    SyncConfig,
    StartService,
    StopService,
    RestartService,
    CleanService,
    InitServiceStatus,
    GetServiceStatus,
    // bs
    FormatChunkfilePool,
    MapVolume,
    UnmapVolume,
    // fs
    MountFilesystem,
    UmountFilesystem,
    // playground
    RunPlayground,
    RemovePlayground,
    // monitor
    StartMonitor,
    StopMonitor,
    CleanMonitor,
    // website
    StartWebsite,
    StopWebsite,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::CheckSshConnect => "CHECK_SSH_CONNECT",
            StepType::CheckPermission => "CHECK_PERMISSION",
            StepType::CheckDockerEngine => "CHECK_DOCKER_ENGINE",
            StepType::CheckPortInUse => "CHECK_PORT_IN_USE",
            StepType::GetHostDate => "GET_HOST_DATE",
            StepType::PullImage => "PULL_IMAGE",
            StepType::CreateContainer => "CREATE_CONTAINER",
            StepType::SyncConfig => "SYNC_CONFIG",
            StepType::StartService => "START_SERVICE",
            StepType::StopService => "STOP_SERVICE",
            StepType::RestartService => "RESTART_SERVICE",
            StepType::CleanService => "CLEAN_SERVICE",
            StepType::InitServiceStatus => "INIT_SERVICE_STATUS",
            StepType::GetServiceStatus => "GET_SERVICE_STATUS",
            StepType::FormatChunkfilePool => "FORMAT_CHUNKFILE_POOL",
            StepType::MapVolume => "MAP_VOLUME",
            StepType::UnmapVolume => "UNMAP_VOLUME",
            StepType::MountFilesystem => "MOUNT_FILESYSTEM",
            StepType::UmountFilesystem => "UMOUNT_FILESYSTEM",
            StepType::RunPlayground => "RUN_PLAYGROUND",
            StepType::RemovePlayground => "REMOVE_PLAYGROUND",
            StepType::StartMonitor => "START_MONITOR",
            StepType::StopMonitor => "STOP_MONITOR",
            StepType::CleanMonitor => "CLEAN_MONITOR",
            StepType::StartWebsite => "START_WEBSITE",
            StepType::StopWebsite => "STOP_WEBSITE",
        }
    }

    /// Step types that act on a host rather than on a service; at most one
    /// task per host is created for them.
    pub fn once_per_host(&self) -> bool {
        matches!(
            self,
            StepType::PullImage
                | StepType::CheckSshConnect
                | StepType::GetHostDate
                | StepType::CheckDockerEngine
        )
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What `CLEAN_SERVICE` removes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CleanItem {
    Log,
    Data,
    Container,
}

impl CleanItem {
    pub const ALL: [CleanItem; 3] = [CleanItem::Log, CleanItem::Data, CleanItem::Container];
}

impl FromStr for CleanItem {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "log" => Ok(CleanItem::Log),
            "data" => Ok(CleanItem::Data),
            "container" => Ok(CleanItem::Container),
            other => Err(Error::Internal(format!("unknown clean item '{}'", other))),
        }
    }
}

/// Block volume to map on a client host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapOptions {
    pub user: String,
    pub volume: String,
    /// Create the volume before mapping it
    pub create: bool,
    /// Size used on create, e.g. `10GiB`
    pub size: String,
}

/// Filesystem to mount on a client host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOptions {
    pub fs_name: String,
    pub mount_point: String,
}

/// Step-specific options threaded into the task constructors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOptions {
    pub clean_items: Vec<CleanItem>,
    pub verbose: bool,
    pub map: Option<MapOptions>,
    pub mount: Option<MountOptions>,
    /// Report state instead of changing it
    pub only_check: bool,
}

impl StepOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clean_items(mut self, items: impl IntoIterator<Item = CleanItem>) -> Self {
        self.clean_items = items.into_iter().collect();
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_map(mut self, map: MapOptions) -> Self {
        self.map = Some(map);
        self
    }

    pub fn with_mount(mut self, mount: MountOptions) -> Self {
        self.mount = Some(mount);
        self
    }

    pub fn with_only_check(mut self, only_check: bool) -> Self {
        self.only_check = only_check;
        self
    }
}

/// Builds tasks for one cluster.
#[derive(Clone)]
pub struct TaskFactory {
    cluster_id: String,
    storage: Arc<dyn Storage>,
}

impl fmt::Debug for TaskFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFactory")
            .field("cluster_id", &self.cluster_id)
            .finish()
    }
}

impl TaskFactory {
    pub fn new(cluster_id: impl Into<String>, storage: Arc<dyn Storage>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            storage,
        }
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Persistence key of a deployed service
    pub fn service_id(&self, dc: &DeployConfig) -> String {
        topology::service_id(&self.cluster_id, dc.id())
    }

    /// Build the batch for `step`.
    #[instrument(skip_all, fields(step = %step.step_type))]
    pub fn create_tasks(&self, step: &PlaybookStep) -> Result<Tasks> {
        let sc = SmartConfig::new(step.configs.clone());
        let mut tasks = Tasks::new(step.step_type.as_str());
        let mut seen_hosts = HashSet::new();

        for index in 0..sc.len() {
            if step.step_type.once_per_host() {
                if let Some(entity) = sc.entity(index) {
                    if !seen_hosts.insert(entity.host().to_string()) {
                        debug!(host = entity.host(), "Host already covered");
                        continue;
                    }
                }
            }

            let Some(mut task) = self.create_task(step.step_type, &sc, index, &step.options)?
            else {
                continue;
            };
            if let Some(dc) = sc.get_dc(index) {
                task.set_ids(dc.parent_id(), dc.id());
            }
            tasks.add_task(task);
        }

        debug!(tasks = tasks.len(), "Created tasks");
        Ok(tasks)
    }

    fn create_task(
        &self,
        step_type: StepType,
        sc: &SmartConfig,
        index: usize,
        options: &StepOptions,
    ) -> Result<Option<Task>> {
        let mismatch = || Error::UnknownTaskType {
            step: step_type.to_string(),
            config: sc.config_type().to_string(),
        };
        let entity = || sc.entity(index).ok_or_else(mismatch);
        let dc = || sc.get_dc(index).ok_or_else(mismatch);
        let cc = || sc.get_cc(index).ok_or_else(mismatch);

        match step_type {
            StepType::CheckSshConnect => checker::check_ssh_connect(entity()?),
            StepType::CheckPermission => checker::check_permission(dc()?),
            StepType::CheckDockerEngine => checker::check_docker_engine(entity()?),
            StepType::CheckPortInUse => checker::check_port_in_use(dc()?),
            StepType::GetHostDate => checker::get_host_date(entity()?),

            StepType::PullImage => common::pull_image(entity()?),
            StepType::CreateContainer => common::create_container(self, dc()?),
            StepType::SyncConfig => common::sync_config(self, dc()?),
            StepType::StartService => common::start_service(self, dc()?),
            StepType::StopService => common::stop_service(self, dc()?),
            StepType::RestartService => common::restart_service(self, dc()?),
            StepType::CleanService => common::clean_service(self, dc()?, options),
            StepType::InitServiceStatus => common::init_service_status(self, dc()?),
            StepType::GetServiceStatus => common::get_service_status(self, dc()?, options),

            StepType::FormatChunkfilePool => {
                bs::format_chunkfile_pool(sc.get_fc(index).ok_or_else(mismatch)?, options)
            }
            StepType::MapVolume => bs::map_volume(cc()?, options),
            StepType::UnmapVolume => bs::unmap_volume(cc()?, options),

            StepType::MountFilesystem => fs::mount_filesystem(cc()?, options),
            StepType::UmountFilesystem => fs::umount_filesystem(cc()?, options),

            StepType::RunPlayground => {
                playground::run_playground(sc.get_pc(index).ok_or_else(mismatch)?)
            }
            StepType::RemovePlayground => {
                playground::remove_playground(sc.get_pc(index).ok_or_else(mismatch)?)
            }

            StepType::StartMonitor => monitor::start_monitor(sc.get_mc(index).ok_or_else(mismatch)?),
            StepType::StopMonitor => monitor::stop_monitor(sc.get_mc(index).ok_or_else(mismatch)?),
            StepType::CleanMonitor => {
                monitor::clean_monitor(sc.get_mc(index).ok_or_else(mismatch)?, options)
            }

            StepType::StartWebsite => website::start_website(sc.get_wc(index).ok_or_else(mismatch)?),
            StepType::StopWebsite => website::stop_website(sc.get_wc(index).ok_or_else(mismatch)?),
        }
    }
}

/// Label of a task's progress line
pub(crate) fn subname(entity: &dyn Entity) -> String {
    format!("host={} role={}", entity.host(), entity.role())
}

pub(crate) fn as_entity<T: Entity + 'static>(config: &Arc<T>) -> Option<Arc<dyn Entity>> {
    Some(Arc::clone(config) as Arc<dyn Entity>)
}
