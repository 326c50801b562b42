//! Block storage tasks: disk formatting and volume mapping.

use std::sync::Arc;

use super::{as_entity, StepOptions};
use crate::error::{Error, Result};
use crate::executor::Task;
use crate::steps::{
    quote, CleanStaged, Command, ContainerExec, ContainerRef, CreateContainer, CreateDirectory,
    InstallFile, RemoveContainer, StartContainer,
};
use crate::topology::{service_id, ClientConfig, Entity, FormatConfig, Kind};

const FORMAT_BINARY: &str = "/curvebs/tools/sbin/curve_format";
const CHUNKFILE_POOL: &str = "/data/chunkfilepool";
const NBD_CONFIG_PATH: &str = "/curvebs/nbd/conf/client.conf";

/// Register key of the used percentage reported by `df`
pub const USED_PERCENT: &str = "used_percent";
/// Register key of the format container status
pub const FORMAT_STATUS: &str = "format_status";
/// Register key of the mapped block device
pub const NBD_DEVICE: &str = "nbd_device";

/// Format a disk into a chunkfile pool, or report progress with `only_check`.
pub fn format_chunkfile_pool(fc: Arc<FormatConfig>, options: &StepOptions) -> Result<Option<Task>> {
    let device = fc.device().to_string();
    let mount_point = fc.mount_point().to_string();
    let subname = format!("host={} device={}", fc.host(), device);
    let mut task = Task::new("Format Chunkfile Pool", subname, as_entity(&fc));

    if options.only_check {
        task.add_step(
            Command::new(
                "GetUsedPercent",
                format!("df --output=pcent {} | tail -n 1", quote(&mount_point)),
            )
            .capture(USED_PERCENT),
        );
        task.add_step(
            Command::new(
                "GetFormatStatus",
                format!(
                    "docker ps -a --filter name={} --format '{{{{.Status}}}}'",
                    quote(&fc.container_name())
                ),
            )
            .capture(FORMAT_STATUS),
        );
        return Ok(Some(task));
    }

    let pool = CHUNKFILE_POOL;
    task.add_step(Command::new(
        "UmountDevice",
        format!("umount -l {} || true", quote(&device)),
    ));
    task.add_step(Command::new("MkfsDevice", format!("mkfs.ext4 -F {}", quote(&device))));
    task.add_step(CreateDirectory::new([mount_point.as_str()]));
    task.add_step(Command::new(
        "MountDevice",
        format!("mount {} {}", quote(&device), quote(&mount_point)),
    ));
    task.add_step(Command::new(
        "RemoveFormatContainer",
        format!("docker rm -f {} || true", quote(&fc.container_name())),
    ));
    task.add_step(
        CreateContainer::new(fc.container_image(), fc.container_name())
            .with_volume(&mount_point, "/data")
            .with_entrypoint(FORMAT_BINARY)
            .with_command([
                format!("-filePoolDir={}", pool),
                format!("-filePoolMetaPath={}.meta", pool),
                format!("-fileSystemPath={}", pool),
                "-allocateByPercent=true".to_string(),
                format!("-allocatePercent={}", fc.used_percent()),
            ]),
    );
    task.add_step(StartContainer::new(ContainerRef::registered()));
    Ok(Some(task))
}

fn require_map(cc: &ClientConfig, options: &StepOptions) -> Result<(String, String)> {
    if cc.kind() != Kind::CurveBs {
        return Err(Error::step_execution(
            "MAP_VOLUME",
            format!("client of kind {} cannot map volumes", cc.kind()),
        ));
    }
    let map = options
        .map
        .as_ref()
        .ok_or_else(|| Error::step_execution("MAP_VOLUME", "no volume given"))?;
    let name = format!(
        "curvebs-volume-{}",
        service_id(&map.user, &map.volume)
    );
    let target = format!("cbd:pool/{}_{}_", map.volume, map.user);
    Ok((name, target))
}

/// Start an nbd container on the client host and map the volume through it.
pub fn map_volume(cc: Arc<ClientConfig>, options: &StepOptions) -> Result<Option<Task>> {
    let (name, target) = require_map(&cc, options)?;
    let subname = format!("host={} volume={}", cc.host(), target);
    let mut task = Task::new("Map Volume", subname, as_entity(&cc));

    task.add_step(CreateDirectory::new([cc.log_dir()]));
    task.add_step(
        CreateContainer::new(cc.container_image(), name)
            .privileged()
            .host_network()
            .with_volume("/dev", "/dev")
            .with_volume("/lib/modules", "/lib/modules")
            .with_volume(cc.log_dir(), "/curvebs/nbd/logs")
            .with_entrypoint("sleep")
            .with_command(["infinity"]),
    );
    task.add_step(StartContainer::new(ContainerRef::registered()));
    task.add_step(InstallFile::in_container(
        cc.service_config_content(),
        ContainerRef::registered(),
        NBD_CONFIG_PATH,
    ));
    if let Some(map) = options.map.as_ref().filter(|m| m.create) {
        task.add_step(ContainerExec::new(
            ContainerRef::registered(),
            format!(
                "curve create --filename /{} --length {} --user {} || true",
                quote(&map.volume),
                quote(&map.size),
                quote(&map.user)
            ),
        ));
    }
    task.add_step(
        ContainerExec::new(
            ContainerRef::registered(),
            format!("curve-nbd map {}", quote(&target)),
        )
        .capture(NBD_DEVICE),
    );
    task.add_post_step(CleanStaged);
    Ok(Some(task))
}

/// Unmap the volume and remove its nbd container.
pub fn unmap_volume(cc: Arc<ClientConfig>, options: &StepOptions) -> Result<Option<Task>> {
    let (name, target) = require_map(&cc, options)?;
    let subname = format!("host={} volume={}", cc.host(), target);
    let mut task = Task::new("Unmap Volume", subname, as_entity(&cc));
    task.add_step(ContainerExec::new(
        ContainerRef::name(name.clone()),
        format!("curve-nbd unmap {}", quote(&target)),
    ));
    task.add_step(RemoveContainer::new(ContainerRef::name(name)));
    Ok(Some(task))
}
