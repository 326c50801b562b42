//! Filesystem client tasks.

use std::sync::Arc;

use super::{as_entity, MountOptions, StepOptions};
use crate::error::{Error, Result};
use crate::executor::Task;
use crate::steps::{
    quote, CleanStaged, Command, ContainerRef, CreateContainer, CreateDirectory, InstallFile,
    RemoveContainer, StartContainer,
};
use crate::topology::{service_id, ClientConfig, Entity, Kind};

const CLIENT_MOUNT_POINT: &str = "/curvefs/client/mnt";
const CLIENT_CONFIG_PATH: &str = "/curvefs/client/conf/client.conf";

fn require_mount<'a>(cc: &ClientConfig, options: &'a StepOptions) -> Result<&'a MountOptions> {
    if cc.kind() != Kind::CurveFs {
        return Err(Error::step_execution(
            "MOUNT_FILESYSTEM",
            format!("client of kind {} cannot mount filesystems", cc.kind()),
        ));
    }
    options
        .mount
        .as_ref()
        .ok_or_else(|| Error::step_execution("MOUNT_FILESYSTEM", "no mount point given"))
}

/// Container name of the fuse client serving `mount_point` on `host`
pub fn mount_container_name(host: &str, mount_point: &str) -> String {
    format!("curvefs-filesystem-{}", service_id(host, mount_point))
}

/// Run a fuse client container that mounts the filesystem on the host.
pub fn mount_filesystem(cc: Arc<ClientConfig>, options: &StepOptions) -> Result<Option<Task>> {
    let mount = require_mount(&cc, options)?;
    let subname = format!("host={} mount={}", cc.host(), mount.mount_point);
    let mut task = Task::new("Mount Filesystem", subname, as_entity(&cc));

    task.add_step(CreateDirectory::new([
        mount.mount_point.as_str(),
        cc.log_dir(),
    ]));
    task.add_step(
        CreateContainer::new(
            cc.container_image(),
            mount_container_name(cc.host(), &mount.mount_point),
        )
        .privileged()
        .host_network()
        .with_device("/dev/fuse")
        .with_cap_add("SYS_ADMIN")
        .with_volume(&mount.mount_point, &format!("{}:shared", CLIENT_MOUNT_POINT))
        .with_volume(cc.log_dir(), "/curvefs/client/logs")
        .with_volume(cc.core_dir(), "/core")
        .with_entrypoint("/entrypoint.sh")
        .with_command([
            "--role".to_string(),
            "client".to_string(),
            format!("--args=-o fsname={} -f {}", mount.fs_name, CLIENT_MOUNT_POINT),
        ]),
    );
    task.add_step(InstallFile::in_container(
        cc.service_config_content(),
        ContainerRef::registered(),
        CLIENT_CONFIG_PATH,
    ));
    task.add_step(StartContainer::new(ContainerRef::registered()));
    task.add_post_step(CleanStaged);
    Ok(Some(task))
}

/// Lazily unmount and remove the client container.
pub fn umount_filesystem(cc: Arc<ClientConfig>, options: &StepOptions) -> Result<Option<Task>> {
    let mount = require_mount(&cc, options)?;
    let subname = format!("host={} mount={}", cc.host(), mount.mount_point);
    let name = mount_container_name(cc.host(), &mount.mount_point);
    let mut task = Task::new("Umount Filesystem", subname, as_entity(&cc));
    task.add_step(Command::new(
        "UmountFilesystem",
        format!("umount -l {} || true", quote(&mount.mount_point)),
    ));
    task.add_step(RemoveContainer::new(ContainerRef::name(name)));
    Ok(Some(task))
}
