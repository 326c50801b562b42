//! Management console tasks.

use std::sync::Arc;

use super::as_entity;
use crate::error::Result;
use crate::executor::Task;
use crate::steps::{
    ContainerRef, CreateContainer, CreateDirectory, RemoveContainer, StartContainer, StopContainer,
};
use crate::topology::{Entity, WebsiteConfig};

fn subname(wc: &WebsiteConfig) -> String {
    format!("host={} kind={}", wc.host(), wc.kind())
}

pub fn start_website(wc: Arc<WebsiteConfig>) -> Result<Option<Task>> {
    let mut task = Task::new("Start Website", subname(&wc), as_entity(&wc));
    task.add_step(RemoveContainer::new(ContainerRef::name(wc.container_name())));
    task.add_step(CreateDirectory::new([wc.data_dir()]));
    task.add_step(
        CreateContainer::new(wc.container_image(), wc.container_name())
            .host_network()
            .with_restart("always")
            .with_volume(wc.data_dir(), "/curve-manager/db")
            .with_env("LISTEN_PORT", wc.listen_port())
            .with_env("CLUSTER_KIND", wc.kind().as_str()),
    );
    task.add_step(StartContainer::new(ContainerRef::registered()));
    Ok(Some(task))
}

pub fn stop_website(wc: Arc<WebsiteConfig>) -> Result<Option<Task>> {
    let mut task = Task::new("Stop Website", subname(&wc), as_entity(&wc));
    task.add_step(StopContainer::new(ContainerRef::name(wc.container_name())));
    Ok(Some(task))
}
