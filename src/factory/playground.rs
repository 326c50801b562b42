//! Local sandbox tasks.

use std::sync::Arc;

use super::as_entity;
use crate::error::Result;
use crate::executor::Task;
use crate::steps::{ContainerRef, CreateContainer, PullImage, RemoveContainer, StartContainer};
use crate::topology::PlaygroundConfig;

pub fn run_playground(pc: Arc<PlaygroundConfig>) -> Result<Option<Task>> {
    let subname = format!("name={} kind={}", pc.name(), pc.kind());
    let mut task = Task::new("Run Playground", subname, as_entity(&pc));
    task.add_step(PullImage::new(pc.container_image()));
    task.add_step(
        CreateContainer::new(pc.container_image(), pc.container_name())
            .privileged()
            .with_env("PLAYGROUND_NAME", pc.name()),
    );
    task.add_step(StartContainer::new(ContainerRef::registered()));
    Ok(Some(task))
}

pub fn remove_playground(pc: Arc<PlaygroundConfig>) -> Result<Option<Task>> {
    let subname = format!("name={} kind={}", pc.name(), pc.kind());
    let mut task = Task::new("Remove Playground", subname, as_entity(&pc));
    task.add_step(RemoveContainer::new(ContainerRef::name(pc.container_name())));
    Ok(Some(task))
}
