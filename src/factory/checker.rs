//! Pre-flight checks run before a deployment.

use std::sync::Arc;

use super::{as_entity, subname};
use crate::error::{Error, Result};
use crate::executor::{Context, Task};
use crate::steps::{quote, Command, CreateDirectory, Lambda};
use crate::topology::{DeployConfig, Entity};

/// Register key of the host's clock, in seconds since the epoch
pub const HOST_DATE: &str = "host_date";
/// Register key of the host clock minus the local clock, in seconds
pub const TIME_SKEW: &str = "time_skew";

pub fn check_ssh_connect(entity: Arc<dyn Entity>) -> Result<Option<Task>> {
    let mut task = Task::new("Check SSH Connect", format!("host={}", entity.host()), Some(entity));
    task.add_step(Command::new("CheckSshConnect", "hostname").capture("hostname"));
    Ok(Some(task))
}

/// Directories must be creatable and writable, and docker usable by the login user.
pub fn check_permission(dc: Arc<DeployConfig>) -> Result<Option<Task>> {
    let dirs: Vec<&str> = [dc.log_dir(), dc.data_dir(), dc.core_dir()]
        .into_iter()
        .filter(|d| !d.is_empty())
        .collect();

    let mut task = Task::new("Check Permission", subname(dc.as_ref()), as_entity(&dc));
    task.add_step(CreateDirectory::new(dirs.iter().copied()));
    if !dirs.is_empty() {
        let test = dirs
            .iter()
            .map(|d| format!("test -w {}", quote(d)))
            .collect::<Vec<_>>()
            .join(" && ");
        task.add_step(Command::new("CheckWritable", test));
    }
    task.add_step(Command::new(
        "CheckDockerPermission",
        "docker info --format '{{.ServerVersion}}'",
    ));
    Ok(Some(task))
}

pub fn check_docker_engine(entity: Arc<dyn Entity>) -> Result<Option<Task>> {
    let mut task = Task::new(
        "Check Docker Engine",
        format!("host={}", entity.host()),
        Some(entity),
    );
    task.add_step(
        Command::new(
            "GetDockerVersion",
            "docker version --format '{{.Server.Version}}'",
        )
        .capture("docker_version"),
    );
    task.add_step(Lambda::new("CheckDockerVersion", |ctx: &mut Context| {
        match ctx.register().get_str("docker_version") {
            Some(version) if !version.is_empty() => Ok(()),
            _ => Err(Error::step_execution(
                "CheckDockerVersion",
                format!("docker engine not running on {}", ctx.host()),
            )),
        }
    }));
    Ok(Some(task))
}

/// Fails when any service port is already bound on the host.
pub fn check_port_in_use(dc: Arc<DeployConfig>) -> Result<Option<Task>> {
    let ports = dc.ports();
    if ports.is_empty() {
        return Ok(None);
    }

    let mut task = Task::new("Check Port In Use", subname(dc.as_ref()), as_entity(&dc));
    task.add_step(
        Command::new("ListListeningPorts", "ss -tlnH | awk '{print $4}'").capture("listening"),
    );
    task.add_step(Lambda::new("CheckPortInUse", move |ctx: &mut Context| {
        let listening = ctx.register().get_str("listening").unwrap_or_default();
        let busy = ports_in_use(listening, &ports);
        if busy.is_empty() {
            return Ok(());
        }
        let busy: Vec<String> = busy.iter().map(ToString::to_string).collect();
        Err(Error::step_execution(
            "CheckPortInUse",
            format!("port {} already in use on {}", busy.join(","), ctx.host()),
        ))
    }));
    Ok(Some(task))
}

/// Ports among `ports` that appear as the local address of a listener.
fn ports_in_use(listening: &str, ports: &[u16]) -> Vec<u16> {
    let bound: Vec<u16> = listening
        .lines()
        .filter_map(|addr| addr.trim().rsplit(':').next())
        .filter_map(|p| p.parse().ok())
        .collect();
    ports.iter().copied().filter(|p| bound.contains(p)).collect()
}

/// Records the host clock and its skew against the local clock.
pub fn get_host_date(entity: Arc<dyn Entity>) -> Result<Option<Task>> {
    let mut task = Task::new("Get Host Date", format!("host={}", entity.host()), Some(entity));
    task.add_step(Command::new("GetHostDate", "date +%s").capture(HOST_DATE));
    task.add_step(Lambda::new("ParseHostDate", |ctx: &mut Context| {
        let raw = ctx.register().get_str(HOST_DATE).unwrap_or_default();
        let seconds: i64 = raw.trim().parse().map_err(|_| {
            Error::step_execution("ParseHostDate", format!("unexpected date output '{}'", raw))
        })?;
        let skew = seconds - chrono::Utc::now().timestamp();
        ctx.register_mut().set(HOST_DATE, seconds);
        ctx.register_mut().set(TIME_SKEW, skew);
        Ok(())
    }));
    Ok(Some(task))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ports_in_use() {
        let listening = "0.0.0.0:22\n127.0.0.1:2379\n[::]:6700\n*:80\n";
        assert_eq!(ports_in_use(listening, &[2379, 2380, 6700]), vec![2379, 6700]);
        assert!(ports_in_use("", &[2379]).is_empty());
    }
}
