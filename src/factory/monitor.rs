//! Monitoring stack tasks.

use std::sync::Arc;

use super::{as_entity, CleanItem, StepOptions};
use crate::error::Result;
use crate::executor::Task;
use crate::steps::{
    ContainerRef, CreateContainer, CreateDirectory, InstallFile, RemoveContainer, RemoveFile,
    StartContainer, StopContainer,
};
use crate::topology::{Entity, MonitorConfig, MonitorRole};

fn subname(mc: &MonitorConfig) -> String {
    format!("host={} role={}", mc.host(), mc.monitor_role())
}

/// Scrape configuration listing every node exporter.
pub fn prometheus_config(mc: &MonitorConfig) -> String {
    let targets: Vec<String> = mc
        .variables()
        .get("node_exporter_addrs")
        .unwrap_or_default()
        .split(',')
        .filter(|t| !t.is_empty())
        .map(|t| format!("'{}'", t))
        .collect();
    format!(
        "global:\n  scrape_interval: 15s\nscrape_configs:\n  - job_name: node_exporter\n    static_configs:\n      - targets: [{}]\n",
        targets.join(", ")
    )
}

/// Replace the component's container with a fresh one and start it.
pub fn start_monitor(mc: Arc<MonitorConfig>) -> Result<Option<Task>> {
    let port = mc.listen_port().to_string();
    let name = mc.container_name();
    let data_dir = mc.data_dir().to_string();
    let mut task = Task::new("Start Monitor", subname(&mc), as_entity(&mc));

    task.add_step(RemoveContainer::new(ContainerRef::name(name.clone())));
    task.add_step(CreateDirectory::new([data_dir.as_str()]));

    let create = CreateContainer::new(mc.container_image(), name).host_network();
    let create = match mc.monitor_role() {
        MonitorRole::NodeExporter => create
            .with_volume("/", "/host:ro,rslave")
            .with_command([
                "--path.rootfs=/host".to_string(),
                format!("--web.listen-address=:{}", port),
            ]),
        MonitorRole::Prometheus => {
            if !data_dir.is_empty() {
                task.add_step(InstallFile::on_host(
                    prometheus_config(&mc),
                    format!("{}/prometheus.yml", data_dir),
                ));
            }
            create.with_volume(&data_dir, "/prometheus").with_command([
                "--config.file=/prometheus/prometheus.yml".to_string(),
                "--storage.tsdb.path=/prometheus/data".to_string(),
                format!("--web.listen-address=:{}", port),
            ])
        }
        MonitorRole::Grafana => create
            .with_volume(&data_dir, "/var/lib/grafana")
            .with_env("GF_SERVER_HTTP_PORT", &port),
    };
    task.add_step(create);
    task.add_step(StartContainer::new(ContainerRef::registered()));
    Ok(Some(task))
}

pub fn stop_monitor(mc: Arc<MonitorConfig>) -> Result<Option<Task>> {
    let mut task = Task::new("Stop Monitor", subname(&mc), as_entity(&mc));
    task.add_step(StopContainer::new(ContainerRef::name(mc.container_name())));
    Ok(Some(task))
}

/// Remove the container, plus the data directory when data cleaning is requested.
pub fn clean_monitor(mc: Arc<MonitorConfig>, options: &StepOptions) -> Result<Option<Task>> {
    let mut task = Task::new("Clean Monitor", subname(&mc), as_entity(&mc));
    task.add_step(RemoveContainer::new(ContainerRef::name(mc.container_name())));
    if options.clean_items.contains(&CleanItem::Data) {
        task.add_step(RemoveFile::new([mc.data_dir()]));
    }
    Ok(Some(task))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vars::Variable;
    use indexmap::IndexMap;

    fn prometheus() -> MonitorConfig {
        let mut config = IndexMap::new();
        config.insert("container_image".to_string(), "prom/prometheus".to_string());
        config.insert("data_dir".to_string(), "/srv/prometheus".to_string());
        MonitorConfig::new(
            MonitorRole::Prometheus,
            "10.0.0.1",
            0,
            config,
            &[Variable::immutable(
                "node_exporter_addrs",
                "10.0.0.1:9100,10.0.0.2:9100",
            )],
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_prometheus_config_lists_targets() {
        let content = prometheus_config(&prometheus());
        assert!(content.contains("targets: ['10.0.0.1:9100', '10.0.0.2:9100']"));
    }

    #[test]
    fn test_start_prometheus_installs_config() {
        let task = start_monitor(Arc::new(prometheus())).unwrap().unwrap();
        assert_eq!(
            task.step_names(),
            vec![
                "RemoveContainer",
                "CreateDirectory",
                "InstallFile",
                "CreateContainer",
                "StartContainer"
            ]
        );
    }
}
