//! Monitoring entities.
//!
//! A node exporter runs on every host of the cluster; prometheus and
//! grafana run on the host named by the monitor file:
//!
//! ```yaml
//! host: 10.0.1.1
//! node_exporter:
//!   container_image: prom/node-exporter:latest
//!   listen_port: 9100
//! prometheus:
//!   container_image: prom/prometheus:latest
//!   listen_port: 9090
//!   data_dir: /tmp/monitor/prometheus
//! grafana:
//!   container_image: grafana/grafana:latest
//!   listen_port: 3000
//! ```

use indexmap::IndexMap;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

use super::{format_id, stringify_map, DeployConfig, Entity, SshSettings};
use crate::connection::SshTarget;
use crate::error::{Error, Result};
use crate::vars::{Variable, Variables};

/// Monitoring component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitorRole {
    NodeExporter,
    Prometheus,
    Grafana,
}

impl MonitorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorRole::NodeExporter => "node_exporter",
            MonitorRole::Prometheus => "prometheus",
            MonitorRole::Grafana => "grafana",
        }
    }

    fn default_port(&self) -> &'static str {
        match self {
            MonitorRole::NodeExporter => "9100",
            MonitorRole::Prometheus => "9090",
            MonitorRole::Grafana => "3000",
        }
    }
}

impl fmt::Display for MonitorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct MonitorFile {
    host: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    ssh_port: Option<u16>,
    #[serde(default)]
    node_exporter: serde_yaml::Mapping,
    #[serde(default)]
    prometheus: serde_yaml::Mapping,
    #[serde(default)]
    grafana: serde_yaml::Mapping,
}

/// One monitoring component on one host.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    id: String,
    role: MonitorRole,
    host: String,
    config: IndexMap<String, String>,
    variables: Variables,
    ssh: Option<SshTarget>,
}

impl MonitorConfig {
    pub fn new(
        role: MonitorRole,
        host: &str,
        sequence: usize,
        mut config: IndexMap<String, String>,
        extra: &[Variable],
        ssh: Option<SshTarget>,
    ) -> Result<Self> {
        config
            .entry("listen_port".to_string())
            .or_insert_with(|| role.default_port().to_string());
        if !config.contains_key("container_image") {
            return Err(Error::Topology(format!(
                "{} requires 'container_image'",
                role
            )));
        }

        let mut variables = Variables::new();
        variables.register(Variable::new("service_role", role.as_str()))?;
        variables.register(Variable::new("service_host", host))?;
        variables.register(Variable::new(
            "service_port",
            config["listen_port"].clone(),
        ))?;
        for var in extra {
            variables.register(var.clone())?;
        }
        variables.build()?;
        for value in config.values_mut() {
            *value = variables.rendering(value)?;
        }

        Ok(Self {
            id: format_id(role.as_str(), host, sequence),
            role,
            host: host.to_string(),
            config,
            variables,
            ssh,
        })
    }

    pub fn monitor_role(&self) -> MonitorRole {
        self.role
    }

    pub fn container_image(&self) -> &str {
        self.config("container_image").unwrap_or_default()
    }

    pub fn listen_port(&self) -> &str {
        self.config("listen_port").unwrap_or_default()
    }

    pub fn data_dir(&self) -> &str {
        self.config("data_dir").unwrap_or_default()
    }

    /// Container name of this component
    pub fn container_name(&self) -> String {
        format!("curve-monitor-{}", self.role)
    }
}

impl Entity for MonitorConfig {
    fn id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> &str {
        self.role.as_str()
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn config(&self, key: &str) -> Option<&str> {
        self.config.get(key).map(String::as_str)
    }

    fn variables(&self) -> &Variables {
        &self.variables
    }

    fn ssh_target(&self) -> Option<&SshTarget> {
        self.ssh.as_ref()
    }
}

/// Parse a monitor file against the services of the cluster it watches.
pub fn parse_monitor(
    data: &str,
    dcs: &[Arc<DeployConfig>],
) -> Result<Vec<Arc<MonitorConfig>>> {
    let file: MonitorFile = serde_yaml::from_str(data)?;
    let fallback = SshSettings {
        user: file.user.clone(),
        port: file.ssh_port,
        private_key_file: None,
    };
    let ssh_for = |host: &str| {
        dcs.iter()
            .find(|dc| dc.host() == host)
            .and_then(|dc| dc.ssh_target().cloned())
            .or_else(|| fallback.target(host))
    };

    let mut hosts: Vec<&str> = Vec::new();
    for dc in dcs {
        if !hosts.contains(&dc.host()) {
            hosts.push(dc.host());
        }
    }

    let exporter_config = stringify_map(&file.node_exporter, "node_exporter")?;
    let mut mcs = Vec::new();
    for (sequence, host) in hosts.iter().enumerate() {
        mcs.push(MonitorConfig::new(
            MonitorRole::NodeExporter,
            host,
            sequence,
            exporter_config.clone(),
            &[],
            ssh_for(host),
        )?);
    }

    let exporter_port = mcs
        .first()
        .map(|mc| mc.listen_port().to_string())
        .unwrap_or_else(|| MonitorRole::NodeExporter.default_port().to_string());
    let targets = hosts
        .iter()
        .map(|h| format!("{}:{}", h, exporter_port))
        .collect::<Vec<_>>()
        .join(",");
    let prometheus = MonitorConfig::new(
        MonitorRole::Prometheus,
        &file.host,
        0,
        stringify_map(&file.prometheus, "prometheus")?,
        &[Variable::immutable("node_exporter_addrs", targets)],
        ssh_for(&file.host),
    )?;

    let prometheus_addr = format!("{}:{}", file.host, prometheus.listen_port());
    mcs.push(prometheus);

    if !file.grafana.is_empty() {
        mcs.push(MonitorConfig::new(
            MonitorRole::Grafana,
            &file.host,
            0,
            stringify_map(&file.grafana, "grafana")?,
            &[Variable::immutable("prometheus_addr", prometheus_addr)],
            ssh_for(&file.host),
        )?);
    }

    Ok(mcs.into_iter().map(Arc::new).collect())
}
