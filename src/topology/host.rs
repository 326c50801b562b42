//! Host entity.
//!
//! Hosts are declared in their own file and referenced by name from a
//! topology. Each one carries the address and login settings used to
//! reach it.
//!
//! ```yaml
//! global:
//!   user: curve
//!   ssh_port: 22
//!   private_key_file: /home/curve/.ssh/id_rsa
//! hosts:
//!   - host: server-host1
//!     hostname: 10.0.1.1
//!   - host: server-host2
//!     hostname: 10.0.1.2
//!     labels: [client]
//! ```

use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

use super::{format_id, stringify_map, Entity, SshSettings};
use crate::connection::SshTarget;
use crate::error::{Error, Result};
use crate::vars::{Variable, Variables};

#[derive(Debug, Deserialize)]
struct HostsFile {
    #[serde(default)]
    global: serde_yaml::Mapping,
    #[serde(default)]
    hosts: Vec<serde_yaml::Mapping>,
}

/// A machine of the cluster.
#[derive(Debug, Clone)]
pub struct HostConfig {
    id: String,
    host: String,
    hostname: String,
    sequence: usize,
    labels: Vec<String>,
    config: IndexMap<String, String>,
    variables: Variables,
    ssh: Option<SshTarget>,
}

impl HostConfig {
    /// Create a host reachable at `hostname` with the given login settings.
    pub fn new(
        host: impl Into<String>,
        hostname: impl Into<String>,
        sequence: usize,
        ssh: &SshSettings,
    ) -> Result<Self> {
        let host = host.into();
        let hostname = hostname.into();
        if host.is_empty() || hostname.is_empty() {
            return Err(Error::Topology(
                "host entries need both 'host' and 'hostname'".to_string(),
            ));
        }

        let mut variables = Variables::new();
        variables.register(Variable::new("host", host.clone()))?;
        variables.register(Variable::new("hostname", hostname.clone()))?;
        variables.build()?;

        Ok(Self {
            id: format_id("host", &host, sequence),
            ssh: ssh.target(&hostname),
            host,
            hostname,
            sequence,
            labels: Vec::new(),
            config: IndexMap::new(),
            variables,
        })
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    /// Address used to connect
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn sequence(&self) -> usize {
        self.sequence
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

impl Entity for HostConfig {
    fn id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> &str {
        "host"
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

/// Parse a hosts file. Per-host settings override `global`.
pub fn parse_hosts(data: &str) -> Result<Vec<Arc<HostConfig>>> {
    let file: HostsFile = serde_yaml::from_str(data)?;
    let global = stringify_map(&file.global, "global")?;

    let mut seen = HashSet::new();
    let mut hosts = Vec::with_capacity(file.hosts.len());
    for (sequence, entry) in file.hosts.iter().enumerate() {
        let labels = entry
            .get("labels")
            .and_then(serde_yaml::Value::as_sequence)
            .map(|seq| {
                seq.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let mut scalars = serde_yaml::Mapping::new();
        for (k, v) in entry {
            if k.as_str() != Some("labels") {
                scalars.insert(k.clone(), v.clone());
            }
        }
        let mut config = global.clone();
        config.extend(stringify_map(&scalars, "hosts")?);

        let host = config.get("host").cloned().unwrap_or_default();
        let hostname = config.get("hostname").cloned().unwrap_or_default();
        if !seen.insert(host.clone()) {
            return Err(Error::DuplicateId(host));
        }

        let ssh = SshSettings::from_config(&config)?;
        let mut hc = HostConfig::new(host, hostname, sequence, &ssh)?.with_labels(labels);
        hc.config = config;
        hosts.push(Arc::new(hc));
    }
    Ok(hosts)
}
