//! Disk format entity.
//!
//! Formatting preallocates a chunkfile pool on a disk before chunkservers
//! start. The format file lists hosts and disks:
//!
//! ```yaml
//! user: curve
//! host:
//!   - 10.0.1.1
//!   - 10.0.1.2
//! disk:
//!   - /dev/sda:/data/chunkserver0:90  # device:mount_point:used_percent
//!   - /dev/sdb:/data/chunkserver1:90
//! ```
//!
//! Every host is paired with every disk.

use indexmap::IndexMap;
use serde::Deserialize;
use std::sync::Arc;

use super::{format_id, Entity, SshSettings};
use crate::connection::SshTarget;
use crate::error::{Error, Result};
use crate::vars::{Variable, Variables};

const DEFAULT_CONTAINER_IMAGE: &str = "opencurvedocker/curvebs:latest";

#[derive(Debug, Deserialize)]
struct FormatFile {
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    ssh_port: Option<u16>,
    #[serde(default)]
    private_key_file: Option<String>,
    #[serde(default)]
    container_image: Option<String>,
    host: Vec<String>,
    disk: Vec<String>,
}

/// One disk of one host.
#[derive(Debug, Clone)]
pub struct FormatConfig {
    id: String,
    host: String,
    device: String,
    mount_point: String,
    used_percent: u8,
    container_image: String,
    config: IndexMap<String, String>,
    variables: Variables,
    ssh: Option<SshTarget>,
}

impl FormatConfig {
    /// Parse a `device:mount_point:used_percent` disk spec for `host`.
    pub fn new(
        host: &str,
        disk: &str,
        sequence: usize,
        container_image: &str,
        ssh: Option<SshTarget>,
    ) -> Result<Self> {
        let parts: Vec<&str> = disk.split(':').collect();
        let [device, mount_point, percent] = parts.as_slice() else {
            return Err(Error::Topology(format!(
                "invalid disk '{}', expected device:mount_point:used_percent",
                disk
            )));
        };
        let used_percent: u8 = percent
            .parse()
            .ok()
            .filter(|p| (1..=100).contains(p))
            .ok_or_else(|| Error::Topology(format!("invalid used percent in '{}'", disk)))?;
        if !mount_point.starts_with('/') {
            return Err(Error::Topology(format!(
                "mount point '{}' must be an absolute path",
                mount_point
            )));
        }

        let mut config = IndexMap::new();
        config.insert("device".to_string(), (*device).to_string());
        config.insert("mount_point".to_string(), (*mount_point).to_string());
        config.insert("used_percent".to_string(), used_percent.to_string());

        let mut variables = Variables::new();
        variables.register(Variable::new("service_host", host))?;
        variables.register(Variable::new("service_role", "format"))?;
        variables.build()?;

        Ok(Self {
            id: format_id("format", host, sequence),
            host: host.to_string(),
            device: (*device).to_string(),
            mount_point: (*mount_point).to_string(),
            used_percent,
            container_image: container_image.to_string(),
            config,
            variables,
            ssh,
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn mount_point(&self) -> &str {
        &self.mount_point
    }

    pub fn used_percent(&self) -> u8 {
        self.used_percent
    }

    pub fn container_image(&self) -> &str {
        &self.container_image
    }

    /// Container name used while formatting this disk
    pub fn container_name(&self) -> String {
        let disk = self.mount_point.trim_matches('/').replace('/', "_");
        format!("curvebs-format-{}", disk)
    }
}

impl Entity for FormatConfig {
    fn id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> &str {
        "format"
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

/// Parse a format file.
pub fn parse_format(data: &str) -> Result<Vec<Arc<FormatConfig>>> {
    let file: FormatFile = serde_yaml::from_str(data)?;
    let ssh = SshSettings {
        user: file.user,
        port: file.ssh_port,
        private_key_file: file.private_key_file.map(Into::into),
    };
    let image = file
        .container_image
        .as_deref()
        .unwrap_or(DEFAULT_CONTAINER_IMAGE);

    let mut fcs = Vec::with_capacity(file.host.len() * file.disk.len());
    for host in &file.host {
        for (sequence, disk) in file.disk.iter().enumerate() {
            let fc = FormatConfig::new(host, disk, sequence, image, ssh.target(host))?;
            fcs.push(Arc::new(fc));
        }
    }
    Ok(fcs)
}
