//! Client entity.
//!
//! A client config is a flat YAML map describing how a block device
//! (`curvebs`) or filesystem (`curvefs`) client reaches the cluster:
//!
//! ```yaml
//! kind: curvefs
//! container_image: opencurvedocker/curvefs:latest
//! mds.listen.addr: 10.0.1.1:6700,10.0.1.2:6700
//! log_dir: /home/curve/curvefs/client/logs
//! ```
//!
//! The host it runs on is chosen when the client is bound for a command.

use indexmap::IndexMap;

use super::{format_id, stringify_map, Entity, Kind};
use crate::connection::SshTarget;
use crate::error::{Error, Result};
use crate::vars::{Variable, Variables};

const RESERVED_KEYS: &[&str] = &["kind", "container_image", "log_dir", "data_dir", "core_dir"];

/// A client bound to one host.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    id: String,
    kind: Kind,
    host: String,
    sequence: usize,
    config: IndexMap<String, String>,
    variables: Variables,
    ssh: Option<SshTarget>,
}

impl ClientConfig {
    /// Parse a client file and bind it to `host`.
    pub fn parse(data: &str, host: &str, sequence: usize, ssh: Option<SshTarget>) -> Result<Self> {
        let map: serde_yaml::Mapping = serde_yaml::from_str(data)?;
        let config = stringify_map(&map, "client")?;
        Self::new(config, host, sequence, ssh)
    }

    /// Build a client from a raw config map.
    pub fn new(
        mut config: IndexMap<String, String>,
        host: &str,
        sequence: usize,
        ssh: Option<SshTarget>,
    ) -> Result<Self> {
        let kind: Kind = config
            .get("kind")
            .ok_or_else(|| Error::Topology("client config requires 'kind'".to_string()))?
            .parse()?;

        let mut variables = Variables::new();
        variables.register(Variable::new("prefix", format!("/{}/client", kind)))?;
        variables.register(Variable::new("service_role", "client"))?;
        variables.register(Variable::new("service_host", host))?;
        variables.register(Variable::new("service_host_sequence", sequence.to_string()))?;
        variables.build()?;

        for value in config.values_mut() {
            *value = variables.rendering(value)?;
        }

        Ok(Self {
            id: format_id("client", host, sequence),
            kind,
            host: host.to_string(),
            sequence,
            config,
            variables,
            ssh,
        })
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn sequence(&self) -> usize {
        self.sequence
    }

    pub fn container_image(&self) -> &str {
        self.config("container_image").unwrap_or_default()
    }

    pub fn log_dir(&self) -> &str {
        self.config("log_dir").unwrap_or_default()
    }

    pub fn data_dir(&self) -> &str {
        self.config("data_dir").unwrap_or_default()
    }

    pub fn core_dir(&self) -> &str {
        self.config("core_dir").unwrap_or_default()
    }

    /// Addresses of the cluster's mds
    pub fn mds_addr(&self) -> &str {
        self.config("mds.listen.addr").unwrap_or_default()
    }

    /// Render the client configuration file content (`key=value` lines).
    pub fn service_config_content(&self) -> String {
        self.config
            .iter()
            .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
            .map(|(k, v)| format!("{}={}\n", k, v))
            .collect()
    }
}

impl Entity for ClientConfig {
    fn id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> &str {
        "client"
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_client() {
        let data = "kind: curvefs\ncontainer_image: curvefs:v2\nmds.listen.addr: 10.0.1.1:6700\nlog_dir: /logs/${service_role}\n";
        let cc = ClientConfig::parse(data, "10.0.2.1", 0, None).unwrap();

        assert_eq!(cc.id(), "client_10.0.2.1_0");
        assert_eq!(cc.kind(), Kind::CurveFs);
        assert_eq!(cc.log_dir(), "/logs/client");
        assert_eq!(cc.mds_addr(), "10.0.1.1:6700");
        assert_eq!(cc.service_config_content(), "mds.listen.addr=10.0.1.1:6700\n");
    }

    #[test]
    fn test_client_requires_kind() {
        assert!(matches!(
            ClientConfig::parse("container_image: x\n", "h", 0, None),
            Err(Error::Topology(_))
        ));
    }
}
