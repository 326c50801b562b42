//! Service deployment entity.
//!
//! One [`DeployConfig`] per service replica. Construction happens in
//! three phases driven by the topology parser:
//!
//! 1. [`DeployConfig::new`] merges role defaults with the declared config,
//!    registers the user and service variables and resolves the service
//!    ones;
//! 2. [`DeployConfig::register_cluster_variables`] adds the immutable
//!    aggregates computed from every sibling and resolves the whole scope,
//!    so user variables may refer to `${cluster_*}`;
//! 3. [`DeployConfig::build`] renders every config value.

use indexmap::IndexMap;
use serde::Serialize;

use super::{format_named_id, Entity, Kind, Role};
use crate::connection::SshTarget;
use crate::error::{Error, Result};
use crate::vars::{Variable, Variables};

/// Keys consumed by clusterdeck itself and never written to a service
/// configuration file.
const RESERVED_KEYS: &[&str] = &[
    "container_image",
    "log_dir",
    "data_dir",
    "core_dir",
    "user",
    "ssh_port",
    "private_key_file",
];

/// Raw description of one replica, as produced by the topology parser.
#[derive(Debug, Clone)]
pub struct DeployItem {
    pub kind: Kind,
    pub role: Role,
    pub host: String,
    pub name: Option<String>,
    pub replicas: usize,
    pub host_sequence: usize,
    pub replicas_sequence: usize,
    /// Merged, unrendered config (global < role < deploy item)
    pub config: IndexMap<String, String>,
    pub ssh: Option<SshTarget>,
}

/// A fully built service replica.
#[derive(Debug, Clone, Serialize)]
pub struct DeployConfig {
    kind: Kind,
    role: Role,
    host: String,
    name: Option<String>,
    replicas: usize,
    host_sequence: usize,
    replicas_sequence: usize,
    id: String,
    parent_id: String,
    config: IndexMap<String, String>,
    variables: Variables,
    #[serde(skip)]
    ssh: Option<SshTarget>,
}

impl DeployConfig {
    /// Create a replica and resolve its service variables.
    pub fn new(item: DeployItem, user_vars: &Variables) -> Result<Self> {
        if !item.kind.roles().contains(&item.role) {
            return Err(Error::Topology(format!(
                "role '{}' is not part of a {} cluster",
                item.role, item.kind
            )));
        }

        let (id, parent_id) = match &item.name {
            Some(name) => {
                let id = format_named_id(item.role.as_str(), &item.host, name);
                (id.clone(), id)
            }
            None => (
                replica_id(item.role, &item.host, item.host_sequence, item.replicas_sequence),
                replica_id(item.role, &item.host, item.host_sequence, 0),
            ),
        };

        let mut config: IndexMap<String, String> = item
            .role
            .default_config()
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        config.extend(item.config);

        let mut dc = Self {
            kind: item.kind,
            role: item.role,
            host: item.host,
            name: item.name,
            replicas: item.replicas,
            host_sequence: item.host_sequence,
            replicas_sequence: item.replicas_sequence,
            id,
            parent_id,
            config,
            variables: Variables::new(),
            ssh: item.ssh,
        };

        for var in user_vars.iter() {
            dc.variables.register(var.clone())?;
        }
        let service_vars = dc.service_variables();
        let names: Vec<String> = service_vars.iter().map(|v| v.name.clone()).collect();
        for var in service_vars {
            dc.variables.register(var)?;
        }
        dc.variables.build_only(&names)?;
        Ok(dc)
    }

    fn service_variables(&self) -> Vec<Variable> {
        let raw = |key: &str| self.config.get(key).cloned().unwrap_or_default();
        let external_addr = self
            .config
            .get("listen.external_ip")
            .cloned()
            .unwrap_or_else(|| "${service_addr}".to_string());
        let external_port = self
            .config
            .get("listen.external_port")
            .cloned()
            .unwrap_or_else(|| "${service_port}".to_string());

        vec![
            Variable::new("prefix", format!("/{}/{}", self.kind, self.role))
                .with_description("Service project layout root inside the container"),
            Variable::new("service_id", self.id.clone()),
            Variable::new("service_role", self.role.as_str()),
            Variable::new("service_host", self.host.clone()),
            Variable::new("service_host_sequence", self.host_sequence.to_string()),
            Variable::new("service_replicas_sequence", self.replicas_sequence.to_string()),
            Variable::new(
                "format_replicas_sequence",
                format!("{:02}", self.replicas_sequence),
            )
            .with_description("Replica sequence padded to two digits"),
            Variable::new("service_addr", raw("listen.ip")),
            Variable::new("service_port", raw("listen.port")),
            Variable::new("service_client_port", raw("listen.client_port")),
            Variable::new("service_dummy_port", raw("listen.dummy_port")),
            Variable::new("service_proxy_port", raw("listen.proxy_port")),
            Variable::new("service_external_addr", external_addr),
            Variable::new("service_external_port", external_port),
            Variable::new("log_dir", raw("log_dir")),
            Variable::new("data_dir", raw("data_dir")),
            Variable::new("core_dir", raw("core_dir")),
        ]
    }

    /// Register immutable cluster-wide variables and resolve the scope.
    pub fn register_cluster_variables(&mut self, cluster: &Variables) -> Result<()> {
        for var in cluster.iter() {
            self.variables.register(var.clone())?;
        }
        self.variables.build()?;
        Ok(())
    }

    /// Render every config value against the resolved scope.
    pub fn build(&mut self) -> Result<()> {
        for value in self.config.values_mut() {
            *value = self.variables.rendering(value)?;
        }
        Ok(())
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn service_role(&self) -> Role {
        self.role
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }

    pub fn host_sequence(&self) -> usize {
        self.host_sequence
    }

    pub fn replicas_sequence(&self) -> usize {
        self.replicas_sequence
    }

    /// Id of replica 0 of the same deploy item; links replicas for status rows.
    pub fn parent_id(&self) -> &str {
        &self.parent_id
    }

    pub fn container_image(&self) -> &str {
        self.config("container_image").unwrap_or_default()
    }

    pub fn listen_ip(&self) -> &str {
        self.variables.get("service_addr").unwrap_or_default()
    }

    pub fn listen_port(&self) -> &str {
        self.variables.get("service_port").unwrap_or_default()
    }

    pub fn listen_client_port(&self) -> &str {
        self.variables.get("service_client_port").unwrap_or_default()
    }

    pub fn listen_dummy_port(&self) -> &str {
        self.variables.get("service_dummy_port").unwrap_or_default()
    }

    pub fn listen_proxy_port(&self) -> &str {
        self.variables.get("service_proxy_port").unwrap_or_default()
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

    /// Project root of the service inside its container
    pub fn prefix(&self) -> String {
        format!("/{}/{}", self.kind, self.role)
    }

    /// Ports the service listens on, for port-in-use checks
    pub fn ports(&self) -> Vec<u16> {
        [
            self.listen_port(),
            self.listen_client_port(),
            self.listen_dummy_port(),
            self.listen_proxy_port(),
        ]
        .iter()
        .filter_map(|p| p.parse().ok())
        .collect()
    }

    /// Entries written to the service configuration file
    pub fn service_config(&self) -> impl Iterator<Item = (&str, &str)> {
        self.config
            .iter()
            .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Render the service configuration file content (`key=value` lines).
    pub fn service_config_content(&self) -> String {
        let mut content = String::new();
        for (key, value) in self.service_config() {
            content.push_str(key);
            content.push('=');
            content.push_str(value);
            content.push('\n');
        }
        content
    }

    /// Attach SSH settings after construction
    pub fn with_ssh(mut self, target: SshTarget) -> Self {
        self.ssh = Some(target);
        self
    }
}

fn replica_id(role: Role, host: &str, host_sequence: usize, replicas_sequence: usize) -> String {
    format!(
        "{}_{}_{}_{}",
        role.as_str(),
        host,
        host_sequence,
        replicas_sequence
    )
}

impl Entity for DeployConfig {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vars::VarsError;
    use pretty_assertions::assert_eq;

    fn item(role: Role, host: &str, host_sequence: usize, replicas_sequence: usize) -> DeployItem {
        DeployItem {
            kind: Kind::CurveBs,
            role,
            host: host.to_string(),
            name: None,
            replicas: 1,
            host_sequence,
            replicas_sequence,
            config: IndexMap::new(),
            ssh: None,
        }
    }

    #[test]
    fn test_ids() {
        let dc = DeployConfig::new(item(Role::Chunkserver, "h1", 2, 1), &Variables::new()).unwrap();
        assert_eq!(dc.id(), "chunkserver_h1_2_1");
        assert_eq!(dc.parent_id(), "chunkserver_h1_2_0");

        let mut named = item(Role::Etcd, "h1", 0, 0);
        named.name = Some("etcd-a".to_string());
        let dc = DeployConfig::new(named, &Variables::new()).unwrap();
        assert_eq!(dc.id(), "etcd_h1_etcd-a");
        assert_eq!(dc.parent_id(), "etcd_h1_etcd-a");
    }

    #[test]
    fn test_service_variables() {
        let mut it = item(Role::Chunkserver, "10.0.0.1", 0, 3);
        it.config
            .insert("listen.port".to_string(), "82${format_replicas_sequence}".to_string());
        it.config
            .insert("data_dir".to_string(), "${home}/${service_role}".to_string());
        let mut user = Variables::new();
        user.register(Variable::new("home", "/data")).unwrap();

        let mut dc = DeployConfig::new(it, &user).unwrap();
        dc.build().unwrap();

        assert_eq!(dc.listen_ip(), "10.0.0.1");
        assert_eq!(dc.listen_port(), "8203");
        assert_eq!(dc.data_dir(), "/data/chunkserver");
        assert_eq!(dc.config("listen.ip"), Some("10.0.0.1"));
        assert_eq!(dc.variables().get("prefix"), Some("/curvebs/chunkserver"));
        assert_eq!(dc.variables().get("service_external_port"), Some("8203"));
        assert_eq!(dc.ports(), vec![8203]);
    }

    #[test]
    fn test_unresolved_config_reference() {
        let mut it = item(Role::Mds, "h1", 0, 0);
        it.config
            .insert("mds.extra".to_string(), "${nowhere}".to_string());
        let mut dc = DeployConfig::new(it, &Variables::new()).unwrap();
        let err = dc.build().unwrap_err();
        assert!(matches!(
            err,
            Error::Vars(VarsError::UnresolvedReference(ref name)) if name == "nowhere"
        ));
    }

    #[test]
    fn test_role_must_match_kind() {
        let mut it = item(Role::Metaserver, "h1", 0, 0);
        it.kind = Kind::CurveBs;
        assert!(matches!(
            DeployConfig::new(it, &Variables::new()),
            Err(Error::Topology(_))
        ));
    }

    #[test]
    fn test_service_config_content_skips_reserved() {
        let mut it = item(Role::Etcd, "h1", 0, 0);
        it.config
            .insert("container_image".to_string(), "curvebs:v1".to_string());
        let mut dc = DeployConfig::new(it, &Variables::new()).unwrap();
        dc.build().unwrap();

        let content = dc.service_config_content();
        assert!(content.contains("listen.ip=h1\n"));
        assert!(content.contains("listen.client_port=2379\n"));
        assert!(!content.contains("container_image"));
        assert_eq!(dc.container_image(), "curvebs:v1");
    }
}
