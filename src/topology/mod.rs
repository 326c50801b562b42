//! Configuration model for clusterdeck.
//!
//! A topology file describes which services of a storage cluster run on
//! which hosts. Parsing it yields fully built, immutable entities that
//! the playbook layer shares read-only through `Arc`:
//!
//! - [`DeployConfig`]: one service instance (etcd, mds, chunkserver, ...)
//! - [`ClientConfig`]: a block-device or filesystem client
//! - [`FormatConfig`]: one disk to format into a chunkfile pool
//! - [`HostConfig`]: a machine and how to reach it
//! - [`MonitorConfig`]: one monitoring component
//! - [`WebsiteConfig`]: the management console
//! - [`PlaygroundConfig`]: a local all-in-one sandbox
//!
//! All of them implement [`Entity`], the uniform view consumed by tasks.

pub mod client;
pub mod cluster;
pub mod deploy;
pub mod format;
pub mod host;
pub mod monitor;
pub mod parser;
pub mod playground;
pub mod website;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::connection::SshTarget;
use crate::error::{Error, Result};
use crate::vars::Variables;

pub use client::ClientConfig;
pub use cluster::cluster_variables;
pub use deploy::{DeployConfig, DeployItem};
pub use format::{parse_format, FormatConfig};
pub use host::{parse_hosts, HostConfig};
pub use monitor::{parse_monitor, MonitorConfig, MonitorRole};
pub use parser::{parse_topology, select};
pub use playground::PlaygroundConfig;
pub use website::{parse_website, WebsiteConfig};

/// Uniform accessor contract shared by every configuration entity.
pub trait Entity: fmt::Debug + Send + Sync {
    /// Unique id within a run
    fn id(&self) -> &str;

    /// Role of the unit (`etcd`, `client`, `host`, ...)
    fn role(&self) -> &str;

    /// Host the unit lives on
    fn host(&self) -> &str;

    /// Rendered configuration value
    fn config(&self, key: &str) -> Option<&str>;

    /// Resolved variable scope
    fn variables(&self) -> &Variables;

    /// How to reach the host; `None` runs locally
    fn ssh_target(&self) -> Option<&SshTarget>;
}

/// Cluster kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    /// Block storage
    CurveBs,
    /// Filesystem
    CurveFs,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::CurveBs => "curvebs",
            Kind::CurveFs => "curvefs",
        }
    }

    /// Service roles a topology of this kind may declare, in deploy order.
    pub fn roles(&self) -> &'static [Role] {
        match self {
            Kind::CurveBs => &[Role::Etcd, Role::Mds, Role::Chunkserver, Role::Snapshotclone],
            Kind::CurveFs => &[Role::Etcd, Role::Mds, Role::Metaserver],
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "curvebs" => Ok(Kind::CurveBs),
            "curvefs" => Ok(Kind::CurveFs),
            other => Err(Error::Topology(format!("unknown kind '{}'", other))),
        }
    }
}

/// Service role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Etcd,
    Mds,
    Chunkserver,
    Snapshotclone,
    Metaserver,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Etcd => "etcd",
            Role::Mds => "mds",
            Role::Chunkserver => "chunkserver",
            Role::Snapshotclone => "snapshotclone",
            Role::Metaserver => "metaserver",
        }
    }

    /// Name of the service configuration file inside the container
    pub fn config_file(&self) -> &'static str {
        match self {
            Role::Etcd => "etcd.conf",
            Role::Mds => "mds.conf",
            Role::Chunkserver => "chunkserver.conf",
            Role::Snapshotclone => "snapshot_clone_server.conf",
            Role::Metaserver => "metaserver.conf",
        }
    }

    /// Defaults applied beneath every other config layer
    pub(crate) fn default_config(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Role::Etcd => &[
                ("listen.ip", "${service_host}"),
                ("listen.port", "2380"),
                ("listen.client_port", "2379"),
            ],
            Role::Mds => &[
                ("listen.ip", "${service_host}"),
                ("listen.port", "6700"),
                ("listen.dummy_port", "7700"),
            ],
            Role::Chunkserver => &[("listen.ip", "${service_host}"), ("listen.port", "8200")],
            Role::Snapshotclone => &[
                ("listen.ip", "${service_host}"),
                ("listen.port", "5555"),
                ("listen.dummy_port", "8081"),
                ("listen.proxy_port", "8080"),
            ],
            Role::Metaserver => &[("listen.ip", "${service_host}"), ("listen.port", "6800")],
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "etcd" => Ok(Role::Etcd),
            "mds" => Ok(Role::Mds),
            "chunkserver" => Ok(Role::Chunkserver),
            "snapshotclone" => Ok(Role::Snapshotclone),
            "metaserver" => Ok(Role::Metaserver),
            other => Err(Error::Topology(format!("unknown role '{}'", other))),
        }
    }
}

/// Login settings shared by the entities of one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SshSettings {
    pub user: Option<String>,
    pub port: Option<u16>,
    pub private_key_file: Option<PathBuf>,
}

impl SshSettings {
    /// Read `user`, `ssh_port` and `private_key_file` out of a config map.
    pub fn from_config(config: &IndexMap<String, String>) -> Result<Self> {
        let port = config
            .get("ssh_port")
            .map(|p| {
                p.parse::<u16>()
                    .map_err(|_| Error::Topology(format!("invalid ssh_port '{}'", p)))
            })
            .transpose()?;
        Ok(Self {
            user: config.get("user").cloned(),
            port,
            private_key_file: config.get("private_key_file").map(PathBuf::from),
        })
    }

    /// Target for `address`, or `None` when no login user is known.
    pub fn target(&self, address: &str) -> Option<SshTarget> {
        let user = self.user.as_ref()?;
        let mut target = SshTarget::new(address, user.clone());
        if let Some(port) = self.port {
            target = target.with_port(port);
        }
        if let Some(key) = &self.private_key_file {
            target = target.with_private_key(key.clone());
        }
        Some(target)
    }
}

/// Id of a unit identified by a plain sequence number.
pub fn format_id(role: &str, host: &str, sequence: usize) -> String {
    format!("{}_{}_{}", role, host, sequence)
}

/// Id of a unit that carries an explicit name.
pub fn format_named_id(role: &str, host: &str, name: &str) -> String {
    format!("{}_{}_{}", role, host, name)
}

/// Persistence key of a service: the first 12 hex digits of
/// `md5("{cluster_id}_{entity_id}")`.
pub fn service_id(cluster_id: &str, entity_id: &str) -> String {
    let digest = md5::compute(format!("{}_{}", cluster_id, entity_id));
    let hex = format!("{:x}", digest);
    hex[..12].to_string()
}

/// Flatten a YAML mapping of scalars into strings, keeping key order.
pub(crate) fn stringify_map(
    value: &serde_yaml::Mapping,
    context: &str,
) -> Result<IndexMap<String, String>> {
    let mut out = IndexMap::new();
    for (key, value) in value {
        let key = scalar_to_string(key)
            .ok_or_else(|| Error::Topology(format!("{}: config keys must be scalars", context)))?;
        let value = scalar_to_string(value).ok_or_else(|| {
            Error::Topology(format!("{}: value of '{}' must be a scalar", context, key))
        })?;
        out.insert(key, value);
    }
    Ok(out)
}

pub(crate) fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Null => Some(String::new()),
        _ => None,
    }
}
