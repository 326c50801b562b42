//! Topology file parser.
//!
//! ```yaml
//! kind: curvebs
//! global:
//!   user: curve
//!   container_image: opencurvedocker/curvebs:v1.2
//!   log_dir: ${home}/logs/${service_role}
//!   variable:
//!     home: /tmp
//!     target: 10.0.1.1
//!
//! etcd_services:
//!   config:
//!     listen.port: 2380
//!   deploy:
//!     - host: ${target}
//!
//! chunkserver_services:
//!   config:
//!     listen.port: 82${format_replicas_sequence}
//!   deploy:
//!     - host: ${target}
//!       replicas: 3
//! ```

use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use super::cluster::cluster_variables;
use super::{
    stringify_map, DeployConfig, DeployItem, Entity, HostConfig, Kind, Role, SshSettings,
};
use crate::error::{Error, Result};
use crate::vars::{Variable, Variables};

#[derive(Debug, Deserialize)]
struct TopologyFile {
    kind: Kind,
    #[serde(default)]
    global: serde_yaml::Mapping,
    #[serde(flatten)]
    services: IndexMap<String, ServiceSection>,
}

#[derive(Debug, Deserialize)]
struct ServiceSection {
    #[serde(default)]
    config: serde_yaml::Mapping,
    #[serde(default)]
    deploy: Vec<DeployEntry>,
}

#[derive(Debug, Deserialize)]
struct DeployEntry {
    host: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "replica")]
    replicas: Option<usize>,
    #[serde(default)]
    config: serde_yaml::Mapping,
}

/// Parse a topology into fully built deploy configs.
///
/// `hosts` resolves host names declared in a hosts file; a host that is
/// not listed there is used as the address itself, with the login
/// settings of `global`.
pub fn parse_topology(data: &str, hosts: &[Arc<HostConfig>]) -> Result<Vec<Arc<DeployConfig>>> {
    let mut file: TopologyFile = serde_yaml::from_str(data)?;
    let kind = file.kind;

    let user_vars = match file.global.remove("variable") {
        Some(serde_yaml::Value::Mapping(map)) => user_variables(&map)?,
        Some(serde_yaml::Value::Null) | None => Variables::new(),
        Some(_) => {
            return Err(Error::Topology(
                "global.variable must be a mapping".to_string(),
            ))
        }
    };
    let global = stringify_map(&file.global, "global")?;
    let global_ssh = SshSettings::from_config(&global)?;

    for key in file.services.keys() {
        let known = key
            .strip_suffix("_services")
            .and_then(|role| role.parse::<Role>().ok())
            .is_some_and(|role| kind.roles().contains(&role));
        if !known {
            return Err(Error::Topology(format!(
                "unexpected section '{}' in a {} topology",
                key, kind
            )));
        }
    }

    let mut dcs = Vec::new();
    for role in kind.roles() {
        let Some(section) = file.services.get(&format!("{}_services", role)) else {
            continue;
        };
        let role_config = stringify_map(&section.config, role.as_str())?;

        for (host_sequence, entry) in section.deploy.iter().enumerate() {
            let host = user_vars.rendering(&entry.host)?;
            let replicas = entry.replicas.unwrap_or(1);
            if replicas == 0 {
                return Err(Error::Topology(format!(
                    "{} on '{}' declares zero replicas",
                    role, host
                )));
            }

            let mut config = global.clone();
            config.extend(role_config.clone());
            config.extend(stringify_map(&entry.config, role.as_str())?);

            let ssh = match hosts.iter().find(|h| h.host() == host) {
                Some(hc) => hc.ssh_target().cloned(),
                None => global_ssh.target(&host),
            };

            for replicas_sequence in 0..replicas {
                let item = DeployItem {
                    kind,
                    role: *role,
                    host: host.clone(),
                    name: entry.name.clone(),
                    replicas,
                    host_sequence,
                    replicas_sequence,
                    config: config.clone(),
                    ssh: ssh.clone(),
                };
                dcs.push(DeployConfig::new(item, &user_vars)?);
            }
        }
    }

    let cluster = cluster_variables(kind, &dcs)?;
    let mut ids = HashSet::new();
    for dc in &mut dcs {
        dc.register_cluster_variables(&cluster)?;
        dc.build()?;
        if !ids.insert(dc.id().to_string()) {
            return Err(Error::DuplicateId(dc.id().to_string()));
        }
    }

    debug!(kind = %kind, services = dcs.len(), "Parsed topology");
    Ok(dcs.into_iter().map(Arc::new).collect())
}

fn user_variables(map: &serde_yaml::Mapping) -> Result<Variables> {
    let mut vars = Variables::new();
    for (name, value) in stringify_map(map, "global.variable")? {
        vars.register(Variable::new(name, value).with_description("User defined"))?;
    }
    Ok(vars)
}

/// Keep the services matching an optional role and host.
pub fn select(
    dcs: &[Arc<DeployConfig>],
    role: Option<&str>,
    host: Option<&str>,
) -> Vec<Arc<DeployConfig>> {
    dcs.iter()
        .filter(|dc| role.map_or(true, |r| r == "*" || dc.role() == r))
        .filter(|dc| host.map_or(true, |h| h == "*" || dc.host() == h))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::host::parse_hosts;
    use crate::vars::VarsError;
    use pretty_assertions::assert_eq;

    const TOPOLOGY: &str = r#"
kind: curvebs
global:
  user: curve
  container_image: opencurvedocker/curvebs:v1.2
  log_dir: ${home}/logs/${service_role}${service_host_sequence}
  variable:
    home: /tmp
    target: 10.0.1.1

etcd_services:
  deploy:
    - host: ${target}
    - host: 10.0.1.2
    - host: 10.0.1.3

mds_services:
  config:
    mds.etcd.address: ${cluster_etcd_addr}
  deploy:
    - host: ${target}

chunkserver_services:
  config:
    listen.port: 82${format_replicas_sequence}
  deploy:
    - host: ${target}
      replicas: 2
"#;

    #[test]
    fn test_parse_topology() {
        let dcs = parse_topology(TOPOLOGY, &[]).unwrap();
        assert_eq!(dcs.len(), 6);

        let ids: Vec<_> = dcs.iter().map(|dc| dc.id().to_string()).collect();
        assert_eq!(
            ids,
            vec![
                "etcd_10.0.1.1_0_0",
                "etcd_10.0.1.2_1_0",
                "etcd_10.0.1.3_2_0",
                "mds_10.0.1.1_0_0",
                "chunkserver_10.0.1.1_0_0",
                "chunkserver_10.0.1.1_0_1",
            ]
        );

        let mds = &dcs[3];
        assert_eq!(
            mds.config("mds.etcd.address"),
            Some("10.0.1.1:2379,10.0.1.2:2379,10.0.1.3:2379")
        );
        assert_eq!(mds.log_dir(), "/tmp/logs/mds0");
        assert_eq!(dcs[1].log_dir(), "/tmp/logs/etcd1");

        let cs = &dcs[5];
        assert_eq!(cs.listen_port(), "8201");
        assert_eq!(cs.parent_id(), "chunkserver_10.0.1.1_0_0");
        assert_eq!(cs.container_image(), "opencurvedocker/curvebs:v1.2");
        assert_eq!(
            cs.ssh_target().unwrap().to_string(),
            "curve@10.0.1.1:22"
        );
    }

    #[test]
    fn test_hosts_resolution() {
        let hosts = parse_hosts(
            "global: {user: admin}\nhosts:\n  - {host: server1, hostname: 192.168.0.1}\n",
        )
        .unwrap();
        let data = "kind: curvefs\nmetaserver_services:\n  deploy:\n    - host: server1\n";
        let dcs = parse_topology(data, &hosts).unwrap();
        assert_eq!(dcs[0].host(), "server1");
        assert_eq!(
            dcs[0].ssh_target().unwrap().to_string(),
            "admin@192.168.0.1:22"
        );
    }

    #[test]
    fn test_unresolved_reference_fails() {
        let data = "kind: curvebs\netcd_services:\n  config:\n    x: ${missing}\n  deploy:\n    - host: h1\n";
        let err = parse_topology(data, &[]).unwrap_err();
        assert!(matches!(err, Error::Vars(VarsError::UnresolvedReference(_))));
    }

    #[test]
    fn test_user_variable_may_reference_cluster_scope() {
        let data = r#"
kind: curvebs
global:
  variable:
    etcd_endpoints: ${cluster_etcd_addr}
etcd_services:
  deploy:
    - host: 10.0.1.1
mds_services:
  config:
    mds.etcd.address: ${etcd_endpoints}
  deploy:
    - host: 10.0.1.1
"#;
        let dcs = parse_topology(data, &[]).unwrap();
        assert_eq!(dcs[1].config("mds.etcd.address"), Some("10.0.1.1:2379"));
        assert_eq!(
            dcs[1].variables().get("etcd_endpoints"),
            Some("10.0.1.1:2379")
        );
    }

    #[test]
    fn test_unresolved_user_variable_fails() {
        let data = "kind: curvebs
global:
  variable:
    x: ${missing}
etcd_services:
  deploy:
    - host: h1
";
        let err = parse_topology(data, &[]).unwrap_err();
        assert!(matches!(
            err,
            Error::Vars(VarsError::UnresolvedReference(ref name)) if name == "missing"
        ));
    }

    #[test]
    fn test_duplicate_named_replicas() {
        let data =
            "kind: curvebs\netcd_services:\n  deploy:\n    - {host: h1, name: e}\n    - {host: h1, name: e}\n";
        assert!(matches!(
            parse_topology(data, &[]),
            Err(Error::DuplicateId(id)) if id == "etcd_h1_e"
        ));
    }

    #[test]
    fn test_role_outside_kind_rejected() {
        let data = "kind: curvefs\nchunkserver_services:\n  deploy:\n    - host: h1\n";
        assert!(matches!(parse_topology(data, &[]), Err(Error::Topology(_))));
    }

    #[test]
    fn test_select() {
        let dcs = parse_topology(TOPOLOGY, &[]).unwrap();
        assert_eq!(select(&dcs, Some("etcd"), None).len(), 3);
        assert_eq!(select(&dcs, None, Some("10.0.1.1")).len(), 4);
        assert_eq!(select(&dcs, Some("*"), Some("*")).len(), 6);
    }
}
