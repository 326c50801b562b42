//! Cluster-wide variables.
//!
//! Aggregates computed by scanning every service of a deployment once all
//! of them resolved their own service variables. They are immutable: no
//! entity may shadow them.

use super::{DeployConfig, Kind, Role};
use crate::error::Result;
use crate::vars::{Variable, Variables};

/// Compute the cluster scope for `dcs`.
pub fn cluster_variables(kind: Kind, dcs: &[DeployConfig]) -> Result<Variables> {
    let mut vars = Variables::new();
    let mut add = |name: &str, value: String, description: &str| {
        vars.register(Variable::immutable(name, value).with_description(description))
    };

    add(
        "cluster_etcd_http_addr",
        join(dcs, Role::Etcd, |dc| {
            format!(
                "etcd{}{}=http://{}:{}",
                dc.host_sequence(),
                dc.replicas_sequence(),
                dc.listen_ip(),
                dc.listen_port()
            )
        }),
        "Initial cluster peers of etcd",
    )?;
    add(
        "cluster_etcd_addr",
        join(dcs, Role::Etcd, |dc| {
            format!("{}:{}", dc.listen_ip(), dc.listen_client_port())
        }),
        "Client addresses of etcd",
    )?;
    add(
        "cluster_mds_addr",
        join(dcs, Role::Mds, |dc| format!("{}:{}", dc.listen_ip(), dc.listen_port())),
        "Addresses of mds",
    )?;
    add(
        "cluster_mds_dummy_addr",
        join(dcs, Role::Mds, |dc| {
            format!("{}:{}", dc.listen_ip(), dc.listen_dummy_port())
        }),
        "Dummy addresses of mds",
    )?;
    add(
        "cluster_mds_dummy_port",
        join(dcs, Role::Mds, |dc| dc.listen_dummy_port().to_string()),
        "Dummy ports of mds",
    )?;

    match kind {
        Kind::CurveBs => {
            add(
                "cluster_chunkserver_addr",
                join(dcs, Role::Chunkserver, |dc| {
                    format!("{}:{}", dc.listen_ip(), dc.listen_port())
                }),
                "Addresses of chunkserver",
            )?;
            add(
                "cluster_snapshotclone_addr",
                join(dcs, Role::Snapshotclone, |dc| {
                    format!("{}:{}", dc.listen_ip(), dc.listen_port())
                }),
                "Addresses of snapshotclone",
            )?;
            add(
                "cluster_snapshotclone_proxy_addr",
                join(dcs, Role::Snapshotclone, |dc| {
                    format!("{}:{}", dc.listen_ip(), dc.listen_proxy_port())
                }),
                "Proxy addresses of snapshotclone",
            )?;
            add(
                "cluster_snapshotclone_dummy_port",
                join(dcs, Role::Snapshotclone, |dc| dc.listen_dummy_port().to_string()),
                "Dummy ports of snapshotclone",
            )?;
        }
        Kind::CurveFs => {
            add(
                "cluster_metaserver_addr",
                join(dcs, Role::Metaserver, |dc| {
                    format!("{}:{}", dc.listen_ip(), dc.listen_port())
                }),
                "Addresses of metaserver",
            )?;
        }
    }

    Ok(vars)
}

fn join(dcs: &[DeployConfig], role: Role, f: impl Fn(&DeployConfig) -> String) -> String {
    dcs.iter()
        .filter(|dc| dc.service_role() == role)
        .map(f)
        .collect::<Vec<_>>()
        .join(",")
}
