//! Shared test utilities for the clusterdeck test suite.
//!
//! This module provides:
//! - [`FakeCluster`], an in-memory stand-in for a fleet of hosts that records
//!   every command and upload and tracks how many commands run at once
//! - [`FakeConnector`] and [`FakeConnection`] wired to it
//! - Topology builders
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use clusterdeck::connection::{
    CommandResult, Connection, ConnectionError, ConnectionResult, Connector, ExecuteOptions,
    SshTarget, TransferOptions,
};
use clusterdeck::factory::TaskFactory;
use clusterdeck::storage::MemoryStorage;
use clusterdeck::topology::{parse_topology, DeployConfig};

pub const IMAGE: &str = "opencurvedocker/curvebs:v1.2";

// ============================================================================
// Fake Cluster
// ============================================================================

/// A command seen by the fake cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executed {
    pub host: String,
    pub command: String,
}

/// Canned reply for commands containing `pattern`
struct Reply {
    pattern: String,
    result: CommandResult,
}

/// Every host of a test run, shared by all fake connections.
#[derive(Default)]
pub struct FakeCluster {
    executed: Mutex<Vec<Executed>>,
    uploads: Mutex<Vec<(String, String, String)>>,
    replies: Mutex<Vec<Reply>>,
    unreachable: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reply to commands containing `pattern` with `stdout`.
    pub fn reply(&self, pattern: &str, stdout: &str) {
        self.replies.lock().push(Reply {
            pattern: pattern.to_string(),
            result: CommandResult::success(stdout.to_string(), String::new()),
        });
    }

    /// Fail commands containing `pattern`.
    pub fn fail(&self, pattern: &str, stderr: &str) {
        self.replies.lock().push(Reply {
            pattern: pattern.to_string(),
            result: CommandResult::failure(1, String::new(), stderr.to_string()),
        });
    }

    /// Refuse connections to `host`.
    pub fn unreachable(&self, host: &str) {
        self.unreachable.lock().push(host.to_string());
    }

    /// Make every command take `delay`.
    pub fn slow(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn executed(&self) -> Vec<Executed> {
        self.executed.lock().clone()
    }

    /// Commands containing `pattern`, in execution order
    pub fn matching(&self, pattern: &str) -> Vec<Executed> {
        self.executed
            .lock()
            .iter()
            .filter(|e| e.command.contains(pattern))
            .cloned()
            .collect()
    }

    /// `(host, remote path, content)` of every upload
    pub fn uploads(&self) -> Vec<(String, String, String)> {
        self.uploads.lock().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Highest number of commands observed in flight at once
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn respond(&self, command: &str) -> CommandResult {
        // Later replies win so a test can override an earlier one.
        self.replies
            .lock()
            .iter()
            .rev()
            .find(|r| command.contains(&r.pattern))
            .map(|r| r.result.clone())
            .unwrap_or_else(|| CommandResult::success(String::new(), String::new()))
    }
}

// ============================================================================
// Fake Connection
// ============================================================================

pub struct FakeConnection {
    host: String,
    cluster: Arc<FakeCluster>,
}

#[async_trait]
impl Connection for FakeConnection {
    fn identifier(&self) -> &str {
        &self.host
    }

    async fn execute(
        &self,
        command: &str,
        _options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult> {
        let cluster = &self.cluster;
        cluster.executed.lock().push(Executed {
            host: self.host.clone(),
            command: command.to_string(),
        });

        let now = cluster.running.fetch_add(1, Ordering::SeqCst) + 1;
        cluster.peak.fetch_max(now, Ordering::SeqCst);
        let delay = *cluster.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        cluster.running.fetch_sub(1, Ordering::SeqCst);

        Ok(cluster.respond(command))
    }

    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &Path,
        _options: Option<TransferOptions>,
    ) -> ConnectionResult<()> {
        self.cluster.uploads.lock().push((
            self.host.clone(),
            remote_path.display().to_string(),
            local_path.display().to_string(),
        ));
        Ok(())
    }

    async fn upload_content(
        &self,
        content: &[u8],
        remote_path: &Path,
        _options: Option<TransferOptions>,
    ) -> ConnectionResult<()> {
        self.cluster.uploads.lock().push((
            self.host.clone(),
            remote_path.display().to_string(),
            String::from_utf8_lossy(content).into_owned(),
        ));
        Ok(())
    }

    async fn download_content(&self, _remote_path: &Path) -> ConnectionResult<Vec<u8>> {
        Ok(Vec::new())
    }

    async fn close(&self) -> ConnectionResult<()> {
        self.cluster.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Connector handing out [`FakeConnection`]s bound to one [`FakeCluster`]
pub struct FakeConnector(pub Arc<FakeCluster>);

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, target: Option<&SshTarget>) -> ConnectionResult<Arc<dyn Connection>> {
        let host = target.map_or_else(|| "localhost".to_string(), |t| t.host.clone());
        if self.0.unreachable.lock().contains(&host) {
            return Err(ConnectionError::ConnectionFailed(format!(
                "{}: connection refused",
                host
            )));
        }
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeConnection {
            host,
            cluster: Arc::clone(&self.0),
        }))
    }
}

pub fn connector(cluster: &Arc<FakeCluster>) -> Arc<dyn Connector> {
    Arc::new(FakeConnector(Arc::clone(cluster)))
}

// ============================================================================
// Topology Builders
// ============================================================================

/// A curvebs topology with one etcd per host and `replicas` chunkservers on
/// the first host.
pub fn topology(hosts: &[&str], replicas: usize) -> String {
    let mut yaml = format!(
        "kind: curvebs\nglobal:\n  user: curve\n  container_image: {}\n  log_dir: /data/logs/${{service_role}}${{service_host_sequence}}\n  data_dir: /data/${{service_role}}${{service_host_sequence}}\n\netcd_services:\n  deploy:\n",
        IMAGE
    );
    for host in hosts {
        yaml.push_str(&format!("    - host: {}\n", host));
    }
    if replicas > 0 {
        yaml.push_str(&format!(
            "\nchunkserver_services:\n  config:\n    listen.port: 82${{format_replicas_sequence}}\n  deploy:\n    - host: {}\n      replicas: {}\n",
            hosts[0], replicas
        ));
    }
    yaml
}

pub fn deploy_configs(hosts: &[&str], replicas: usize) -> Vec<Arc<DeployConfig>> {
    parse_topology(&topology(hosts, replicas), &[]).expect("test topology parses")
}

/// Factory over a fresh in-memory store
pub fn factory(cluster_id: &str) -> (TaskFactory, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    (TaskFactory::new(cluster_id, storage.clone()), storage)
}
