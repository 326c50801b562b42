//! # clusterdeck - storage cluster deployment engine
//!
//! clusterdeck deploys and operates a distributed storage cluster whose
//! services run as docker containers on remote hosts reached over SSH.
//!
//! ## Core Concepts
//!
//! - **Topology**: YAML describing which service roles run on which hosts,
//!   expanded into one [`DeployConfig`](topology::DeployConfig) per replica
//! - **Variables**: `${name}` references resolved per service by [`vars`]
//! - **Steps**: small reusable remote actions (pull an image, create a
//!   container, install a file)
//! - **Tasks**: an ordered list of steps bound to one entity and one host
//! - **Playbook**: an ordered list of step types; each expands into a batch
//!   of tasks that run concurrently under a bound
//!
//! ## Architecture Overview
//!
//! ```text
//!  topology.yaml ──► topology ──► Configs ──┐
//!                                           ▼
//!  Playbook ──► PlaybookStep ──► TaskFactory ──► Tasks ──► executor
//!                                                            │
//!                          Context (SSH / local connection) ◄┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use clusterdeck::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let dcs = parse_topology(&std::fs::read_to_string("topology.yaml")?, &[])?;
//!     let storage = Arc::new(MemoryStorage::open("state.json")?);
//!     let factory = TaskFactory::new("prod", storage.clone());
//!
//!     let mut playbook = Playbook::new(factory, Arc::new(ConnectionFactory::default()));
//!     playbook.add_step(PlaybookStep::new(StepType::PullImage, dcs.clone()));
//!     playbook.add_step(PlaybookStep::new(StepType::CreateContainer, dcs.clone()));
//!     playbook.add_step(PlaybookStep::new(StepType::StartService, dcs));
//!
//!     let report = playbook.run().await?;
//!     storage.save()?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    // Connections
    pub use crate::connection::{
        CommandResult, Connection, ConnectionError, ConnectionFactory, ConnectionResult,
        Connector, ExecuteOptions, LocalConnection, SshConnection, SshTarget, TransferOptions,
    };

    // Error handling
    pub use crate::error::{Error, Result};

    // Execution engine
    pub use crate::executor::{
        Context, ExecOptions, Register, Step, StepStatus, Summary, Task, TaskRecord, Tasks,
        TasksOutcome,
    };

    // Task construction
    pub use crate::configs::{Configs, SmartConfig};
    pub use crate::factory::{StepOptions, StepType, TaskFactory};

    // Playbooks
    pub use crate::playbook::{Playbook, PlaybookReport, PlaybookStep};

    // Persistence
    pub use crate::storage::{MemoryStorage, Storage};

    // Topology
    pub use crate::topology::{parse_hosts, parse_topology, DeployConfig, Entity, Kind, Role};

    // Variables
    pub use crate::vars::{Variable, Variables};
}

// ============================================================================
// Core Modules
// ============================================================================

/// Error types and result aliases.
pub mod error;

/// `${name}` variable registration, resolution and rendering.
pub mod vars;

/// Configuration loading from TOML files and the environment.
pub mod config;

/// Subscriber installation for `tracing`.
pub mod telemetry;

// ============================================================================
// Cluster Description
// ============================================================================

/// Topology, hosts, format, monitor, website and playground entities.
pub mod topology;

/// Typed config lists handed to the task factory.
pub mod configs;

// ============================================================================
// Execution
// ============================================================================

/// Transports that run commands and move files on hosts.
pub mod connection;

/// Task and batch execution.
pub mod executor;

/// Reusable remote steps.
pub mod steps;

/// Builds task batches from playbook steps.
pub mod factory;

/// Playbook driver.
pub mod playbook;

/// Progress rendering.
pub mod progress;

/// Service container persistence.
pub mod storage;

pub use error::{Error, Result};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
