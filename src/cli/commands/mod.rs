//! Subcommands module for clusterdeck CLI
//!
//! Every subcommand resolves its configs, picks a recipe and hands both to
//! [`CommandContext::run_playbook`].

pub mod cluster;
pub mod format;
pub mod playground;

use anyhow::{Context as _, Result};
use std::path::Path;
use std::sync::Arc;

use crate::cli::output::OutputFormatter;
use crate::cli::{recipes, Cli, ClusterArgs};
use clusterdeck::config::Config;
use clusterdeck::configs::Configs;
use clusterdeck::connection::{ConnectionFactory, Connector};
use clusterdeck::executor::ExecOptions;
use clusterdeck::factory::{StepOptions, StepType, TaskFactory};
use clusterdeck::playbook::{Playbook, PlaybookReport, PlaybookStep};
use clusterdeck::progress::ProgressReporter;
use clusterdeck::storage::MemoryStorage;
use clusterdeck::topology::{parse_hosts, parse_topology, select, DeployConfig};

/// Common context shared between commands
pub struct CommandContext {
    pub config: Config,
    pub output: OutputFormatter,
}

/// What one playbook run acts on
pub struct PlaybookPlan<'a> {
    pub cluster_id: String,
    pub steps: &'a [StepType],
    pub configs: Configs,
    pub options: StepOptions,
    pub concurrency: Option<usize>,
    pub skip_error: bool,
}

impl CommandContext {
    pub fn new(cli: &Cli, config: Config) -> Self {
        let output = OutputFormatter::new(!cli.no_color, cli.is_json(), cli.verbosity());
        Self { config, output }
    }

    fn progress(&self) -> ProgressReporter {
        if self.output.is_json() {
            ProgressReporter::hidden()
        } else {
            ProgressReporter::new()
        }
    }

    fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(ConnectionFactory::new(self.config.ssh.clone()))
    }

    fn open_storage(&self) -> Result<Arc<MemoryStorage>> {
        let path = &self.config.storage.path;
        let storage = MemoryStorage::open(path)
            .with_context(|| format!("Failed to open state file {}", path.display()))?;
        Ok(Arc::new(storage))
    }

    /// Parse the topology and keep the services the arguments select.
    pub fn load_services(&self, args: &ClusterArgs) -> Result<Vec<Arc<DeployConfig>>> {
        let hosts = match &args.hosts {
            Some(path) => parse_hosts(&read(path)?)
                .with_context(|| format!("Invalid hosts file {}", path.display()))?,
            None => Vec::new(),
        };
        let dcs = parse_topology(&read(&args.topology)?, &hosts)
            .with_context(|| format!("Invalid topology {}", args.topology.display()))?;
        let selected = select(&dcs, args.role.as_deref(), args.host.as_deref());
        if selected.is_empty() {
            self.output.warning("No service matches the given role and host");
        }
        Ok(selected)
    }

    /// Build a playbook from `plan` and run it, saving the state store afterwards.
    pub async fn run_playbook(&self, plan: PlaybookPlan<'_>) -> Result<PlaybookReport> {
        let storage = self.open_storage()?;
        let factory = TaskFactory::new(plan.cluster_id, storage.clone());
        let execution = &self.config.execution;
        let exec_options = ExecOptions::new()
            .with_concurrency(plan.concurrency.unwrap_or(execution.concurrency))
            .with_skip_error(plan.skip_error || execution.skip_error);

        let mut playbook = Playbook::new(factory, self.connector())
            .with_progress(self.progress())
            .with_command_timeout(execution.command_timeout());
        for step_type in plan.steps {
            let mut options = exec_options.clone();
            if recipes::is_silent(*step_type) {
                options = options.silent();
            }
            playbook.add_step(
                PlaybookStep::new(*step_type, plan.configs.clone())
                    .with_options(plan.options.clone())
                    .with_exec_options(options),
            );
        }

        let result = playbook.run().await;
        storage.save().context("Failed to save state file")?;
        Ok(result?)
    }
}

/// Cluster name used as persistence namespace.
pub fn cluster_id(args: &ClusterArgs) -> String {
    args.cluster.clone().unwrap_or_else(|| {
        args.topology
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "default".to_string())
    })
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn args(topology: &str, cluster: Option<&str>) -> ClusterArgs {
        ClusterArgs {
            topology: PathBuf::from(topology),
            hosts: None,
            cluster: cluster.map(str::to_string),
            role: None,
            host: None,
            concurrency: None,
            skip_error: false,
        }
    }

    #[test]
    fn test_cluster_id_defaults_to_file_stem() {
        assert_eq!(cluster_id(&args("/etc/prod-bs.yaml", None)), "prod-bs");
        assert_eq!(cluster_id(&args("/etc/prod-bs.yaml", Some("main"))), "main");
    }

    #[test]
    fn test_context_carries_verbosity_into_output() {
        use clap::Parser;

        let quiet = Cli::try_parse_from(["clusterdeck", "start", "-t", "t.yaml"]).unwrap();
        let ctx = CommandContext::new(&quiet, Config::default());
        assert!(!ctx.output.shows_info());

        let verbose = Cli::try_parse_from(["clusterdeck", "-v", "start", "-t", "t.yaml"]).unwrap();
        let ctx = CommandContext::new(&verbose, Config::default());
        assert!(ctx.output.shows_info());
    }
}
