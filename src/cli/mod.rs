//! CLI module for clusterdeck
//!
//! Argument parsing and subcommand dispatch. Every subcommand builds a
//! playbook from a recipe in [`recipes`] and runs it.

pub mod commands;
pub mod output;
pub mod recipes;

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// clusterdeck - deploy and operate a storage cluster over SSH and docker
#[derive(Parser, Debug, Clone)]
#[command(name = "clusterdeck")]
#[command(version)]
#[command(about = "Deploy and operate a storage cluster over SSH and docker", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true, env = "CLUSTERDECK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "human")]
    pub output: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output with progress bars
    #[default]
    Human,
    /// JSON report on stdout, no progress bars
    Json,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Pull images, create containers, push configs and start every service
    Deploy(ClusterArgs),

    /// Start services
    Start(ClusterArgs),

    /// Stop services
    Stop(ClusterArgs),

    /// Restart services
    Restart(ClusterArgs),

    /// Remove service containers, logs and data
    Clean(CleanArgs),

    /// Show service status
    Status(StatusArgs),

    /// Check hosts before deploying
    Check(ClusterArgs),

    /// Format disks into chunkfile pools
    Format(FormatArgs),

    /// Manage local playgrounds
    #[command(subcommand)]
    Playground(PlaygroundCommand),
}

/// Selection of the services a cluster command acts on
#[derive(Args, Debug, Clone)]
pub struct ClusterArgs {
    /// Topology file
    #[arg(short = 't', long)]
    pub topology: PathBuf,

    /// Hosts file resolving host names used by the topology
    #[arg(long)]
    pub hosts: Option<PathBuf>,

    /// Cluster name (defaults to the topology file stem)
    #[arg(long)]
    pub cluster: Option<String>,

    /// Only services of this role
    #[arg(long)]
    pub role: Option<String>,

    /// Only services on this host
    #[arg(long)]
    pub host: Option<String>,

    /// Maximum number of tasks running at once
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Keep going when some tasks fail
    #[arg(long)]
    pub skip_error: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CleanArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// Items to remove (log, data, container)
    #[arg(long, value_delimiter = ',', default_value = "log,data,container")]
    pub only: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// Also show container start time
    #[arg(long)]
    pub verbose_status: bool,
}

#[derive(Args, Debug, Clone)]
pub struct FormatArgs {
    /// Format file listing hosts and disks
    #[arg(short = 'f', long)]
    pub format_config: PathBuf,

    /// Report formatting progress instead of formatting
    #[arg(long)]
    pub status: bool,

    /// Maximum number of tasks running at once
    #[arg(long)]
    pub concurrency: Option<usize>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum PlaygroundCommand {
    /// Run a single-container playground
    Run(PlaygroundArgs),

    /// Remove a playground
    Remove(PlaygroundArgs),
}

#[derive(Args, Debug, Clone)]
pub struct PlaygroundArgs {
    /// Playground name
    pub name: String,

    /// Cluster kind (curvebs or curvefs)
    #[arg(long, default_value = "curvebs")]
    pub kind: String,

    /// Container image
    #[arg(long)]
    pub container_image: Option<String>,
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-3)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }

    /// Check if JSON output is requested
    pub fn is_json(&self) -> bool {
        matches!(self.output, OutputFormat::Json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["clusterdeck", "deploy", "-t", "topology.yaml"]).unwrap();
        match cli.command {
            Commands::Deploy(args) => {
                assert_eq!(args.topology, PathBuf::from("topology.yaml"));
                assert!(args.role.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_verbosity() {
        let cli = Cli::try_parse_from(["clusterdeck", "-vvvvv", "start", "-t", "t.yaml"]).unwrap();
        assert_eq!(cli.verbosity(), 3);
    }

    #[test]
    fn test_clean_items() {
        let cli = Cli::try_parse_from([
            "clusterdeck",
            "clean",
            "-t",
            "t.yaml",
            "--only",
            "log,container",
        ])
        .unwrap();
        let Commands::Clean(args) = cli.command else {
            panic!("expected clean");
        };
        assert_eq!(args.only, vec!["log", "container"]);
    }

    #[test]
    fn test_playground() {
        let cli = Cli::try_parse_from(["clusterdeck", "playground", "run", "demo", "--kind", "curvefs"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Playground(PlaygroundCommand::Run(ref args)) if args.name == "demo" && args.kind == "curvefs"
        ));
    }
}
