//! clusterdeck - deploy and operate a storage cluster over SSH and docker
//!
//! This is the main entry point for the clusterdeck CLI.

mod cli;

use anyhow::Result;
use cli::commands::{cluster, format, playground, CommandContext};
use cli::{Cli, Commands};
use clusterdeck::config::Config;
use clusterdeck::telemetry::init_logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    let config = Config::load(cli.config.as_ref()).unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load config: {:#}", e);
        Config::default()
    });

    if let Err(e) = init_logging(&config.logging, cli.verbosity()) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    let ctx = CommandContext::new(&cli, config);
    let code = match run(&cli, &ctx).await {
        Ok(code) => code,
        Err(e) => {
            ctx.output.error(&format!("{:#}", e));
            e.downcast_ref::<clusterdeck::Error>()
                .map_or(1, clusterdeck::Error::exit_code)
        }
    };
    std::process::exit(code);
}

async fn run(cli: &Cli, ctx: &CommandContext) -> Result<i32> {
    match &cli.command {
        Commands::Deploy(args) => cluster::deploy(ctx, args).await,
        Commands::Start(args) => cluster::start(ctx, args).await,
        Commands::Stop(args) => cluster::stop(ctx, args).await,
        Commands::Restart(args) => cluster::restart(ctx, args).await,
        Commands::Clean(args) => cluster::clean(ctx, args).await,
        Commands::Status(args) => cluster::status(ctx, args).await,
        Commands::Check(args) => cluster::check(ctx, args).await,
        Commands::Format(args) => format::format(ctx, args).await,
        Commands::Playground(command) => playground::playground(ctx, command).await,
    }
}
