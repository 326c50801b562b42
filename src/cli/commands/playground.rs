//! `playground run|remove`.

use anyhow::Result;
use std::sync::Arc;

use super::{CommandContext, PlaybookPlan};
use crate::cli::{recipes, PlaygroundArgs, PlaygroundCommand};
use clusterdeck::configs::Configs;
use clusterdeck::factory::StepOptions;
use clusterdeck::topology::{Kind, PlaygroundConfig};

fn default_image(kind: Kind) -> String {
    format!("opencurvedocker/{}:playground", kind)
}

pub async fn playground(ctx: &CommandContext, command: &PlaygroundCommand) -> Result<i32> {
    let (args, steps) = match command {
        PlaygroundCommand::Run(args) => (args, recipes::PLAYGROUND_RUN),
        PlaygroundCommand::Remove(args) => (args, recipes::PLAYGROUND_REMOVE),
    };
    let pc = build(args)?;
    let report = ctx
        .run_playbook(PlaybookPlan {
            cluster_id: format!("playground-{}", args.name),
            steps,
            configs: Configs::from(pc),
            options: StepOptions::default(),
            concurrency: None,
            skip_error: false,
        })
        .await?;
    ctx.output.recap(&report);
    Ok(0)
}

fn build(args: &PlaygroundArgs) -> Result<Arc<PlaygroundConfig>> {
    let kind: Kind = args.kind.parse()?;
    let image = args
        .container_image
        .clone()
        .unwrap_or_else(|| default_image(kind));
    Ok(Arc::new(PlaygroundConfig::new(&args.name, kind, &image)?))
}
