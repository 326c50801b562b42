//! Cluster commands: deploy, start, stop, restart, clean, status and check.

use anyhow::Result;
use std::str::FromStr;

use super::{cluster_id, CommandContext, PlaybookPlan};
use crate::cli::{recipes, CleanArgs, ClusterArgs, StatusArgs};
use clusterdeck::configs::Configs;
use clusterdeck::factory::common::ServiceStatus;
use clusterdeck::factory::{CleanItem, StepOptions, StepType};
use clusterdeck::playbook::PlaybookReport;

/// Run `steps` over the selected services and print the recap.
pub async fn run(
    ctx: &CommandContext,
    args: &ClusterArgs,
    steps: &[StepType],
    options: StepOptions,
) -> Result<PlaybookReport> {
    let services = ctx.load_services(args)?;
    ctx.output
        .info(&format!("{} service(s) selected", services.len()));
    let report = ctx
        .run_playbook(PlaybookPlan {
            cluster_id: cluster_id(args),
            steps,
            configs: Configs::from(services),
            options,
            concurrency: args.concurrency,
            skip_error: args.skip_error,
        })
        .await?;
    Ok(report)
}

pub async fn deploy(ctx: &CommandContext, args: &ClusterArgs) -> Result<i32> {
    let report = run(ctx, args, recipes::DEPLOY, StepOptions::default()).await?;
    ctx.output.recap(&report);
    Ok(0)
}

pub async fn start(ctx: &CommandContext, args: &ClusterArgs) -> Result<i32> {
    let report = run(ctx, args, recipes::START, StepOptions::default()).await?;
    ctx.output.recap(&report);
    Ok(0)
}

pub async fn stop(ctx: &CommandContext, args: &ClusterArgs) -> Result<i32> {
    let report = run(ctx, args, recipes::STOP, StepOptions::default()).await?;
    ctx.output.recap(&report);
    Ok(0)
}

pub async fn restart(ctx: &CommandContext, args: &ClusterArgs) -> Result<i32> {
    let report = run(ctx, args, recipes::RESTART, StepOptions::default()).await?;
    ctx.output.recap(&report);
    Ok(0)
}

pub async fn check(ctx: &CommandContext, args: &ClusterArgs) -> Result<i32> {
    let report = run(ctx, args, recipes::CHECK, StepOptions::default()).await?;
    ctx.output.recap(&report);
    Ok(0)
}

pub async fn clean(ctx: &CommandContext, args: &CleanArgs) -> Result<i32> {
    let items = args
        .only
        .iter()
        .map(|s| CleanItem::from_str(s.trim()))
        .collect::<Result<Vec<_>, _>>()?;
    let options = StepOptions::default().with_clean_items(items);
    let report = run(ctx, &args.cluster, recipes::CLEAN, options).await?;
    ctx.output.recap(&report);
    Ok(0)
}

pub async fn status(ctx: &CommandContext, args: &StatusArgs) -> Result<i32> {
    let options = StepOptions::default().with_verbose(args.verbose_status);
    let report = run(ctx, &args.cluster, recipes::STATUS, options).await?;
    ctx.output.status_table(&status_rows(&report));
    Ok(0)
}

/// Latest status per service; the inspect step overrides the seeded row.
fn status_rows(report: &PlaybookReport) -> Vec<ServiceStatus> {
    let mut rows: Vec<ServiceStatus> = Vec::new();
    for outcome in &report.outcomes {
        for record in &outcome.records {
            let Some(status) = ServiceStatus::from_register(&record.register) else {
                continue;
            };
            match rows.iter_mut().find(|r| r.id == status.id) {
                Some(row) => *row = status,
                None => rows.push(status),
            }
        }
    }
    rows.sort_by(|a, b| a.role.cmp(&b.role).then_with(|| a.host.cmp(&b.host)));
    rows
}
