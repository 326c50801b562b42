//! `format`: turn disks into chunkfile pools.

use anyhow::{Context as _, Result};

use super::{CommandContext, PlaybookPlan};
use crate::cli::{recipes, FormatArgs};
use clusterdeck::configs::Configs;
use clusterdeck::factory::bs::{FORMAT_STATUS, USED_PERCENT};
use clusterdeck::factory::StepOptions;
use clusterdeck::topology::parse_format;

pub async fn format(ctx: &CommandContext, args: &FormatArgs) -> Result<i32> {
    let path = &args.format_config;
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let fcs = parse_format(&data).with_context(|| format!("Invalid format file {}", path.display()))?;

    let report = ctx
        .run_playbook(PlaybookPlan {
            cluster_id: "format".to_string(),
            steps: recipes::FORMAT,
            configs: Configs::from(fcs),
            options: StepOptions::default().with_only_check(args.status),
            concurrency: args.concurrency,
            skip_error: args.status,
        })
        .await?;

    if !args.status {
        ctx.output.recap(&report);
        return Ok(0);
    }

    let mut rows = Vec::new();
    for outcome in &report.outcomes {
        for record in &outcome.records {
            let register = &record.register;
            rows.push(vec![
                record.host.clone(),
                record.subname.clone(),
                register.get_str(USED_PERCENT).unwrap_or("-").trim().to_string(),
                register.get_str(FORMAT_STATUS).unwrap_or("-").to_string(),
            ]);
        }
    }
    ctx.output
        .table(&["Host", "Device", "Used", "Formatting"], &rows);
    Ok(0)
}
