//! `apply` and `sync`

use anyhow::Result;
use colored::Colorize;
use converge::{Direction, Plan, Reconciler};
use rowstore::Store;

use crate::Context;
use crate::cli::PassArgs;
use crate::progress;
use crate::ui;

pub async fn run(ctx: &Context, direction: Direction, args: PassArgs) -> Result<()> {
    let reconciler = super::open(ctx, args.jobs)?;

    // 1. Preview the first round of changes
    let preview = pass(&reconciler, direction, true).await?;

    if args.json && (args.dry_run || preview.is_empty()) {
        println!("{}", preview.report().to_json()?);
        return Ok(());
    }

    // 2. Display what will change
    if !args.json {
        ui::display_plan(title(direction), &preview);
    }
    if preview.is_empty() {
        return Ok(());
    }

    if args.dry_run {
        println!();
        println!("  {} Dry run - no changes made", "ℹ".blue());
        return Ok(());
    }

    // 3. Confirm (unless --yes)
    if !args.yes && !super::confirm_proceed()? {
        println!();
        println!("  {} Aborted", "✗".red());
        return Ok(());
    }

    // 4. Converge
    let pb = progress::spinner(&format!("Running {direction}..."), ctx.quiet || args.json);
    match pass(&reconciler, direction, false).await {
        Ok(plan) => {
            let summary = ui::plan_summary(&plan);
            progress::finish_success(&pb, &format!("{direction} complete: {summary}"));
            if args.json {
                println!("{}", plan.report().to_json()?);
            }
            Ok(())
        }
        Err(err) => {
            progress::finish_error(&pb, &format!("{direction} failed"));
            if let converge::Error::ConvergenceStalled { plan, .. } = &err
                && !args.json
            {
                ui::display_plan("Changes seen before stopping", plan);
            }
            Err(err.into())
        }
    }
}

async fn pass(
    reconciler: &Reconciler<Store>,
    direction: Direction,
    dry_run: bool,
) -> converge::Result<Plan> {
    match direction {
        Direction::Apply => reconciler.apply(dry_run).await,
        Direction::Sync => reconciler.sync(dry_run).await,
    }
}

fn title(direction: Direction) -> &'static str {
    match direction {
        Direction::Apply => "Changes to the cloud",
        Direction::Sync => "Changes to the database",
    }
}
