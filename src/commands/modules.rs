use anyhow::Result;
use colored::Colorize;

use crate::Context;
use crate::cli::{InstallArgs, ModulesArgs};
use crate::progress;
use crate::ui;

pub fn list(ctx: &Context, args: &ModulesArgs) -> Result<()> {
    let reconciler = super::open(ctx, None)?;
    let modules = reconciler.modules(args.installed)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&modules)?);
        return Ok(());
    }

    if modules.is_empty() {
        ui::info("No modules installed");
        return Ok(());
    }

    let installed = reconciler.store().installed_modules()?;
    ui::header(if args.installed {
        "Installed Modules"
    } else {
        "Available Modules"
    });
    ui::display_modules(&modules, &installed);
    Ok(())
}

pub async fn install(ctx: &Context, args: InstallArgs) -> Result<()> {
    let reconciler = super::open(ctx, None)?;

    let pb = progress::spinner("Installing modules...", ctx.quiet);
    let report = match reconciler.install(&args.modules, args.all).await {
        Ok(report) => report,
        Err(err) => {
            progress::finish_error(&pb, "Install failed");
            return Err(err.into());
        }
    };

    if report.is_noop() {
        progress::finish_success(&pb, "Nothing to install");
    } else {
        progress::finish_success(&pb, &format!("Installed {} module(s)", report.installed.len()));
    }

    for module in &report.installed {
        let note = if report.auto_added.contains(module) {
            " (dependency)".dimmed().to_string()
        } else {
            String::new()
        };
        println!("  {} {module}{note}", "+".green());
    }
    for module in &report.skipped {
        ui::dim(&format!("{module} already installed"));
    }
    Ok(())
}

pub async fn uninstall(ctx: &Context, modules: &[String], yes: bool) -> Result<()> {
    let reconciler = super::open(ctx, None)?;

    if !yes {
        ui::warn(&format!(
            "Uninstalling drops the tables of {} and every row in them",
            modules.join(", ")
        ));
        if !super::confirm_proceed()? {
            println!();
            println!("  {} Aborted", "✗".red());
            return Ok(());
        }
    }

    let report = reconciler.uninstall(modules).await?;
    for module in &report.uninstalled {
        println!("  {} {module}", "-".red());
    }
    for module in &report.skipped {
        ui::dim(&format!("{module} not installed"));
    }
    if report.uninstalled.is_empty() {
        ui::info("Nothing to uninstall");
    } else {
        ui::success(&format!("Uninstalled {} module(s)", report.uninstalled.len()));
    }
    Ok(())
}
