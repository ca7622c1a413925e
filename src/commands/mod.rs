pub mod engine;
pub mod modules;
pub mod sql;

use anyhow::{Context as _, Result};
use converge::Reconciler;
use rowstore::Store;
use sandbox::Sandbox;
use std::sync::Arc;

use crate::Context;

/// Open the database
pub fn store(ctx: &Context) -> Result<Store> {
    let path = ctx.config.database_path();
    log::debug!("opening database {}", path.display());
    Store::open(&path).with_context(|| format!("Could not open database {}", path.display()))
}

/// Open the database and the provider, and register the bundled modules
pub fn open(ctx: &Context, jobs: Option<usize>) -> Result<Reconciler<Store>> {
    let store = store(ctx)?;
    let path = ctx.config.sandbox_path();
    let cloud = Arc::new(
        Sandbox::open(&path).with_context(|| format!("Could not open sandbox {}", path.display()))?,
    );

    let mut options = ctx.config.options();
    if let Some(jobs) = jobs {
        options.jobs = jobs;
    }
    options.validate()?;

    let registry = crate::modules::registry(&cloud)?;
    Ok(Reconciler::new(registry, store).with_options(options))
}

/// Ask before doing something destructive
fn confirm_proceed() -> Result<bool> {
    let confirmed = dialoguer::Confirm::new()
        .with_prompt("Continue?")
        .default(true)
        .interact()?;

    Ok(confirmed)
}
