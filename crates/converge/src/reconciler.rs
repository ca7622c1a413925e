//! Entry point tying the registry, the store and the engine together

use crate::context::Context;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::module::{Module, ModuleInfo};
use crate::ordering::sort_modules;
use crate::plan::Plan;
use crate::registry::ModuleRegistry;
use crate::store::ModuleStore;
use crate::table::TableSync;
use crate::types::{ConvergeOptions, Direction};
use log::info;
use std::sync::Arc;

/// Runs passes and module (un)installs against one store
pub struct Reconciler<S> {
    pub(crate) registry: Arc<ModuleRegistry<S>>,
    pub(crate) store: S,
    pub(crate) options: ConvergeOptions,
}

impl<S> Reconciler<S>
where
    S: ModuleStore + Clone,
{
    pub fn new(registry: ModuleRegistry<S>, store: S) -> Self {
        Self {
            registry: Arc::new(registry),
            store,
            options: ConvergeOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ConvergeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &ModuleRegistry<S> {
        &self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Push database rows out to the cloud
    pub async fn apply(&self, dry_run: bool) -> Result<Plan> {
        self.pass(Direction::Apply, dry_run).await
    }

    /// Pull cloud state into the database
    pub async fn sync(&self, dry_run: bool) -> Result<Plan> {
        self.pass(Direction::Sync, dry_run).await
    }

    /// Registered modules, or only installed ones
    pub fn modules(&self, installed_only: bool) -> Result<Vec<ModuleInfo>> {
        if installed_only {
            Ok(self
                .installed_modules()?
                .iter()
                .map(|m| m.info())
                .collect())
        } else {
            Ok(self.registry.modules().iter().map(|m| m.info()).collect())
        }
    }

    async fn pass(&self, direction: Direction, dry_run: bool) -> Result<Plan> {
        let modules = sort_modules(&self.installed_modules()?, &[])?;
        if modules.is_empty() {
            info!("{direction}: no modules installed");
            return Ok(Plan::new());
        }

        let ctx = self.context(&modules);
        let tables = tables_of(&modules);
        let engine = Engine::new(self.options.clone().dry_run(dry_run));
        engine.converge(direction, &ctx, &tables).await
    }

    pub(crate) fn installed_names(&self) -> Result<Vec<String>> {
        self.store.installed_modules().map_err(Error::Store)
    }

    pub(crate) fn installed_modules(&self) -> Result<Vec<Arc<Module<S>>>> {
        self.registry.installed(&self.installed_names()?)
    }

    /// Fresh context carrying every given module's contributions
    pub(crate) fn context(&self, modules: &[Arc<Module<S>>]) -> Arc<Context<S>> {
        Arc::new(Context::new(self.store.clone()).with_modules(modules))
    }
}

/// Mappers of `modules`, in module order then declaration order
pub(crate) fn tables_of<S>(modules: &[Arc<Module<S>>]) -> Vec<Arc<dyn TableSync<S>>> {
    modules
        .iter()
        .flat_map(|m| m.mappers().iter().cloned())
        .collect()
}
