//! Module installation and removal

use crate::error::{Error, Result, TableCollision};
use crate::executor::{Operation, execute};
use crate::module::Module;
use crate::ordering::{leaf_to_root, sort_modules};
use crate::reconciler::Reconciler;
use crate::store::{ModuleStore, ModuleTransaction};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Outcome of an install
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    /// Newly installed, root-to-leaf
    pub installed: Vec<String>,
    /// Pulled in as dependencies without being requested
    pub auto_added: Vec<String>,
    /// Requested but already installed
    pub skipped: Vec<String>,
}

impl InstallReport {
    pub fn is_noop(&self) -> bool {
        self.installed.is_empty()
    }
}

/// Outcome of an uninstall
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UninstallReport {
    /// Removed, leaf-to-root
    pub uninstalled: Vec<String>,
    /// Requested but not installed
    pub skipped: Vec<String>,
}

impl<S> Reconciler<S>
where
    S: ModuleStore + Clone,
{
    /// Install modules by name, or every registered module with `all`
    pub async fn install(&self, names: &[String], all: bool) -> Result<InstallReport> {
        let requested = if all {
            self.registry.modules().to_vec()
        } else {
            self.registry.resolve(names)?
        };
        let existing = self.installed_names()?;

        let mut report = InstallReport::default();
        let mut modules: Vec<Arc<Module<S>>> = Vec::new();
        for module in requested {
            let qualified = module.qualified_name();
            if existing.contains(&qualified) {
                report.skipped.push(qualified);
            } else {
                modules.push(module);
            }
        }

        report.auto_added = self.attach_dependencies(&mut modules, &existing)?;
        if modules.is_empty() {
            info!("all requested modules are already installed");
            return Ok(report);
        }

        self.check_collisions(&modules)?;
        let order = sort_modules(&modules, &existing)?;

        // bring the tables of what is already installed up to date first
        self.sync(false).await?;

        self.store
            .transaction(&mut |tx| {
                for module in &order {
                    install_one(tx, module)?;
                }
                Ok(())
            })
            .map_err(Error::Transaction)?;
        report.installed = order.iter().map(|m| m.qualified_name()).collect();
        info!("installed {}", report.installed.join(", "));

        self.populate(&order).await?;
        Ok(report)
    }

    /// Remove modules by name
    pub async fn uninstall(&self, names: &[String]) -> Result<UninstallReport> {
        let requested = self.registry.resolve(names)?;
        let existing = self.installed_names()?;

        let mut report = UninstallReport::default();
        let mut modules = Vec::new();
        for module in requested {
            let qualified = module.qualified_name();
            if existing.contains(&qualified) {
                modules.push(module);
            } else {
                report.skipped.push(qualified);
            }
        }
        if modules.is_empty() {
            info!("none of the requested modules are installed");
            return Ok(report);
        }

        let removing: HashSet<String> = modules.iter().map(|m| m.qualified_name()).collect();
        let remaining: Vec<String> = existing
            .iter()
            .filter(|name| !removing.contains(*name))
            .cloned()
            .collect();
        self.check_dependents(&removing, &remaining)?;

        let order = leaf_to_root(sort_modules(&modules, &remaining)?);
        self.store
            .transaction(&mut |tx| {
                for module in &order {
                    uninstall_one(tx, module)?;
                }
                Ok(())
            })
            .map_err(Error::Transaction)?;

        report.uninstalled = order.iter().map(|m| m.qualified_name()).collect();
        info!("uninstalled {}", report.uninstalled.join(", "));
        Ok(report)
    }

    /// Add transitive dependencies that are neither requested nor installed
    fn attach_dependencies(
        &self,
        modules: &mut Vec<Arc<Module<S>>>,
        existing: &[String],
    ) -> Result<Vec<String>> {
        let mut added = Vec::new();
        loop {
            let present: HashSet<String> = modules.iter().map(|m| m.qualified_name()).collect();
            let mut missing: Vec<String> = Vec::new();
            for module in modules.iter() {
                for dep in module.dependencies() {
                    if !present.contains(dep) && !existing.contains(dep) && !missing.contains(dep)
                    {
                        missing.push(dep.clone());
                    }
                }
            }
            if missing.is_empty() {
                return Ok(added);
            }

            for dep in missing {
                let Some(module) = self.registry.get(&dep) else {
                    let dependent = modules
                        .iter()
                        .find(|m| m.dependencies().contains(&dep))
                        .map(|m| m.qualified_name())
                        .unwrap_or_default();
                    return Err(Error::MissingDependency {
                        module: dependent,
                        dependency: dep,
                    });
                };
                warn!("automatically attaching missing dependency {dep}");
                added.push(dep);
                modules.push(module);
            }
        }
    }

    fn check_collisions(&self, modules: &[Arc<Module<S>>]) -> Result<()> {
        let existing: HashSet<String> = self
            .store
            .table_names()
            .map_err(Error::Store)?
            .into_iter()
            .collect();

        let collisions: Vec<TableCollision> = modules
            .iter()
            .filter_map(|m| {
                let tables: Vec<String> = m
                    .tables()
                    .iter()
                    .filter(|t| existing.contains(*t))
                    .cloned()
                    .collect();
                (!tables.is_empty()).then(|| TableCollision {
                    module: m.qualified_name(),
                    tables,
                })
            })
            .collect();

        if collisions.is_empty() {
            Ok(())
        } else {
            Err(Error::TableCollision { collisions })
        }
    }

    /// Refuse to strand a module that stays installed
    fn check_dependents(&self, removing: &HashSet<String>, remaining: &[String]) -> Result<()> {
        let mut blocked: Vec<(String, String)> = Vec::new();
        for name in remaining {
            let Some(module) = self.registry.get(name) else {
                continue;
            };
            for dep in module.dependencies() {
                if removing.contains(dep) {
                    blocked.push((dep.clone(), name.clone()));
                }
            }
        }

        match blocked.first() {
            None => Ok(()),
            Some((module, _)) => Err(Error::ModuleInUse {
                module: module.clone(),
                dependents: blocked
                    .iter()
                    .filter(|(m, _)| m == module)
                    .map(|(_, dependent)| dependent.clone())
                    .collect(),
            }),
        }
    }

    /// First read of the cloud into freshly created tables
    async fn populate(&self, order: &[Arc<Module<S>>]) -> Result<()> {
        let everything = self.installed_modules()?;
        let ctx = self.context(&everything);
        let executor = self.options.executor();

        for module in order {
            let operations: Vec<Operation> =
                module.mappers().iter().map(|t| t.populate(&ctx)).collect();
            if operations.is_empty() {
                continue;
            }
            debug!("populating {} tables of {}", operations.len(), module.qualified_name());
            execute(&operations, &executor).await?;
        }
        Ok(())
    }
}

fn install_one<S>(tx: &mut dyn ModuleTransaction, module: &Module<S>) -> anyhow::Result<()> {
    let name = module.qualified_name();
    if let Some(migration) = module.install_migration() {
        migration(tx).map_err(|e| e.context(format!("install migration of {name} failed")))?;
    }
    tx.register_module(&name, module.dependencies(), module.tables())?;
    for table in module.tables() {
        tx.attach_change_log(table)?;
    }
    Ok(())
}

fn uninstall_one<S>(tx: &mut dyn ModuleTransaction, module: &Module<S>) -> anyhow::Result<()> {
    let name = module.qualified_name();
    for table in module.tables() {
        tx.detach_change_log(table)?;
    }
    if let Some(migration) = module.uninstall_migration() {
        migration(tx).map_err(|e| e.context(format!("uninstall migration of {name} failed")))?;
    }
    tx.deregister_module(&name)?;
    Ok(())
}
