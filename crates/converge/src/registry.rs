//! Static module registry, built once at startup

use crate::error::{Error, Result, TableCollision};
use crate::module::{Module, qualify, split_qualified};
use std::sync::Arc;

/// Every module this build knows how to install
pub struct ModuleRegistry<D> {
    modules: Vec<Arc<Module<D>>>,
    default_version: String,
}

impl<D> ModuleRegistry<D> {
    /// `default_version` is appended to bare module names
    pub fn new(default_version: impl Into<String>) -> Self {
        Self {
            modules: Vec::new(),
            default_version: default_version.into(),
        }
    }

    /// Add a module; its qualified name and tables must be unique
    pub fn register(&mut self, module: Module<D>) -> Result<()> {
        let qualified = module.qualified_name();
        if self.get(&qualified).is_some() {
            return Err(Error::DuplicateModule(qualified));
        }

        // versions of the same module may share tables
        let taken: Vec<String> = self
            .modules
            .iter()
            .filter(|m| m.name() != module.name())
            .flat_map(|m| m.tables().iter())
            .filter(|t| module.tables().contains(t))
            .cloned()
            .collect();
        if !taken.is_empty() {
            return Err(Error::TableCollision {
                collisions: vec![TableCollision {
                    module: qualified,
                    tables: taken,
                }],
            });
        }

        self.modules.push(Arc::new(module));
        Ok(())
    }

    pub fn default_version(&self) -> &str {
        &self.default_version
    }

    pub fn get(&self, qualified: &str) -> Option<Arc<Module<D>>> {
        self.modules
            .iter()
            .find(|m| m.qualified_name() == qualified)
            .cloned()
    }

    /// All modules in registration order
    pub fn modules(&self) -> &[Arc<Module<D>>] {
        &self.modules
    }

    /// Append the default version to a bare name
    pub fn qualify(&self, name: &str) -> String {
        match split_qualified(name) {
            (_, Some(_)) => name.to_string(),
            (bare, None) => qualify(bare, &self.default_version),
        }
    }

    /// Resolve user-supplied names, failing with suggestions for unknown ones
    pub fn resolve(&self, names: &[String]) -> Result<Vec<Arc<Module<D>>>> {
        let mut found = Vec::with_capacity(names.len());
        let mut missing = Vec::new();

        for name in names {
            let qualified = self.qualify(name);
            match self.get(&qualified) {
                Some(module) => {
                    if !found.iter().any(|m: &Arc<Module<D>>| Arc::ptr_eq(m, &module)) {
                        found.push(module);
                    }
                }
                None => missing.push(qualified),
            }
        }

        if missing.is_empty() {
            Ok(found)
        } else {
            let suggestions = missing
                .iter()
                .filter_map(|name| self.closest(name))
                .collect();
            Err(Error::ModuleNotFound {
                missing,
                suggestions,
            })
        }
    }

    /// Modules for names read back from the store
    pub fn installed(&self, names: &[String]) -> Result<Vec<Arc<Module<D>>>> {
        names
            .iter()
            .map(|name| {
                self.get(name)
                    .ok_or_else(|| Error::UnknownInstalledModule(name.clone()))
            })
            .collect()
    }

    /// Nearest registered qualified name by edit distance
    pub fn closest(&self, name: &str) -> Option<String> {
        self.modules
            .iter()
            .map(|m| m.qualified_name())
            .min_by_key(|candidate| strsim::levenshtein(name, candidate))
    }
}
