//! Modules - installable bundles of tables, migrations and mappers

use crate::mapper::Mapper;
use crate::ordering::ModuleNode;
use crate::store::ModuleTransaction;
use crate::table::{TableSync, bind};
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A value a module contributes to every pass context
pub type ContextValue = Arc<dyn Any + Send + Sync>;

/// Schema hook run inside the install or uninstall transaction
pub type Migration = Arc<dyn Fn(&mut dyn ModuleTransaction) -> anyhow::Result<()> + Send + Sync>;

/// `name@version`
pub fn qualify(name: &str, version: &str) -> String {
    format!("{name}@{version}")
}

/// Split `name@version`; the version is `None` for a bare name
pub fn split_qualified(qualified: &str) -> (&str, Option<&str>) {
    match qualified.split_once('@') {
        Some((name, version)) => (name, Some(version)),
        None => (qualified, None),
    }
}

/// A unit of installation
pub struct Module<D> {
    name: String,
    version: String,
    dependencies: Vec<String>,
    tables: Vec<String>,
    context: Vec<(String, ContextValue)>,
    install: Option<Migration>,
    uninstall: Option<Migration>,
    mappers: Vec<Arc<dyn TableSync<D>>>,
}

impl<D> Module<D> {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            dependencies: Vec::new(),
            tables: Vec::new(),
            context: Vec::new(),
            install: None,
            uninstall: None,
            mappers: Vec::new(),
        }
    }

    /// Require another module, given as `name@version`
    pub fn depends_on(mut self, qualified: impl Into<String>) -> Self {
        self.dependencies.push(qualified.into());
        self
    }

    /// Declare a table owned by this module
    pub fn table(mut self, table: impl Into<String>) -> Self {
        let table = table.into();
        if !self.tables.contains(&table) {
            self.tables.push(table);
        }
        self
    }

    /// Contribute a value to the context of every pass
    pub fn provide<T>(mut self, key: impl Into<String>, value: Arc<T>) -> Self
    where
        T: Any + Send + Sync,
    {
        let value: ContextValue = value;
        self.context.push((key.into(), value));
        self
    }

    pub fn on_install<F>(mut self, migration: F) -> Self
    where
        F: Fn(&mut dyn ModuleTransaction) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.install = Some(Arc::new(migration));
        self
    }

    pub fn on_uninstall<F>(mut self, migration: F) -> Self
    where
        F: Fn(&mut dyn ModuleTransaction) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.uninstall = Some(Arc::new(migration));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn qualified_name(&self) -> String {
        qualify(&self.name, &self.version)
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    pub fn context(&self) -> &[(String, ContextValue)] {
        &self.context
    }

    pub fn install_migration(&self) -> Option<&Migration> {
        self.install.as_ref()
    }

    pub fn uninstall_migration(&self) -> Option<&Migration> {
        self.uninstall.as_ref()
    }

    /// Mappers in declaration order
    pub fn mappers(&self) -> &[Arc<dyn TableSync<D>>] {
        &self.mappers
    }

    pub fn info(&self) -> ModuleInfo {
        ModuleInfo {
            name: self.name.clone(),
            version: self.version.clone(),
            dependencies: self.dependencies.clone(),
            tables: self.tables.clone(),
        }
    }
}

impl<D: Send + Sync + 'static> Module<D> {
    /// Attach a mapper; its table is declared too
    pub fn mapper<M: Mapper<D>>(self, mapper: M) -> Self {
        let table = mapper.table();
        let mut module = self.table(table);
        module.mappers.push(bind(mapper));
        module
    }
}

impl<D> fmt::Debug for Module<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("dependencies", &self.dependencies)
            .field("tables", &self.tables)
            .field("mappers", &self.mappers.len())
            .finish_non_exhaustive()
    }
}

impl<D> ModuleNode for Arc<Module<D>> {
    fn qualified_name(&self) -> String {
        Module::qualified_name(self)
    }

    fn dependencies(&self) -> &[String] {
        Module::dependencies(self)
    }
}

/// Listing entry for a module
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleInfo {
    #[serde(rename = "moduleName")]
    pub name: String,
    #[serde(rename = "moduleVersion")]
    pub version: String,
    pub dependencies: Vec<String>,
    pub tables: Vec<String>,
}
