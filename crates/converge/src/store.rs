//! Relational store interface used by the installer

use anyhow::Result;

/// Work performed inside one all-or-nothing store transaction
pub type TransactionWork<'a> = dyn FnMut(&mut dyn ModuleTransaction) -> Result<()> + 'a;

/// Where installed modules and their tables live
pub trait ModuleStore: Send + Sync + 'static {
    /// Qualified names of installed modules
    fn installed_modules(&self) -> Result<Vec<String>>;

    /// Every user-visible table that exists right now
    fn table_names(&self) -> Result<Vec<String>>;

    /// Run `work` in a transaction: committed if it returns `Ok`, rolled back otherwise
    fn transaction(&self, work: &mut TransactionWork<'_>) -> Result<()>;
}

/// Schema and metadata mutations available inside a module transaction
pub trait ModuleTransaction {
    /// Run raw SQL (migrations)
    fn execute(&mut self, sql: &str) -> Result<()>;

    fn register_module(&mut self, module: &str, dependencies: &[String], tables: &[String])
    -> Result<()>;

    fn deregister_module(&mut self, module: &str) -> Result<()>;

    /// Start recording row changes of `table` to the change log
    fn attach_change_log(&mut self, table: &str) -> Result<()>;

    fn detach_change_log(&mut self, table: &str) -> Result<()>;
}
