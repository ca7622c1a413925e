//! # Converge
//!
//! A reconciliation engine that keeps database rows and live cloud
//! resources in agreement.
//!
//! Desired infrastructure is written as rows in a relational store. A pass
//! reads both sides, diffs them per table, and issues create, update,
//! replace and delete operations until the two sides match.
//!
//! ## Core Concepts
//!
//! - **Mapper**: Bridges one entity type between its table and the provider
//! - **Module**: Installable bundle of tables, migrations and mappers
//! - **Engine**: The convergence loop (`apply` pushes rows out, `sync` pulls state in)
//! - **Executor**: Runs operations concurrently, retrying the ones that fail
//! - **Plan**: The de-duplicated list of changes a pass found
//!
//! ## Example
//!
//! ```ignore
//! use converge::{ConvergeOptions, Module, ModuleRegistry, Reconciler};
//!
//! let mut registry = ModuleRegistry::new("0.1.0");
//! registry.register(
//!     Module::new("network", "0.1.0")
//!         .mapper(NetworkMapper::default())
//!         .on_install(|tx| tx.execute(NETWORK_SCHEMA)),
//! )?;
//!
//! let reconciler = Reconciler::new(registry, store).with_options(ConvergeOptions::default());
//! reconciler.install(&["network".to_string()], false).await?;
//!
//! // preview, then converge
//! let preview = reconciler.apply(true).await?;
//! println!("{}", preview.report().to_json()?);
//! reconciler.apply(false).await?;
//! ```
//!
//! ## Store Traits
//!
//! The crate does not talk to a database directly:
//!
//! - [`ModuleStore`]: Lists installed modules and tables, runs transactions
//! - [`ModuleTransaction`]: Schema and metadata changes inside a transaction
//!
//! The same store value is handed to mappers as the context's database
//! handle.

pub mod context;
pub mod diff;
pub mod engine;
pub mod error;
pub mod executor;
pub mod install;
pub mod mapper;
pub mod module;
pub mod ordering;
pub mod plan;
pub mod reconciler;
pub mod registry;
pub mod store;
pub mod table;
pub mod types;

// Re-export main types at crate root
pub use context::{Context, Memo, Snapshot};
pub use diff::{Changed, DiffCounts, EntityDiff, find_diff};
pub use engine::Engine;
pub use error::{Error, OperationFailure, Result, TableCollision};
pub use executor::{ExecutionSummary, ExecutorOptions, Operation, execute};
pub use install::{InstallReport, UninstallReport};
pub use mapper::{CloudCrud, Crud, Mapper};
pub use module::{ContextValue, Migration, Module, ModuleInfo, qualify, split_qualified};
pub use ordering::{ModuleNode, leaf_to_root, sort_modules};
pub use plan::{Action, PLAN_VERSION, Plan, PlanEntry, PlanReport};
pub use reconciler::Reconciler;
pub use registry::ModuleRegistry;
pub use store::{ModuleStore, ModuleTransaction, TransactionWork};
pub use table::{TableDelta, TableSync, bind};
pub use types::{ChangeKind, ConvergeOptions, Direction, EntityId, Side};
