//! Error types for the converge crate

use crate::plan::Plan;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// An operation that was still failing when the executor gave up
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationFailure {
    pub label: String,
    pub error: String,
}

impl fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label, self.error)
    }
}

/// Tables a module wants that already exist
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableCollision {
    pub module: String,
    pub tables: Vec<String>,
}

impl fmt::Display for TableCollision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.module, self.tables.join(", "))
    }
}

/// Errors raised by the engine, the executor and the installer
#[derive(Error, Debug)]
pub enum Error {
    /// The executor saw the same number of failures for too many rounds in a row
    #[error(
        "forward progress halted after {rounds} executor rounds: {}",
        .failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
    )]
    OperationsStalled {
        rounds: usize,
        failures: Vec<OperationFailure>,
    },

    /// The convergence loop kept seeing the same diff
    #[error(
        "forward progress halted after {iterations} iterations: \
         {} change(s) keep failing to converge",
        .plan.len()
    )]
    ConvergenceStalled { iterations: usize, plan: Plan },

    #[error(
        "the following modules do not exist: {}. Did you mean: {}",
        .missing.join(", "),
        .suggestions.join(", ")
    )]
    ModuleNotFound {
        missing: Vec<String>,
        suggestions: Vec<String>,
    },

    /// The store lists a module this build does not know about
    #[error("installed module {0} is not registered")]
    UnknownInstalledModule(String),

    #[error("module dependency cycle detected among: {}", .modules.join(", "))]
    DependencyCycle { modules: Vec<String> },

    #[error("module {module} depends on {dependency}, which is neither installed nor requested")]
    MissingDependency { module: String, dependency: String },

    #[error("module {0} is declared more than once")]
    DuplicateModule(String),

    #[error(
        "collision with existing tables detected: {}",
        .collisions.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
    )]
    TableCollision { collisions: Vec<TableCollision> },

    /// Uninstalling would strand a module that stays installed
    #[error("cannot uninstall {module}: still required by {}", .dependents.join(", "))]
    ModuleInUse {
        module: String,
        dependents: Vec<String>,
    },

    /// A module transaction failed and was rolled back
    #[error("module transaction rolled back: {0:#}")]
    Transaction(anyhow::Error),

    #[error("store error: {0:#}")]
    Store(anyhow::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Whether the engine gave up because nothing was making progress
    pub fn is_progress_halted(&self) -> bool {
        matches!(
            self,
            Error::OperationsStalled { .. } | Error::ConvergenceStalled { .. }
        )
    }

    /// Whether the error comes from module or engine configuration rather than a live run
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::ModuleNotFound { .. }
                | Error::UnknownInstalledModule(_)
                | Error::DependencyCycle { .. }
                | Error::MissingDependency { .. }
                | Error::DuplicateModule(_)
                | Error::TableCollision { .. }
                | Error::ModuleInUse { .. }
                | Error::InvalidConfig(_)
        )
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stalled_message_lists_failures() {
        let err = Error::OperationsStalled {
            rounds: 2,
            failures: vec![OperationFailure {
                label: "create subnet a".into(),
                error: "waiting for network main".into(),
            }],
        };
        let msg = err.to_string();
        assert!(msg.contains("forward progress halted"));
        assert!(msg.contains("create subnet a: waiting for network main"));
        assert!(err.is_progress_halted());
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_module_not_found_message() {
        let err = Error::ModuleNotFound {
            missing: vec!["netwrk@0.1.0".into()],
            suggestions: vec!["network@0.1.0".into()],
        };
        assert_eq!(
            err.to_string(),
            "the following modules do not exist: netwrk@0.1.0. Did you mean: network@0.1.0"
        );
    }

    #[test]
    fn test_collision_message() {
        let err = Error::TableCollision {
            collisions: vec![TableCollision {
                module: "dns@0.1.0".into(),
                tables: vec!["zone".into(), "record".into()],
            }],
        };
        assert!(err.to_string().ends_with("dns@0.1.0 (zone, record)"));
    }
}
