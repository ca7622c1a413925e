//! Core types shared across the engine

use crate::error::{Error, Result};
use crate::executor::ExecutorOptions;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of an entity among others of its type, independent of where it is stored
pub type EntityId = String;

/// Which view of the world a snapshot or read refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Rows in the relational store
    Db,
    /// Live provider state
    Cloud,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Db => write!(f, "database"),
            Side::Cloud => write!(f, "cloud"),
        }
    }
}

/// Which side is the source of truth for a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Push database rows out to the cloud
    Apply,
    /// Pull cloud state into the database
    Sync,
}

impl Direction {
    /// The side whose state wins
    pub fn source(&self) -> Side {
        match self {
            Direction::Apply => Side::Db,
            Direction::Sync => Side::Cloud,
        }
    }

    /// The side that gets mutated
    pub fn target(&self) -> Side {
        match self {
            Direction::Apply => Side::Cloud,
            Direction::Sync => Side::Db,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Apply => write!(f, "apply"),
            Direction::Sync => write!(f, "sync"),
        }
    }
}

/// How a changed entity is brought back in line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Mutate the existing resource in place
    Update,
    /// Destroy and recreate the resource
    Replace,
}

/// Tunables for a convergence pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvergeOptions {
    /// Compute and return the plan without executing anything
    pub dry_run: bool,
    /// Maximum operations in flight per executor round
    pub jobs: usize,
    /// Consecutive executor rounds with an unchanged failure count before halting
    pub executor_halt_after: usize,
    /// Consecutive loop iterations with an unchanged diff before halting
    pub loop_halt_after: usize,
}

impl Default for ConvergeOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            jobs: 16,
            executor_halt_after: 2,
            loop_halt_after: 4,
        }
    }
}

impl ConvergeOptions {
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Reject thresholds that would make the engine halt before doing anything
    pub fn validate(&self) -> Result<()> {
        if self.jobs == 0 {
            return Err(Error::InvalidConfig("jobs must be at least 1".into()));
        }
        if self.executor_halt_after == 0 {
            return Err(Error::InvalidConfig(
                "executor_halt_after must be at least 1".into(),
            ));
        }
        if self.loop_halt_after == 0 {
            return Err(Error::InvalidConfig(
                "loop_halt_after must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn executor(&self) -> ExecutorOptions {
        ExecutorOptions {
            jobs: self.jobs,
            halt_after: self.executor_halt_after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_sides() {
        assert_eq!(Direction::Apply.source(), Side::Db);
        assert_eq!(Direction::Apply.target(), Side::Cloud);
        assert_eq!(Direction::Sync.source(), Side::Cloud);
        assert_eq!(Direction::Sync.target(), Side::Db);
    }

    #[test]
    fn test_default_thresholds() {
        let opts = ConvergeOptions::default();
        assert_eq!(opts.executor_halt_after, 2);
        assert_eq!(opts.loop_halt_after, 4);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let opts = ConvergeOptions {
            loop_halt_after: 0,
            ..Default::default()
        };
        assert!(matches!(opts.validate(), Err(Error::InvalidConfig(_))));

        let opts = ConvergeOptions {
            jobs: 0,
            ..Default::default()
        };
        assert!(opts.validate().unwrap_err().is_configuration());
    }
}
