//! Change plans and the plan report

use serde::{Deserialize, Serialize};
use std::fmt;

/// Version stamp carried by every serialised plan report
pub const PLAN_VERSION: u32 = 3;

/// What will happen (or happened) to an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Replace,
    Delete,
}

impl Action {
    pub fn symbol(&self) -> &'static str {
        match self {
            Action::Create => "+",
            Action::Update => "~",
            Action::Replace => "±",
            Action::Delete => "-",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Replace => "replace",
            Action::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// One row of a plan
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanEntry {
    pub action: Action,
    pub table_name: String,
    /// Database row id, empty when the entity has no row yet
    pub id: String,
    /// Entity id
    pub description: String,
}

/// Pending (or executed) changes, de-duplicated, in the order they were found
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    entries: Vec<PlanEntry>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry unless an identical one is already present
    pub fn record(
        &mut self,
        action: Action,
        table: &str,
        id: impl Into<String>,
        description: impl Into<String>,
    ) {
        let entry = PlanEntry {
            action,
            table_name: table.to_string(),
            id: id.into(),
            description: description.into(),
        };
        if !self.entries.contains(&entry) {
            self.entries.push(entry);
        }
    }

    pub fn merge(&mut self, other: &Plan) {
        for entry in &other.entries {
            if !self.entries.contains(entry) {
                self.entries.push(entry.clone());
            }
        }
    }

    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, action: Action) -> usize {
        self.entries.iter().filter(|e| e.action == action).count()
    }

    /// Serialisable report: creates, then updates, replaces and deletes
    pub fn report(&self) -> PlanReport {
        let mut rows = self.entries.clone();
        rows.sort_by_key(|e| e.action);
        PlanReport {
            plan_version: PLAN_VERSION,
            rows,
        }
    }
}

/// The plan as handed to callers and printed by `--json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanReport {
    pub plan_version: u32,
    pub rows: Vec<PlanEntry>,
}

impl PlanReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
