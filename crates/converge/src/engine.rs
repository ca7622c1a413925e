//! Convergence loop
//!
//! ```text
//! outer: reload source side
//!   inner: reload target side
//!          diff every table -> plan
//!          dry run? return plan
//!          same diff too many times? halt
//!          run creates/updates/replaces in table order,
//!              deletes in reverse table order
//!          nothing ran? leave inner
//!   nothing ran during the inner loop? done
//! ```

use crate::context::Context;
use crate::diff::DiffCounts;
use crate::error::{Error, Result};
use crate::executor::{Operation, execute};
use crate::plan::Plan;
use crate::table::{TableDelta, TableSync};
use crate::types::{ConvergeOptions, Direction, Side};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::sync::Arc;
use std::time::Instant;

/// Drives a set of tables to agreement
#[derive(Debug, Clone, Default)]
pub struct Engine {
    options: ConvergeOptions,
}

impl Engine {
    pub fn new(options: ConvergeOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ConvergeOptions {
        &self.options
    }

    /// Make the cloud match the database
    pub async fn apply<D>(
        &self,
        ctx: &Arc<Context<D>>,
        tables: &[Arc<dyn TableSync<D>>],
    ) -> Result<Plan>
    where
        D: Send + Sync + 'static,
    {
        self.converge(Direction::Apply, ctx, tables).await
    }

    /// Make the database match the cloud
    pub async fn sync<D>(
        &self,
        ctx: &Arc<Context<D>>,
        tables: &[Arc<dyn TableSync<D>>],
    ) -> Result<Plan>
    where
        D: Send + Sync + 'static,
    {
        self.converge(Direction::Sync, ctx, tables).await
    }

    /// Run the loop until nothing is left to do
    ///
    /// `tables` must be in dependency order (root modules first). Returns every
    /// change found during the pass; with `dry_run` only the first diff.
    pub async fn converge<D>(
        &self,
        direction: Direction,
        ctx: &Arc<Context<D>>,
        tables: &[Arc<dyn TableSync<D>>],
    ) -> Result<Plan>
    where
        D: Send + Sync + 'static,
    {
        self.options.validate()?;
        let mut plan = Plan::new();
        if tables.is_empty() {
            return Ok(plan);
        }

        let started = Instant::now();
        let source = direction.source();
        let target = direction.target();
        let mut stall = StallDetector::new(self.options.loop_halt_after);
        let mut last_stuck: Option<usize> = None;
        let mut iterations = 0;

        loop {
            let mut ran_full_update = false;
            self.load(ctx, tables, source).await?;

            loop {
                let mut ran_update = false;
                self.load(ctx, tables, target).await?;
                iterations += 1;

                let deltas: Vec<TableDelta> = tables
                    .par_iter()
                    .map(|table| table.reconcile(ctx, direction))
                    .collect();
                let counts = deltas
                    .iter()
                    .fold(DiffCounts::default(), |acc, delta| acc + delta.counts);
                for delta in &deltas {
                    plan.merge(&delta.plan);
                }
                debug!(
                    "{direction} iteration {iterations}: {} db-only, {} cloud-only, {} changed",
                    counts.db_only, counts.cloud_only, counts.changed
                );

                if self.options.dry_run {
                    return Ok(plan);
                }
                if stall.observe(counts) {
                    warn!(
                        "{direction} stopped: the same {} changes keep reappearing",
                        counts.total()
                    );
                    return Err(Error::ConvergenceStalled { iterations, plan });
                }

                let operations = order_operations(deltas);
                if !operations.is_empty() {
                    ran_update = true;
                    ran_full_update = true;
                    info!("{direction}: running {} operations", operations.len());

                    match execute(&operations, &self.options.executor()).await {
                        Ok(summary) => debug!(
                            "{direction}: {} operations done in {} rounds ({} retries)",
                            summary.operations, summary.rounds, summary.retries
                        ),
                        Err(Error::OperationsStalled { failures, .. })
                            if last_stuck != Some(failures.len()) =>
                        {
                            warn!(
                                "{direction}: {} operations stuck, re-reading {source} state",
                                failures.len()
                            );
                            last_stuck = Some(failures.len());
                            ran_update = false;
                        }
                        Err(e) => return Err(e),
                    }
                }

                if !ran_update {
                    break;
                }
            }

            if !ran_full_update {
                break;
            }
        }

        info!(
            "{direction} converged after {iterations} iterations in {:.2?}",
            started.elapsed()
        );
        Ok(plan)
    }

    /// Clear one side of the snapshot and read it back for every table
    async fn load<D>(
        &self,
        ctx: &Arc<Context<D>>,
        tables: &[Arc<dyn TableSync<D>>],
        side: Side,
    ) -> Result<()>
    where
        D: Send + Sync + 'static,
    {
        ctx.memo(side).clear();
        let reads: Vec<Operation> = tables.iter().map(|t| t.load(ctx, side)).collect();
        execute(&reads, &self.options.executor()).await?;
        Ok(())
    }
}

/// Forward operations in table order, then deletes in reverse table order
fn order_operations(deltas: Vec<TableDelta>) -> Vec<Operation> {
    let mut forward = Vec::new();
    let mut reverse = Vec::new();
    for delta in deltas.into_iter().rev() {
        forward.push(delta.forward);
        reverse.extend(delta.reverse);
    }
    forward.into_iter().rev().flatten().chain(reverse).collect()
}

/// Trips when the same non-zero diff is seen too many iterations in a row
#[derive(Debug)]
struct StallDetector {
    limit: usize,
    last: Option<DiffCounts>,
    repeats: usize,
}

impl StallDetector {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            last: None,
            repeats: 0,
        }
    }

    fn observe(&mut self, counts: DiffCounts) -> bool {
        if !counts.is_zero() && self.last == Some(counts) {
            self.repeats += 1;
        } else {
            self.repeats = 0;
        }
        self.last = Some(counts);
        self.repeats >= self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(db_only: usize, cloud_only: usize, changed: usize) -> DiffCounts {
        DiffCounts {
            db_only,
            cloud_only,
            changed,
        }
    }

    #[test]
    fn test_stall_detector_trips_after_limit_repeats() {
        let mut stall = StallDetector::new(4);
        assert!(!stall.observe(counts(0, 0, 1)));
        for _ in 0..3 {
            assert!(!stall.observe(counts(0, 0, 1)));
        }
        assert!(stall.observe(counts(0, 0, 1)));
    }

    #[test]
    fn test_stall_detector_resets_on_change() {
        let mut stall = StallDetector::new(2);
        assert!(!stall.observe(counts(2, 0, 0)));
        assert!(!stall.observe(counts(2, 0, 0)));
        assert!(!stall.observe(counts(1, 0, 0)));
        assert!(!stall.observe(counts(1, 0, 0)));
        assert!(stall.observe(counts(1, 0, 0)));
    }

    #[test]
    fn test_zero_diff_never_stalls() {
        let mut stall = StallDetector::new(1);
        for _ in 0..5 {
            assert!(!stall.observe(DiffCounts::default()));
        }
    }

    #[test]
    fn test_operation_order() {
        fn op(label: &str) -> Operation {
            Operation::new(label, || async { Ok(()) })
        }
        let delta = |table: &'static str| TableDelta {
            table,
            counts: DiffCounts::default(),
            plan: Plan::new(),
            forward: vec![op(&format!("create {table}"))],
            reverse: vec![op(&format!("delete {table}"))],
        };

        let ops = order_operations(vec![delta("network"), delta("subnet")]);
        let labels: Vec<_> = ops.iter().map(Operation::label).collect();
        assert_eq!(
            labels,
            vec!["create network", "create subnet", "delete subnet", "delete network"]
        );
    }
}
