//! Retrying concurrent executor
//!
//! Operations are run in rounds. Every round runs all pending operations
//! concurrently; the ones that fail are retried in the next round. Operations
//! that depend on each other therefore sort themselves out without an explicit
//! dependency graph: a dependent fails until its prerequisite has landed.

use crate::error::{Error, OperationFailure, Result};
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use log::{debug, warn};
use std::fmt;
use std::future::Future;

/// Future produced by one attempt of an operation
pub type OperationFuture = BoxFuture<'static, anyhow::Result<()>>;

/// A labelled, re-invocable unit of asynchronous work
pub struct Operation {
    label: String,
    start: Box<dyn Fn() -> OperationFuture + Send + Sync>,
}

impl Operation {
    pub fn new<F, Fut>(label: impl Into<String>, start: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            label: label.into(),
            start: Box::new(move || Box::pin(start())),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn attempt(&self) -> OperationFuture {
        (self.start)()
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Executor tunables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorOptions {
    /// Maximum operations in flight at once
    pub jobs: usize,
    /// Rounds with an identical failure count before giving up
    pub halt_after: usize,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            jobs: 16,
            halt_after: 2,
        }
    }
}

/// What a successful execution took
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub operations: usize,
    pub rounds: usize,
    /// Total attempts that failed and were retried
    pub retries: usize,
}

/// Run every operation to success, retrying failures round by round
///
/// Fails with [`Error::OperationsStalled`] once the number of failing
/// operations has been the same for `halt_after` consecutive rounds. Since
/// only failures are retried, the failing set of one round is always a subset
/// of the previous one, so an unchanged count means the very same operations
/// failed again.
pub async fn execute(
    operations: &[Operation],
    options: &ExecutorOptions,
) -> Result<ExecutionSummary> {
    let jobs = options.jobs.max(1);
    let halt_after = options.halt_after.max(1);

    let mut summary = ExecutionSummary {
        operations: operations.len(),
        ..Default::default()
    };
    let mut pending: Vec<usize> = (0..operations.len()).collect();
    let mut last_failed: Option<usize> = None;
    let mut streak = 0;

    while !pending.is_empty() {
        summary.rounds += 1;
        let mut failures = run_round(operations, &pending, jobs).await;
        if failures.is_empty() {
            break;
        }
        failures.sort_by_key(|(index, _)| *index);

        streak = if last_failed == Some(failures.len()) {
            streak + 1
        } else {
            1
        };
        debug!(
            "round {}: {} of {} operations failed",
            summary.rounds,
            failures.len(),
            pending.len()
        );

        if streak >= halt_after {
            warn!(
                "{} operations made no progress for {} rounds",
                failures.len(),
                streak
            );
            return Err(Error::OperationsStalled {
                rounds: summary.rounds,
                failures: failures
                    .into_iter()
                    .map(|(index, error)| OperationFailure {
                        label: operations
                            .get(index)
                            .map(|op| op.label.clone())
                            .unwrap_or_default(),
                        error: format!("{error:#}"),
                    })
                    .collect(),
            });
        }

        for (index, error) in &failures {
            if let Some(op) = operations.get(*index) {
                debug!("retrying {}: {:#}", op.label, error);
            }
        }

        summary.retries += failures.len();
        last_failed = Some(failures.len());
        pending = failures.into_iter().map(|(index, _)| index).collect();
    }

    Ok(summary)
}

/// Run one round and collect the failures by operation index
async fn run_round(
    operations: &[Operation],
    pending: &[usize],
    jobs: usize,
) -> Vec<(usize, anyhow::Error)> {
    stream::iter(
        pending
            .iter()
            .filter_map(|&index| operations.get(index).map(|op| (index, op))),
    )
    .map(|(index, op)| {
        let attempt = op.attempt();
        async move { (index, attempt.await) }
    })
    .buffer_unordered(jobs)
    .filter_map(|(index, result)| async move { result.err().map(|e| (index, e)) })
    .collect()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn options(halt_after: usize) -> ExecutorOptions {
        ExecutorOptions {
            jobs: 4,
            halt_after,
        }
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let summary = execute(&[], &options(2)).await.unwrap();
        assert_eq!(summary.operations, 0);
        assert_eq!(summary.rounds, 0);
    }

    #[tokio::test]
    async fn test_all_succeed_in_one_round() {
        let calls = Arc::new(AtomicUsize::new(0));
        let ops: Vec<_> = (0..5)
            .map(|i| {
                let calls = Arc::clone(&calls);
                Operation::new(format!("op {i}"), move || {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
            })
            .collect();

        let summary = execute(&ops, &options(2)).await.unwrap();
        assert_eq!(summary.rounds, 1);
        assert_eq!(summary.retries, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_dependency_chain_converges() {
        // op k needs k prior completions; each completes exactly once
        let done = Arc::new(AtomicUsize::new(0));
        let ops: Vec<_> = (0..5)
            .rev()
            .map(|needed| {
                let done = Arc::clone(&done);
                let finished = Arc::new(AtomicUsize::new(0));
                Operation::new(format!("step {needed}"), move || {
                    let done = Arc::clone(&done);
                    let finished = Arc::clone(&finished);
                    async move {
                        if done.load(Ordering::SeqCst) < needed {
                            anyhow::bail!("waiting for {needed} predecessors");
                        }
                        if finished.fetch_add(1, Ordering::SeqCst) == 0 {
                            done.fetch_add(1, Ordering::SeqCst);
                        }
                        Ok(())
                    }
                })
            })
            .collect();

        let summary = execute(&ops, &options(2)).await.unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 5);
        assert!(summary.rounds <= 5);
    }

    #[tokio::test]
    async fn test_successes_are_not_rerun() {
        let good = Arc::new(AtomicUsize::new(0));
        let flaky_attempts = Arc::new(AtomicUsize::new(0));

        let good_op = {
            let good = Arc::clone(&good);
            Operation::new("good", move || {
                let good = Arc::clone(&good);
                async move {
                    good.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        };
        let flaky_op = {
            let attempts = Arc::clone(&flaky_attempts);
            Operation::new("flaky", move || {
                let attempts = Arc::clone(&attempts);
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                        anyhow::bail!("not yet");
                    }
                    Ok(())
                }
            })
        };

        // with halt_after 3 two identical failure rounds are tolerated
        let summary = execute(&[good_op, flaky_op], &options(3)).await.unwrap();
        assert_eq!(good.load(Ordering::SeqCst), 1);
        assert_eq!(flaky_attempts.load(Ordering::SeqCst), 3);
        assert_eq!(summary.rounds, 3);
        assert_eq!(summary.retries, 2);
    }

    #[tokio::test]
    async fn test_halts_on_repeated_failure_count() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let ops: Vec<_> = (0..3)
            .map(|i| {
                let attempts = Arc::clone(&attempts);
                Operation::new(format!("broken {i}"), move || {
                    let attempts = Arc::clone(&attempts);
                    async move {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        Err(anyhow::anyhow!("permanent failure"))
                    }
                })
            })
            .collect();

        let err = execute(&ops, &options(2)).await.unwrap_err();
        match err {
            Error::OperationsStalled { rounds, failures } => {
                assert_eq!(rounds, 2);
                assert_eq!(failures.len(), 3);
                assert_eq!(failures[0].label, "broken 0");
                assert_eq!(failures[0].error, "permanent failure");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_concurrency_bound() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let ops: Vec<_> = (0..8)
            .map(|i| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                Operation::new(format!("sleep {i}"), move || {
                    let in_flight = Arc::clone(&in_flight);
                    let peak = Arc::clone(&peak);
                    async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
            })
            .collect();

        let opts = ExecutorOptions {
            jobs: 2,
            halt_after: 2,
        };
        execute(&ops, &opts).await.unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
