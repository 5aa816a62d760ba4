//! Concrete background tasks.
//!
//! All three tasks share [`process_batch`]: select a bounded batch of eligible
//! pending rows, then claim, decide and persist each row in its own
//! transaction. A row that cannot be decided right now stays pending with a fresh
//! `updated_at`, so the next tick starts with rows that were not looked at yet.
//!
//! A cycle stops early when the manager cancels it or when less than one item's
//! budget (the provider call timeout) is left before the cycle deadline. Rows
//! not reached stay pending for the next tick.

pub mod group;
pub mod payment;
pub mod refund;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use pinke_core::{Resolution, WorkItem, WorkStatus};
use pinke_tasks::{CycleReport, Task, TaskContext, TaskError};

use crate::store::WorkItemStore;

pub use group::GroupTask;
pub use payment::PaymentTask;
pub use refund::RefundTask;

/// The closed set of tasks the server runs.
pub enum BackgroundTask {
    Payment(PaymentTask),
    Refund(RefundTask),
    Group(GroupTask),
}

#[async_trait]
impl Task for BackgroundTask {
    fn name(&self) -> &str {
        match self {
            BackgroundTask::Payment(t) => t.name(),
            BackgroundTask::Refund(t) => t.name(),
            BackgroundTask::Group(t) => t.name(),
        }
    }

    fn interval(&self) -> Duration {
        match self {
            BackgroundTask::Payment(t) => t.interval(),
            BackgroundTask::Refund(t) => t.interval(),
            BackgroundTask::Group(t) => t.interval(),
        }
    }

    fn enabled(&self) -> bool {
        match self {
            BackgroundTask::Payment(t) => t.enabled(),
            BackgroundTask::Refund(t) => t.enabled(),
            BackgroundTask::Group(t) => t.enabled(),
        }
    }

    async fn run(&self, ctx: &TaskContext) -> Result<CycleReport, TaskError> {
        match self {
            BackgroundTask::Payment(t) => t.run(ctx).await,
            BackgroundTask::Refund(t) => t.run(ctx).await,
            BackgroundTask::Group(t) => t.run(ctx).await,
        }
    }
}

impl From<PaymentTask> for BackgroundTask {
    fn from(task: PaymentTask) -> Self {
        BackgroundTask::Payment(task)
    }
}

impl From<RefundTask> for BackgroundTask {
    fn from(task: RefundTask) -> Self {
        BackgroundTask::Refund(task)
    }
}

impl From<GroupTask> for BackgroundTask {
    fn from(task: GroupTask) -> Self {
        BackgroundTask::Group(task)
    }
}

/// What to do with one claimed row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Decision<S> {
    /// Persist a terminal status.
    Resolve(Resolution<S>),
    /// Transient failure; leave the row for the next tick.
    Retry(String),
    /// Not yet actionable; leave the row for the next tick.
    Defer,
}

/// Run one batch cycle against `store`.
///
/// A store failure while selecting ends the cycle with an error: transient for
/// [`StoreError::Unavailable`](crate::store::StoreError::Unavailable), failed
/// otherwise. Failures on a single row are logged and counted as retried; the
/// batch continues.
pub(crate) async fn process_batch<I, F, Fut>(
    task: &str,
    store: &dyn WorkItemStore<I>,
    ctx: &TaskContext,
    cutoff: DateTime<Utc>,
    limit: usize,
    item_budget: Duration,
    decide: F,
) -> Result<CycleReport, TaskError>
where
    I: WorkItem,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Decision<I::Status>>,
{
    let batch = store.pending_batch(cutoff, limit).await.map_err(|e| {
        if e.is_transient() {
            TaskError::transient(e.to_string())
        } else {
            TaskError::failed(e.to_string())
        }
    })?;

    let mut report = CycleReport {
        selected: batch.len(),
        ..CycleReport::default()
    };

    for item in batch {
        if ctx.is_cancelled() {
            debug!(task, cycle = ctx.cycle(), "cancelled between items");
            break;
        }
        let remaining = ctx.remaining();
        if remaining <= item_budget {
            debug!(
                task,
                cycle = ctx.cycle(),
                remaining_ms = remaining.as_millis() as u64,
                "cycle deadline too close for another item; stopping early"
            );
            break;
        }

        let id = item.key();
        let claim = match store.claim(id).await {
            Ok(Some(claim)) => claim,
            Ok(None) => {
                debug!(task, item_id = %id, "work item locked or already resolved; skipping");
                report.skipped += 1;
                continue;
            }
            Err(e) => {
                warn!(task, item_id = %id, error = %e, "failed to claim work item");
                report.retried += 1;
                continue;
            }
        };

        match decide(claim.item().clone()).await {
            Decision::Resolve(resolution) => {
                let status = resolution.status;
                match claim.resolve(resolution, Utc::now()).await {
                    Ok(resolved) if status.is_failure() => {
                        info!(
                            task,
                            kind = I::KIND,
                            item_id = %id,
                            status = %status,
                            reason = resolved.meta().failure_reason.as_deref().unwrap_or(""),
                            "work item failed"
                        );
                        report.failed += 1;
                    }
                    Ok(_) => {
                        debug!(task, kind = I::KIND, item_id = %id, status = %status, "work item resolved");
                        report.resolved += 1;
                    }
                    Err(e) => {
                        warn!(task, item_id = %id, error = %e, "failed to persist resolution");
                        report.retried += 1;
                    }
                }
            }
            Decision::Retry(reason) => {
                warn!(task, item_id = %id, reason = %reason, "transient failure; retrying next tick");
                if let Err(e) = claim.postpone(Utc::now()).await {
                    warn!(task, item_id = %id, error = %e, "failed to postpone work item");
                }
                report.retried += 1;
            }
            Decision::Defer => {
                if let Err(e) = claim.postpone(Utc::now()).await {
                    warn!(task, item_id = %id, error = %e, "failed to postpone work item");
                }
                report.deferred += 1;
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::time::Duration;

    use pinke_tasks::TaskContext;
    use tokio_util::sync::CancellationToken;

    pub fn ctx(cycle: u64) -> TaskContext {
        TaskContext::new(cycle, CancellationToken::new(), Duration::from_secs(5))
    }

    pub fn cancelled_ctx() -> TaskContext {
        let token = CancellationToken::new();
        token.cancel();
        TaskContext::new(1, token, Duration::from_secs(5))
    }

    pub fn ctx_with_timeout(timeout: Duration) -> TaskContext {
        TaskContext::new(1, CancellationToken::new(), timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pinke_payments::{Payment, PaymentStatus};
    use uuid::Uuid;

    use crate::store::{ClaimedItem, StoreError};
    use super::test_support::ctx;

    /// Store whose batch query always fails with the given error.
    struct FailingStore(StoreError);

    #[async_trait]
    impl WorkItemStore<Payment> for FailingStore {
        async fn insert(&self, _item: &Payment) -> Result<(), StoreError> {
            Err(self.0.clone())
        }

        async fn get(&self, _id: Uuid) -> Result<Option<Payment>, StoreError> {
            Err(self.0.clone())
        }

        async fn pending_batch(&self, _cutoff: DateTime<Utc>, _limit: usize) -> Result<Vec<Payment>, StoreError> {
            Err(self.0.clone())
        }

        async fn claim(&self, _id: Uuid) -> Result<Option<Box<dyn ClaimedItem<Payment>>>, StoreError> {
            Err(self.0.clone())
        }
    }

    async fn run_against(store: &FailingStore) -> Result<CycleReport, TaskError> {
        process_batch(
            "payment",
            store,
            &ctx(1),
            Utc::now(),
            10,
            Duration::ZERO,
            |_p: Payment| async { Decision::<PaymentStatus>::Defer },
        )
        .await
    }

    #[tokio::test]
    async fn unavailable_store_is_a_transient_cycle_error() {
        let store = FailingStore(StoreError::Unavailable("pool timed out".into()));
        let err = run_against(&store).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn other_store_failures_fail_the_cycle() {
        for e in [
            StoreError::Query("syntax error".into()),
            StoreError::Corrupt("unknown payment status `lost`".into()),
        ] {
            let err = run_against(&FailingStore(e)).await.unwrap_err();
            assert!(!err.is_transient(), "{err}");
        }
    }
}
