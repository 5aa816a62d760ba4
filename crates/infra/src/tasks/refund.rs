//! Refund submission.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use pinke_core::Resolution;
use pinke_payments::{Refund, RefundStatus};
use pinke_tasks::{CycleReport, Task, TaskContext, TaskError};

use super::{process_batch, Decision};
use crate::config::TaskSchedule;
use crate::gateway::{GatewayError, RefundGateway};
use crate::store::WorkItemStore;

pub const REFUND_TASK: &str = "refund";

/// Submits pending refunds to the provider.
pub struct RefundTask {
    store: Arc<dyn WorkItemStore<Refund>>,
    gateway: Arc<dyn RefundGateway>,
    schedule: TaskSchedule,
}

impl RefundTask {
    pub fn new(
        store: Arc<dyn WorkItemStore<Refund>>,
        gateway: Arc<dyn RefundGateway>,
        schedule: TaskSchedule,
    ) -> Self {
        Self {
            store,
            gateway,
            schedule,
        }
    }

    async fn decide(&self, refund: Refund) -> Decision<RefundStatus> {
        if let Err(e) = refund.validate() {
            return Decision::Resolve(Resolution::with_reason(RefundStatus::Failed, e.to_string()));
        }

        match self.gateway.submit_refund(&refund).await {
            Ok(state) => Decision::Resolve(refund.decide(&state)),
            Err(GatewayError::Transient(msg)) => Decision::Retry(msg),
            Err(GatewayError::Permanent(msg)) => Decision::Resolve(Resolution::with_reason(
                RefundStatus::Failed,
                format!("provider error: {msg}"),
            )),
        }
    }
}

#[async_trait]
impl Task for RefundTask {
    fn name(&self) -> &str {
        REFUND_TASK
    }

    fn interval(&self) -> Duration {
        self.schedule.interval()
    }

    fn enabled(&self) -> bool {
        self.schedule.enabled
    }

    async fn run(&self, ctx: &TaskContext) -> Result<CycleReport, TaskError> {
        process_batch(
            REFUND_TASK,
            self.store.as_ref(),
            ctx,
            Utc::now(),
            self.schedule.batch_size,
            self.gateway.call_timeout(),
            |refund| self.decide(refund),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::SandboxGateway;
    use crate::store::InMemoryWorkItemStore;
    use crate::tasks::test_support::ctx;
    use pinke_core::PaymentId;
    use pinke_payments::RefundState;

    fn setup() -> (InMemoryWorkItemStore<Refund>, Arc<SandboxGateway>, RefundTask) {
        let store = InMemoryWorkItemStore::<Refund>::new();
        let gateway = Arc::new(SandboxGateway::new());
        let task = RefundTask::new(
            Arc::new(store.clone()),
            gateway.clone(),
            TaskSchedule {
                enabled: true,
                interval_ms: 10,
                batch_size: 5,
            },
        );
        (store, gateway, task)
    }

    #[tokio::test]
    async fn refunds_resolve_per_provider_answer() {
        let (store, gateway, task) = setup();
        let accepted = Refund::pending(PaymentId::new(), 300, "damaged", Utc::now());
        let rejected = Refund::pending(PaymentId::new(), 300, "changed mind", Utc::now());
        let invalid = Refund::pending(PaymentId::new(), -5, "typo", Utc::now());
        for r in [&accepted, &rejected, &invalid] {
            store.insert(r).await.unwrap();
        }
        gateway.script_refund(
            rejected.payment_id,
            [Ok(RefundState::Rejected {
                reason: "outside refund window".into(),
            })],
        );

        let report = task.run(&ctx(1)).await.unwrap();
        assert_eq!(report.resolved, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(gateway.calls(), 2);

        let get = |id: pinke_core::RefundId| {
            let store = store.clone();
            async move { store.get(id.into()).await.unwrap().unwrap() }
        };
        assert_eq!(get(accepted.id).await.meta.status, RefundStatus::Refunded);
        let r = get(rejected.id).await;
        assert_eq!(r.meta.status, RefundStatus::Failed);
        assert_eq!(r.meta.failure_reason.as_deref(), Some("outside refund window"));
        assert_eq!(get(invalid.id).await.meta.status, RefundStatus::Failed);
    }

    #[tokio::test]
    async fn transient_error_leaves_refund_pending() {
        let (store, gateway, task) = setup();
        let r = Refund::pending(PaymentId::new(), 300, "damaged", Utc::now());
        store.insert(&r).await.unwrap();
        gateway.script_refund(
            r.payment_id,
            [
                Err(GatewayError::Transient("connection reset".into())),
                Ok(RefundState::Refunded {
                    refund_ref: "rf-2".into(),
                }),
            ],
        );

        assert_eq!(task.run(&ctx(1)).await.unwrap().retried, 1);
        let row = store.get(r.id.into()).await.unwrap().unwrap();
        assert_eq!(row.meta.status, RefundStatus::Pending);

        assert_eq!(task.run(&ctx(2)).await.unwrap().resolved, 1);
        let row = store.get(r.id.into()).await.unwrap().unwrap();
        assert_eq!(row.meta.status, RefundStatus::Refunded);
        assert_eq!(row.meta.provider_ref.as_deref(), Some("rf-2"));
        assert_eq!(row.meta.processed_count, 1);
    }
}
