//! End-to-end runs of the task manager against the in-memory store.
//!
//! Verifies:
//! - every eligible row reaches a terminal state within a few ticks
//! - no row is processed twice, even with two loops sharing one store
//! - shutdown is clean once the loops are idle

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};

    use pinke_core::{WorkItem, WorkStatus};
    use pinke_groups::{GroupOrder, GroupOrderStatus};
    use pinke_payments::{Payment, PaymentStatus, Refund, RefundStatus};
    use pinke_tasks::{CycleReport, Task, TaskContext, TaskError, TaskManager};

    use crate::config::{PaymentTaskConfig, TaskSchedule};
    use crate::gateway::SandboxGateway;
    use crate::store::InMemoryWorkItemStore;
    use crate::tasks::{BackgroundTask, GroupTask, PaymentTask, RefundTask};

    fn schedule() -> TaskSchedule {
        TaskSchedule {
            enabled: true,
            interval_ms: 10,
            batch_size: 5,
        }
    }

    fn payment_config() -> PaymentTaskConfig {
        PaymentTaskConfig {
            schedule: schedule(),
            grace_window_secs: 0,
            expire_after_secs: 600,
        }
    }

    /// Runs another task under a different name.
    struct Renamed<T> {
        name: &'static str,
        inner: T,
    }

    #[async_trait]
    impl<T: Task> Task for Renamed<T> {
        fn name(&self) -> &str {
            self.name
        }

        fn interval(&self) -> Duration {
            self.inner.interval()
        }

        async fn run(&self, ctx: &TaskContext) -> Result<CycleReport, TaskError> {
            self.inner.run(ctx).await
        }
    }

    async fn seed_payments(store: &InMemoryWorkItemStore<Payment>, count: usize) {
        let created = Utc::now() - ChronoDuration::seconds(30);
        for n in 0..count {
            // Every fourth row is invalid and must fail without a provider call.
            let amount = if n % 4 == 0 { 0 } else { 100 + n as i64 };
            let p = Payment::pending(format!("ORD-{n}"), amount, created);
            crate::store::WorkItemStore::insert(store, &p).await.unwrap();
        }
    }

    async fn wait_until_settled<I: WorkItem>(store: &InMemoryWorkItemStore<I>) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while tokio::time::Instant::now() < deadline {
            if store.all().iter().all(|i| i.status().is_terminal()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("work items still pending after 2s");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn payments_drain_within_a_few_ticks() {
        let store = InMemoryWorkItemStore::<Payment>::new();
        let gateway = Arc::new(SandboxGateway::new());
        seed_payments(&store, 12).await;

        let mut manager = TaskManager::new(Duration::from_secs(1));
        manager
            .register(PaymentTask::new(
                Arc::new(store.clone()),
                gateway.clone(),
                payment_config(),
            ))
            .unwrap();
        manager.start();

        wait_until_settled(&store).await;
        let report = manager.stop().await;
        assert!(report.is_clean());

        let rows = store.all();
        assert_eq!(rows.len(), 12);
        assert!(rows.iter().all(|p| p.meta.processed_count == 1));
        assert_eq!(
            rows.iter()
                .filter(|p| p.meta.status == PaymentStatus::Failed)
                .count(),
            3
        );
        // Invalid rows never reach the provider.
        assert_eq!(gateway.calls(), 9);

        let stats = manager.stats("payment").unwrap();
        assert!(stats.cycles >= 3, "batch of 5 needs at least 3 cycles");
        assert_eq!(stats.items_processed, 12);
        assert_eq!(stats.panicked, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn two_loops_on_one_store_never_double_process() {
        let store = InMemoryWorkItemStore::<Payment>::new();
        let gateway = Arc::new(SandboxGateway::new());
        seed_payments(&store, 40).await;

        let mut manager = TaskManager::new(Duration::from_secs(1));
        for name in ["payment-a", "payment-b"] {
            manager
                .register(Renamed {
                    name,
                    inner: PaymentTask::new(
                        Arc::new(store.clone()),
                        gateway.clone(),
                        payment_config(),
                    ),
                })
                .unwrap();
        }
        manager.start();

        wait_until_settled(&store).await;
        assert!(manager.stop().await.is_clean());

        assert!(store.all().iter().all(|p| p.meta.processed_count == 1));
        assert_eq!(gateway.calls(), 30);

        let a = manager.stats("payment-a").unwrap().items_processed;
        let b = manager.stats("payment-b").unwrap().items_processed;
        assert_eq!(a + b, 40);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn all_background_tasks_run_side_by_side() {
        let payments = InMemoryWorkItemStore::<Payment>::new();
        let refunds = InMemoryWorkItemStore::<Refund>::new();
        let groups = InMemoryWorkItemStore::<GroupOrder>::new();
        let gateway = Arc::new(SandboxGateway::new());

        seed_payments(&payments, 3).await;
        let refund = Refund::pending(pinke_core::PaymentId::new(), 50, "damaged", Utc::now());
        crate::store::WorkItemStore::insert(&refunds, &refund).await.unwrap();
        let now = Utc::now();
        let order = GroupOrder::open("team lunch", 2, 2, now - ChronoDuration::seconds(1), now);
        crate::store::WorkItemStore::insert(&groups, &order).await.unwrap();

        let tasks: Vec<BackgroundTask> = vec![
            PaymentTask::new(Arc::new(payments.clone()), gateway.clone(), payment_config()).into(),
            RefundTask::new(Arc::new(refunds.clone()), gateway.clone(), schedule()).into(),
            GroupTask::new(Arc::new(groups.clone()), schedule()).into(),
        ];

        let mut manager = TaskManager::new(Duration::from_secs(1));
        for task in tasks {
            manager.register(task).unwrap();
        }
        assert_eq!(manager.len(), 3);
        manager.start();

        wait_until_settled(&payments).await;
        wait_until_settled(&refunds).await;
        wait_until_settled(&groups).await;
        assert!(manager.stop().await.is_clean());

        assert_eq!(refunds.all()[0].meta.status, RefundStatus::Refunded);
        assert_eq!(groups.all()[0].meta.status, GroupOrderStatus::Completed);

        let names: Vec<_> = manager.snapshot().into_iter().map(|s| s.name).collect();
        assert_eq!(names, ["payment", "refund", "group"]);
    }
}
