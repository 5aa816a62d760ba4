//! Group-order lifecycle advancement.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use pinke_groups::GroupOrder;
use pinke_tasks::{CycleReport, Task, TaskContext, TaskError};

use super::{process_batch, Decision};
use crate::config::TaskSchedule;
use crate::store::WorkItemStore;

pub const GROUP_TASK: &str = "group";

/// Closes open group orders whose deadline has passed.
pub struct GroupTask {
    store: Arc<dyn WorkItemStore<GroupOrder>>,
    schedule: TaskSchedule,
}

impl GroupTask {
    pub fn new(store: Arc<dyn WorkItemStore<GroupOrder>>, schedule: TaskSchedule) -> Self {
        Self { store, schedule }
    }
}

#[async_trait]
impl Task for GroupTask {
    fn name(&self) -> &str {
        GROUP_TASK
    }

    fn interval(&self) -> Duration {
        self.schedule.interval()
    }

    fn enabled(&self) -> bool {
        self.schedule.enabled
    }

    async fn run(&self, ctx: &TaskContext) -> Result<CycleReport, TaskError> {
        process_batch(
            GROUP_TASK,
            self.store.as_ref(),
            ctx,
            Utc::now(),
            self.schedule.batch_size,
            Duration::ZERO,
            |order: GroupOrder| async move { Decision::Resolve(order.decide()) },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryWorkItemStore;
    use crate::tasks::test_support::ctx;
    use chrono::Duration as ChronoDuration;
    use pinke_groups::GroupOrderStatus;

    #[tokio::test]
    async fn due_orders_complete_or_expire() {
        let store = InMemoryWorkItemStore::<GroupOrder>::new();
        let task = GroupTask::new(Arc::new(store.clone()), TaskSchedule::default());

        let now = Utc::now();
        let past = now - ChronoDuration::minutes(1);
        let full = GroupOrder::open("full", 3, 3, past, now - ChronoDuration::hours(1));
        let short = GroupOrder::open("short", 4, 1, past, now - ChronoDuration::hours(1));
        let broken = GroupOrder::open("broken", 0, 0, past, now - ChronoDuration::hours(1));
        let future = GroupOrder::open("future", 2, 0, now + ChronoDuration::hours(1), now);
        for g in [&full, &short, &broken, &future] {
            store.insert(g).await.unwrap();
        }

        let report = task.run(&ctx(1)).await.unwrap();
        assert_eq!(report.selected, 3);
        assert_eq!(report.resolved, 1);
        assert_eq!(report.failed, 2);

        let status = |g: &GroupOrder| {
            store
                .all()
                .into_iter()
                .find(|s| s.id == g.id)
                .map(|s| (s.meta.status, s.meta.failure_reason))
                .unwrap()
        };
        assert_eq!(status(&full), (GroupOrderStatus::Completed, None));
        assert_eq!(
            status(&short),
            (
                GroupOrderStatus::Expired,
                Some("not enough members (1/4)".to_string())
            )
        );
        assert_eq!(status(&broken).0, GroupOrderStatus::Failed);
        assert_eq!(status(&future), (GroupOrderStatus::Open, None));
    }
}
