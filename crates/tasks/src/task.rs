//! The task contract.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;

/// Lower bound for the default per-cycle timeout.
pub const MIN_CYCLE_TIMEOUT: Duration = Duration::from_secs(1);

/// A unit of recurring background work.
///
/// `run` performs exactly one cycle. Implementations must be safe to call
/// repeatedly, must not hold a transaction across unrelated items, and should
/// check [`TaskContext::is_cancelled`] between items so shutdown is prompt.
#[async_trait]
pub trait Task: Send + Sync {
    /// Unique name within a manager.
    fn name(&self) -> &str;

    /// Time between the starts of consecutive cycles.
    fn interval(&self) -> Duration;

    fn enabled(&self) -> bool {
        true
    }

    /// Upper bound for one cycle. Defaults to the interval, but never less than
    /// [`MIN_CYCLE_TIMEOUT`].
    fn cycle_timeout(&self) -> Duration {
        self.interval().max(MIN_CYCLE_TIMEOUT)
    }

    async fn run(&self, ctx: &TaskContext) -> Result<CycleReport, TaskError>;

    fn descriptor(&self) -> TaskDescriptor {
        TaskDescriptor {
            name: self.name().to_string(),
            interval: self.interval(),
            enabled: self.enabled(),
            cycle_timeout: self.cycle_timeout(),
        }
    }
}

/// Static description of a registered task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDescriptor {
    pub name: String,
    pub interval: Duration,
    pub enabled: bool,
    pub cycle_timeout: Duration,
}

/// Per-cycle context handed to [`Task::run`].
#[derive(Debug, Clone)]
pub struct TaskContext {
    cycle: u64,
    token: CancellationToken,
    deadline: Instant,
}

impl TaskContext {
    pub fn new(cycle: u64, token: CancellationToken, timeout: Duration) -> Self {
        Self {
            cycle,
            token,
            deadline: Instant::now() + timeout,
        }
    }

    /// 1-based cycle number of this run.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the manager asks the task to stop.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Time left before the manager drops this cycle.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Rows returned by the batch query.
    pub selected: usize,
    /// Rows moved to a successful terminal status.
    pub resolved: usize,
    /// Rows moved to a failed terminal status.
    pub failed: usize,
    /// Rows left untouched after a transient error.
    pub retried: usize,
    /// Rows left untouched because they are not yet actionable.
    pub deferred: usize,
    /// Rows another worker had locked or already resolved.
    pub skipped: usize,
}

impl CycleReport {
    /// Rows whose state changed this cycle.
    pub fn processed(&self) -> usize {
        self.resolved + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Duration);

    #[async_trait]
    impl Task for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn interval(&self) -> Duration {
            self.0
        }

        async fn run(&self, _ctx: &TaskContext) -> Result<CycleReport, TaskError> {
            Ok(CycleReport::default())
        }
    }

    #[test]
    fn default_timeout_has_a_floor() {
        assert_eq!(Fixed(Duration::from_millis(10)).cycle_timeout(), MIN_CYCLE_TIMEOUT);
        assert_eq!(Fixed(Duration::from_secs(30)).cycle_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn descriptor_reflects_task() {
        let d = Fixed(Duration::from_secs(5)).descriptor();
        assert_eq!(d.name, "fixed");
        assert!(d.enabled);
        assert_eq!(d.interval, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn context_observes_cancellation() {
        let token = CancellationToken::new();
        let ctx = TaskContext::new(3, token.child_token(), Duration::from_secs(1));
        assert_eq!(ctx.cycle(), 3);
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
        ctx.cancelled().await;
    }
}
