//! Work items: persisted rows that background tasks claim, decide and resolve.
//!
//! Every workflow table (payments, refunds, group orders) shares the same
//! lifecycle bookkeeping:
//!
//! - a `status` that starts in the workflow's pending state and moves exactly once
//!   into a terminal state;
//! - an optional `failure_reason` recorded alongside a terminal failure;
//! - an optional `provider_ref` holding the external reference of a successful
//!   outcome (transaction id, refund reference);
//! - a `processed_count` incremented once per successful resolution, which lets
//!   operators (and tests) detect double processing;
//! - `created_at` / `updated_at` timestamps. `updated_at` also moves when a task
//!   postpones a row, which rotates it behind rows not yet looked at.
//!
//! Domain types embed a [`WorkMeta`] and implement [`WorkItem`] so the storage and
//! scheduling layers can treat them uniformly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};

/// Status enum of a workflow table.
pub trait WorkStatus:
    Copy + Eq + core::fmt::Debug + core::fmt::Display + Send + Sync + 'static
{
    /// The status new rows are created with and batches are selected by.
    const PENDING: Self;

    /// Stable text representation stored in the database.
    fn as_str(&self) -> &'static str;

    /// Inverse of [`WorkStatus::as_str`].
    fn parse(value: &str) -> Option<Self>;

    /// Terminal statuses are never selected again.
    fn is_terminal(&self) -> bool;

    /// Terminal statuses that record an unsuccessful outcome.
    fn is_failure(&self) -> bool;
}

/// Outcome a task decided for one work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution<S> {
    pub status: S,
    pub reason: Option<String>,
    pub provider_ref: Option<String>,
}

impl<S: WorkStatus> Resolution<S> {
    pub fn new(status: S) -> Self {
        Self {
            status,
            reason: None,
            provider_ref: None,
        }
    }

    pub fn with_reason(status: S, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: Some(reason.into()),
            provider_ref: None,
        }
    }

    /// Attach the provider's reference for this outcome.
    pub fn with_provider_ref(mut self, provider_ref: impl Into<String>) -> Self {
        self.provider_ref = Some(provider_ref.into());
        self
    }
}

/// Lifecycle bookkeeping shared by all work items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkMeta<S> {
    pub status: S,
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub provider_ref: Option<String>,
    pub processed_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<S: WorkStatus> WorkMeta<S> {
    /// Fresh metadata for a row created at `at`.
    pub fn pending(at: DateTime<Utc>) -> Self {
        Self {
            status: S::PENDING,
            failure_reason: None,
            provider_ref: None,
            processed_count: 0,
            created_at: at,
            updated_at: at,
        }
    }

    /// Apply a resolution.
    ///
    /// Only pending rows can be resolved, and only into a terminal status. This is
    /// the in-process mirror of the `WHERE status = 'pending'` guard the SQL
    /// stores use.
    pub fn apply(&mut self, resolution: &Resolution<S>, at: DateTime<Utc>) -> DomainResult<()> {
        if self.status != S::PENDING {
            return Err(DomainError::conflict(format!(
                "cannot resolve item in status {} (already resolved)",
                self.status
            )));
        }
        if !resolution.status.is_terminal() {
            return Err(DomainError::validation(format!(
                "resolution status {} is not terminal",
                resolution.status
            )));
        }

        self.status = resolution.status;
        self.failure_reason = resolution.reason.clone();
        self.provider_ref = resolution.provider_ref.clone();
        self.processed_count += 1;
        self.updated_at = at;
        Ok(())
    }

    /// Leave the row pending but stamp it as looked at.
    ///
    /// Batches are ordered by `updated_at` first, so a postponed row queues up
    /// behind every row that has not been visited since.
    pub fn postpone(&mut self, at: DateTime<Utc>) -> DomainResult<()> {
        if self.status != S::PENDING {
            return Err(DomainError::conflict(format!(
                "cannot postpone item in status {}",
                self.status
            )));
        }
        self.updated_at = at;
        Ok(())
    }
}

/// A persisted row eligible for background processing.
pub trait WorkItem: Clone + core::fmt::Debug + Send + Sync + 'static {
    type Status: WorkStatus;

    /// Short kind name used in logs ("payment", "refund", ...).
    const KIND: &'static str;

    /// Primary key.
    fn key(&self) -> Uuid;

    fn meta(&self) -> &WorkMeta<Self::Status>;

    fn meta_mut(&mut self) -> &mut WorkMeta<Self::Status>;

    /// Timestamp compared against the batch cutoff.
    ///
    /// Defaults to the creation time; deadline-driven workflows override it.
    fn eligible_at(&self) -> DateTime<Utc> {
        self.meta().created_at
    }

    fn status(&self) -> Self::Status {
        self.meta().status
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.meta().created_at
    }

    fn processed_count(&self) -> u32 {
        self.meta().processed_count
    }

    fn resolve(&mut self, resolution: &Resolution<Self::Status>, at: DateTime<Utc>) -> DomainResult<()> {
        self.meta_mut().apply(resolution, at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    enum Phase {
        Waiting,
        Done,
        Broken,
    }

    impl core::fmt::Display for Phase {
        fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            f.write_str(self.as_str())
        }
    }

    impl WorkStatus for Phase {
        const PENDING: Self = Phase::Waiting;

        fn as_str(&self) -> &'static str {
            match self {
                Phase::Waiting => "waiting",
                Phase::Done => "done",
                Phase::Broken => "broken",
            }
        }

        fn parse(value: &str) -> Option<Self> {
            match value {
                "waiting" => Some(Phase::Waiting),
                "done" => Some(Phase::Done),
                "broken" => Some(Phase::Broken),
                _ => None,
            }
        }

        fn is_terminal(&self) -> bool {
            !matches!(self, Phase::Waiting)
        }

        fn is_failure(&self) -> bool {
            matches!(self, Phase::Broken)
        }
    }

    #[test]
    fn resolving_pending_item_increments_processed_count() {
        let mut meta = WorkMeta::<Phase>::pending(Utc::now());
        meta.apply(&Resolution::with_reason(Phase::Broken, "bad input"), Utc::now())
            .unwrap();

        assert_eq!(meta.status, Phase::Broken);
        assert_eq!(meta.failure_reason.as_deref(), Some("bad input"));
        assert_eq!(meta.processed_count, 1);
    }

    #[test]
    fn terminal_item_cannot_be_resolved_twice() {
        let mut meta = WorkMeta::<Phase>::pending(Utc::now());
        meta.apply(&Resolution::new(Phase::Done), Utc::now()).unwrap();

        let err = meta
            .apply(&Resolution::new(Phase::Broken), Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert_eq!(meta.status, Phase::Done);
        assert_eq!(meta.processed_count, 1);
    }

    #[test]
    fn non_terminal_resolution_is_rejected() {
        let mut meta = WorkMeta::<Phase>::pending(Utc::now());
        let err = meta
            .apply(&Resolution::new(Phase::Waiting), Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(meta.processed_count, 0);
    }

    #[test]
    fn provider_reference_is_kept_on_success() {
        let mut meta = WorkMeta::<Phase>::pending(Utc::now());
        meta.apply(&Resolution::new(Phase::Done).with_provider_ref("tx-1"), Utc::now())
            .unwrap();

        assert_eq!(meta.status, Phase::Done);
        assert_eq!(meta.provider_ref.as_deref(), Some("tx-1"));
        assert_eq!(meta.failure_reason, None);
    }

    #[test]
    fn postpone_only_moves_updated_at() {
        let created = Utc::now();
        let mut meta = WorkMeta::<Phase>::pending(created);
        let later = created + chrono::Duration::seconds(30);
        meta.postpone(later).unwrap();

        assert_eq!(meta.status, Phase::Waiting);
        assert_eq!(meta.processed_count, 0);
        assert_eq!(meta.created_at, created);
        assert_eq!(meta.updated_at, later);

        meta.apply(&Resolution::new(Phase::Done), later).unwrap();
        let err = meta.postpone(later).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn status_text_round_trips() {
        for s in [Phase::Waiting, Phase::Done, Phase::Broken] {
            assert_eq!(Phase::parse(s.as_str()), Some(s));
        }
        assert_eq!(Phase::parse("unknown"), None);
    }
}
