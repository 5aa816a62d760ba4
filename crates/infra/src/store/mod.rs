//! Work-item persistence.
//!
//! A [`WorkItemStore`] selects bounded batches of pending rows and hands out
//! exclusive per-row claims. A claim is the unit of atomicity: resolving it
//! writes the terminal status, bumps `processed_count` and commits. Postponing
//! it only stamps `updated_at`; dropping it leaves the row untouched.
//!
//! Batches are ordered by `updated_at`, then `created_at`, then id. A row that
//! was looked at and postponed therefore rotates behind rows nobody has visited
//! since, and a batch full of undecidable rows cannot hide newer ones.
//!
//! Implementations:
//! - [`InMemoryWorkItemStore`]: tests and dev runs
//! - [`PostgresWorkItemStore`]: one transaction per claim, `FOR UPDATE SKIP LOCKED`

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use pinke_core::{Resolution, WorkItem};

pub use in_memory::InMemoryWorkItemStore;
pub use postgres::{PgWorkItem, PostgresWorkItemStore};

/// Storage error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Connection, pool or lock-contention failure; safe to retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The row changed underneath the caller (e.g. already resolved).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A persisted row could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// Any other query failure.
    #[error("query failed: {0}")]
    Query(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Persistence for one work-item table.
#[async_trait]
pub trait WorkItemStore<I: WorkItem>: Send + Sync {
    async fn insert(&self, item: &I) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<I>, StoreError>;

    /// Up to `limit` pending rows whose eligibility timestamp is `<= cutoff`,
    /// least recently touched first.
    async fn pending_batch(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<Vec<I>, StoreError>;

    /// Claim one row for exclusive processing.
    ///
    /// Returns `None` when the row is locked by another worker, no longer
    /// pending, or gone.
    async fn claim(&self, id: Uuid) -> Result<Option<Box<dyn ClaimedItem<I>>>, StoreError>;
}

/// An exclusively held row.
#[async_trait]
pub trait ClaimedItem<I: WorkItem>: Send {
    /// The row as read under the claim.
    fn item(&self) -> &I;

    /// Persist a terminal resolution and release the claim.
    async fn resolve(self: Box<Self>, resolution: Resolution<I::Status>, at: DateTime<Utc>) -> Result<I, StoreError>;

    /// Keep the row pending, stamp `updated_at = at` and release the claim.
    async fn postpone(self: Box<Self>, at: DateTime<Utc>) -> Result<(), StoreError>;
}
