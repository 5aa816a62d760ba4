//! In-memory work-item store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use pinke_core::{DomainError, Resolution, WorkItem, WorkStatus};

use super::{ClaimedItem, StoreError, WorkItemStore};

struct Inner<I> {
    rows: HashMap<Uuid, I>,
    claimed: HashSet<Uuid>,
}

/// Thread-safe in-memory store.
///
/// Claims are tracked in a lock set that mirrors row locks: a claimed row is
/// invisible to other `claim` calls until the claim is resolved, postponed or
/// dropped.
pub struct InMemoryWorkItemStore<I> {
    inner: Arc<RwLock<Inner<I>>>,
    available: Arc<AtomicBool>,
}

impl<I: WorkItem> InMemoryWorkItemStore<I> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                rows: HashMap::new(),
                claimed: HashSet::new(),
            })),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate an outage: while unavailable every call fails with
    /// [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Snapshot of every row, oldest first.
    pub fn all(&self) -> Vec<I> {
        let mut rows: Vec<I> = self.inner.read().rows.values().cloned().collect();
        rows.sort_by_key(|r| (r.created_at(), r.key()));
        rows
    }

    pub fn len(&self) -> usize {
        self.inner.read().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!("{} store offline", I::KIND)))
        }
    }
}

impl<I: WorkItem> Default for InMemoryWorkItemStore<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I> Clone for InMemoryWorkItemStore<I> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            available: Arc::clone(&self.available),
        }
    }
}

#[async_trait]
impl<I: WorkItem> WorkItemStore<I> for InMemoryWorkItemStore<I> {
    async fn insert(&self, item: &I) -> Result<(), StoreError> {
        self.check_available()?;
        let mut inner = self.inner.write();
        if inner.rows.contains_key(&item.key()) {
            return Err(StoreError::Conflict(format!(
                "{} {} already exists",
                I::KIND,
                item.key()
            )));
        }
        inner.rows.insert(item.key(), item.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<I>, StoreError> {
        self.check_available()?;
        Ok(self.inner.read().rows.get(&id).cloned())
    }

    async fn pending_batch(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<Vec<I>, StoreError> {
        self.check_available()?;
        let inner = self.inner.read();
        let mut batch: Vec<I> = inner
            .rows
            .values()
            .filter(|r| r.status() == I::Status::PENDING && r.eligible_at() <= cutoff)
            .cloned()
            .collect();
        batch.sort_by_key(|r| (r.meta().updated_at, r.created_at(), r.key()));
        batch.truncate(limit);
        Ok(batch)
    }

    async fn claim(&self, id: Uuid) -> Result<Option<Box<dyn ClaimedItem<I>>>, StoreError> {
        self.check_available()?;
        let mut inner = self.inner.write();
        if inner.claimed.contains(&id) {
            return Ok(None);
        }
        let item = match inner.rows.get(&id) {
            Some(row) if row.status() == I::Status::PENDING => row.clone(),
            _ => return Ok(None),
        };
        inner.claimed.insert(id);

        Ok(Some(Box::new(InMemoryClaim {
            inner: Arc::clone(&self.inner),
            id,
            item,
            open: true,
        })))
    }
}

struct InMemoryClaim<I> {
    inner: Arc<RwLock<Inner<I>>>,
    id: Uuid,
    item: I,
    open: bool,
}

impl<I> InMemoryClaim<I> {
    fn unlock(&mut self) {
        if self.open {
            self.inner.write().claimed.remove(&self.id);
            self.open = false;
        }
    }
}

impl<I> Drop for InMemoryClaim<I> {
    fn drop(&mut self) {
        self.unlock();
    }
}

#[async_trait]
impl<I: WorkItem> ClaimedItem<I> for InMemoryClaim<I> {
    fn item(&self) -> &I {
        &self.item
    }

    async fn resolve(self: Box<Self>, resolution: Resolution<I::Status>, at: DateTime<Utc>) -> Result<I, StoreError> {
        let mut claim = self;
        let updated = {
            let mut inner = claim.inner.write();
            let row = inner
                .rows
                .get_mut(&claim.id)
                .ok_or_else(|| StoreError::Conflict(format!("{} {} vanished", I::KIND, claim.id)))?;
            row.resolve(&resolution, at).map_err(domain_to_store)?;
            row.clone()
        };
        claim.unlock();
        Ok(updated)
    }

    async fn postpone(self: Box<Self>, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut claim = self;
        {
            let mut inner = claim.inner.write();
            let row = inner
                .rows
                .get_mut(&claim.id)
                .ok_or_else(|| StoreError::Conflict(format!("{} {} vanished", I::KIND, claim.id)))?;
            row.meta_mut().postpone(at).map_err(domain_to_store)?;
        }
        claim.unlock();
        Ok(())
    }
}

fn domain_to_store(err: DomainError) -> StoreError {
    match err {
        DomainError::Conflict(msg) => StoreError::Conflict(msg),
        other => StoreError::Query(other.to_string()),
    }
}
