//! Postgres-backed work-item store.
//!
//! ## Claiming
//!
//! `claim` opens a transaction and locks the row with
//! `SELECT … WHERE id = $1 AND status = 'pending' FOR UPDATE SKIP LOCKED`. A row
//! locked by another worker, or resolved since the batch was read, yields no
//! claim. The transaction stays open for the lifetime of the claim; `resolve`
//! and `postpone` update and commit, drop rolls back.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (serialization failure / deadlock / lock not available / cancel) | `40001`, `40P01`, `55P03`, `57014` | `Unavailable` |
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (other) | Any other | `Query` |
//! | PoolTimedOut, PoolClosed, Io, Tls, Protocol | N/A | `Unavailable` |
//! | ColumnDecode, Decode, ColumnNotFound, TypeNotFound | N/A | `Corrupt` |
//! | Other | N/A | `Query` |

use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use pinke_core::{DomainError, Resolution, WorkItem, WorkMeta, WorkStatus};
use pinke_groups::GroupOrder;
use pinke_payments::{Payment, Refund};

use super::{ClaimedItem, StoreError, WorkItemStore};

pub type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

/// Columns every work-item table carries, in bind order.
const META_COLUMNS: &str =
    "id, status, failure_reason, provider_ref, processed_count, created_at, updated_at";

const META_COLUMN_COUNT: usize = 7;

/// Table mapping for a work item.
pub trait PgWorkItem: WorkItem {
    const TABLE: &'static str;

    /// Column compared against the batch cutoff.
    const ELIGIBLE_COLUMN: &'static str;

    /// Domain columns, in the order [`PgWorkItem::bind_domain`] binds them.
    const DOMAIN_COLUMNS: &'static [&'static str];

    fn bind_domain<'q>(&'q self, query: PgQuery<'q>) -> PgQuery<'q>;

    fn from_row(row: &PgRow, meta: WorkMeta<Self::Status>) -> Result<Self, sqlx::Error>;
}

impl PgWorkItem for Payment {
    const TABLE: &'static str = "payments";
    const ELIGIBLE_COLUMN: &'static str = "created_at";
    const DOMAIN_COLUMNS: &'static [&'static str] = &["order_no", "amount_cents"];

    fn bind_domain<'q>(&'q self, query: PgQuery<'q>) -> PgQuery<'q> {
        query.bind(self.order_no.as_str()).bind(self.amount_cents)
    }

    fn from_row(row: &PgRow, meta: WorkMeta<Self::Status>) -> Result<Self, sqlx::Error> {
        Ok(Payment {
            id: row.try_get::<Uuid, _>("id")?.into(),
            order_no: row.try_get("order_no")?,
            amount_cents: row.try_get("amount_cents")?,
            meta,
        })
    }
}

impl PgWorkItem for Refund {
    const TABLE: &'static str = "refunds";
    const ELIGIBLE_COLUMN: &'static str = "created_at";
    const DOMAIN_COLUMNS: &'static [&'static str] = &["payment_id", "amount_cents", "reason"];

    fn bind_domain<'q>(&'q self, query: PgQuery<'q>) -> PgQuery<'q> {
        query
            .bind(*self.payment_id.as_uuid())
            .bind(self.amount_cents)
            .bind(self.reason.as_str())
    }

    fn from_row(row: &PgRow, meta: WorkMeta<Self::Status>) -> Result<Self, sqlx::Error> {
        Ok(Refund {
            id: row.try_get::<Uuid, _>("id")?.into(),
            payment_id: row.try_get::<Uuid, _>("payment_id")?.into(),
            amount_cents: row.try_get("amount_cents")?,
            reason: row.try_get("reason")?,
            meta,
        })
    }
}

impl PgWorkItem for GroupOrder {
    const TABLE: &'static str = "group_orders";
    const ELIGIBLE_COLUMN: &'static str = "deadline";
    const DOMAIN_COLUMNS: &'static [&'static str] =
        &["title", "required_members", "joined_members", "deadline"];

    fn bind_domain<'q>(&'q self, query: PgQuery<'q>) -> PgQuery<'q> {
        query
            .bind(self.title.as_str())
            .bind(self.required_members)
            .bind(self.joined_members)
            .bind(self.deadline)
    }

    fn from_row(row: &PgRow, meta: WorkMeta<Self::Status>) -> Result<Self, sqlx::Error> {
        Ok(GroupOrder {
            id: row.try_get::<Uuid, _>("id")?.into(),
            title: row.try_get("title")?,
            required_members: row.try_get("required_members")?,
            joined_members: row.try_get("joined_members")?,
            deadline: row.try_get("deadline")?,
            meta,
        })
    }
}

fn select_columns<I: PgWorkItem>() -> String {
    let mut cols = META_COLUMNS.to_string();
    for c in I::DOMAIN_COLUMNS {
        cols.push_str(", ");
        cols.push_str(c);
    }
    cols
}

fn insert_sql<I: PgWorkItem>() -> String {
    let total = META_COLUMN_COUNT + I::DOMAIN_COLUMNS.len();
    let placeholders: Vec<String> = (1..=total).map(|n| format!("${n}")).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        I::TABLE,
        select_columns::<I>(),
        placeholders.join(", ")
    )
}

fn batch_sql<I: PgWorkItem>() -> String {
    format!(
        "SELECT {} FROM {} WHERE status = $1 AND {} <= $2 ORDER BY updated_at ASC, created_at ASC, id ASC LIMIT $3",
        select_columns::<I>(),
        I::TABLE,
        I::ELIGIBLE_COLUMN
    )
}

fn claim_sql<I: PgWorkItem>() -> String {
    format!(
        "SELECT {} FROM {} WHERE id = $1 AND status = $2 FOR UPDATE SKIP LOCKED",
        select_columns::<I>(),
        I::TABLE
    )
}

fn resolve_sql<I: PgWorkItem>() -> String {
    format!(
        "UPDATE {} SET status = $1, failure_reason = $2, provider_ref = $3, \
         processed_count = processed_count + 1, updated_at = $4 WHERE id = $5 AND status = $6",
        I::TABLE
    )
}

fn postpone_sql<I: PgWorkItem>() -> String {
    format!(
        "UPDATE {} SET updated_at = $1 WHERE id = $2 AND status = $3",
        I::TABLE
    )
}

fn decode<I: PgWorkItem>(row: &PgRow) -> Result<I, StoreError> {
    let status: String = row
        .try_get("status")
        .map_err(|e| map_sqlx_error("decode", e))?;
    let status = I::Status::parse(&status)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown {} status `{status}`", I::KIND)))?;
    let processed_count: i32 = row
        .try_get("processed_count")
        .map_err(|e| map_sqlx_error("decode", e))?;

    let meta = WorkMeta {
        status,
        failure_reason: row
            .try_get("failure_reason")
            .map_err(|e| map_sqlx_error("decode", e))?,
        provider_ref: row
            .try_get("provider_ref")
            .map_err(|e| map_sqlx_error("decode", e))?,
        processed_count: u32::try_from(processed_count)
            .map_err(|_| StoreError::Corrupt(format!("negative processed_count {processed_count}")))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| map_sqlx_error("decode", e))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| map_sqlx_error("decode", e))?,
    };

    I::from_row(row, meta).map_err(|e| map_sqlx_error("decode", e))
}

/// Work-item store over one Postgres table.
pub struct PostgresWorkItemStore<I> {
    pool: PgPool,
    _item: PhantomData<fn() -> I>,
}

impl<I: PgWorkItem> PostgresWorkItemStore<I> {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            _item: PhantomData,
        }
    }
}

impl<I> Clone for PostgresWorkItemStore<I> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            _item: PhantomData,
        }
    }
}

#[async_trait]
impl<I: PgWorkItem> WorkItemStore<I> for PostgresWorkItemStore<I> {
    #[instrument(level = "debug", skip(self, item), fields(table = I::TABLE, id = %item.key()), err)]
    async fn insert(&self, item: &I) -> Result<(), StoreError> {
        let sql = insert_sql::<I>();
        let meta = item.meta();
        let query = sqlx::query(&sql)
            .bind(item.key())
            .bind(meta.status.as_str())
            .bind(meta.failure_reason.as_deref())
            .bind(meta.provider_ref.as_deref())
            .bind(meta.processed_count as i32)
            .bind(meta.created_at)
            .bind(meta.updated_at);

        item.bind_domain(query)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert", e))?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<I>, StoreError> {
        let sql = format!("SELECT {} FROM {} WHERE id = $1", select_columns::<I>(), I::TABLE);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        row.as_ref().map(decode::<I>).transpose()
    }

    #[instrument(level = "debug", skip(self), fields(table = I::TABLE), err)]
    async fn pending_batch(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<Vec<I>, StoreError> {
        let sql = batch_sql::<I>();
        let rows = sqlx::query(&sql)
            .bind(I::Status::PENDING.as_str())
            .bind(cutoff)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("pending_batch", e))?;

        rows.iter().map(decode::<I>).collect()
    }

    #[instrument(level = "debug", skip(self), fields(table = I::TABLE), err)]
    async fn claim(&self, id: Uuid) -> Result<Option<Box<dyn ClaimedItem<I>>>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let sql = claim_sql::<I>();
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(I::Status::PENDING.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("claim", e))?;

        match row {
            Some(row) => {
                let item = decode::<I>(&row)?;
                Ok(Some(Box::new(PgClaim { tx, item })))
            }
            None => {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                Ok(None)
            }
        }
    }
}

/// A row locked inside an open transaction.
struct PgClaim<I> {
    tx: Transaction<'static, Postgres>,
    item: I,
}

#[async_trait]
impl<I: PgWorkItem> ClaimedItem<I> for PgClaim<I> {
    fn item(&self) -> &I {
        &self.item
    }

    async fn resolve(self: Box<Self>, resolution: Resolution<I::Status>, at: DateTime<Utc>) -> Result<I, StoreError> {
        let PgClaim { mut tx, mut item } = *self;

        // Apply locally first so non-terminal resolutions never reach the table.
        item.resolve(&resolution, at).map_err(domain_to_store)?;

        let sql = resolve_sql::<I>();
        let result = sqlx::query(&sql)
            .bind(resolution.status.as_str())
            .bind(resolution.reason.as_deref())
            .bind(resolution.provider_ref.as_deref())
            .bind(at)
            .bind(item.key())
            .bind(I::Status::PENDING.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("resolve", e))?;

        if result.rows_affected() != 1 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::Conflict(format!(
                "{} {} is no longer pending",
                I::KIND,
                item.key()
            )));
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;
        Ok(item)
    }

    async fn postpone(self: Box<Self>, at: DateTime<Utc>) -> Result<(), StoreError> {
        let PgClaim { mut tx, mut item } = *self;
        item.meta_mut().postpone(at).map_err(domain_to_store)?;

        let sql = postpone_sql::<I>();
        sqlx::query(&sql)
            .bind(at)
            .bind(item.key())
            .bind(I::Status::PENDING.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("postpone", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }
}

fn domain_to_store(err: DomainError) -> StoreError {
    match err {
        DomainError::Conflict(msg) => StoreError::Conflict(msg),
        other => StoreError::Query(other.to_string()),
    }
}

/// Map SQLx errors to `StoreError`.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());

            match db_err.code().as_deref() {
                // Serialization failure, deadlock, lock not available, statement timeout
                Some("40001") | Some("40P01") | Some("55P03") | Some("57014") => {
                    StoreError::Unavailable(msg)
                }
                // Unique violation
                Some("23505") => StoreError::Conflict(msg),
                _ => StoreError::Query(msg),
            }
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool unavailable in {operation}: {err}"))
        }
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::Protocol(_) => {
            StoreError::Unavailable(format!("connection failure in {operation}: {err}"))
        }
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::TypeNotFound { .. } => {
            StoreError::Corrupt(format!("failed to decode row in {operation}: {err}"))
        }
        _ => StoreError::Query(format!("sqlx error in {operation}: {err}")),
    }
}
