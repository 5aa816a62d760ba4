//! Database adapters: connection pool and schema wiring.

pub use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::store::StoreError;
use crate::store::postgres::map_sqlx_error;

/// Schema for the work-item tables. Every statement is idempotent.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS payments (
        id              UUID PRIMARY KEY,
        status          TEXT NOT NULL,
        failure_reason  TEXT,
        provider_ref    TEXT,
        processed_count INTEGER NOT NULL DEFAULT 0 CHECK (processed_count >= 0),
        created_at      TIMESTAMPTZ NOT NULL,
        updated_at      TIMESTAMPTZ NOT NULL,
        order_no        TEXT NOT NULL,
        amount_cents    BIGINT NOT NULL
    )
    "#,
    "ALTER TABLE payments ADD COLUMN IF NOT EXISTS provider_ref TEXT",
    "CREATE INDEX IF NOT EXISTS payments_status_updated_at_idx ON payments (status, updated_at)",
    r#"
    CREATE TABLE IF NOT EXISTS refunds (
        id              UUID PRIMARY KEY,
        status          TEXT NOT NULL,
        failure_reason  TEXT,
        provider_ref    TEXT,
        processed_count INTEGER NOT NULL DEFAULT 0 CHECK (processed_count >= 0),
        created_at      TIMESTAMPTZ NOT NULL,
        updated_at      TIMESTAMPTZ NOT NULL,
        payment_id      UUID NOT NULL,
        amount_cents    BIGINT NOT NULL,
        reason          TEXT NOT NULL DEFAULT ''
    )
    "#,
    "ALTER TABLE refunds ADD COLUMN IF NOT EXISTS provider_ref TEXT",
    "CREATE INDEX IF NOT EXISTS refunds_status_updated_at_idx ON refunds (status, updated_at)",
    r#"
    CREATE TABLE IF NOT EXISTS group_orders (
        id               UUID PRIMARY KEY,
        status           TEXT NOT NULL,
        failure_reason   TEXT,
        provider_ref     TEXT,
        processed_count  INTEGER NOT NULL DEFAULT 0 CHECK (processed_count >= 0),
        created_at       TIMESTAMPTZ NOT NULL,
        updated_at       TIMESTAMPTZ NOT NULL,
        title            TEXT NOT NULL,
        required_members INTEGER NOT NULL,
        joined_members   INTEGER NOT NULL DEFAULT 0,
        deadline         TIMESTAMPTZ NOT NULL
    )
    "#,
    "ALTER TABLE group_orders ADD COLUMN IF NOT EXISTS provider_ref TEXT",
    "CREATE INDEX IF NOT EXISTS group_orders_status_deadline_idx ON group_orders (status, deadline)",
];

/// Open the connection pool.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout())
        .connect(&config.url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))?;

    info!(max_connections = config.max_connections, "database pool connected");
    Ok(pool)
}

/// Create the work-item tables and indexes if they do not exist.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StoreError> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
    }
    info!(statements = SCHEMA.len(), "database schema ensured");
    Ok(())
}
