// Aggregate store: lifetime totals plus one counter row per (interface, window) per granularity.
// Schema for the bucket tables lives here; the transactional write is `apply_delta`.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::SqlitePool;
use tracing::error;

use super::bucket_key;
use crate::error::{Result, TrafficError};
use crate::models::{BucketRecord, Granularity, TimePolicy};

/// Creates one bucket table per granularity, with cascade from `interface`.
pub async fn init_bucket_tables(pool: &SqlitePool) -> anyhow::Result<()> {
    for granularity in Granularity::ALL {
        let table = granularity.table();
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                interface_id INTEGER NOT NULL REFERENCES interface(id) ON DELETE CASCADE,
                bucket_start INTEGER NOT NULL,
                rx INTEGER NOT NULL DEFAULT 0 CHECK (typeof(rx) = 'integer' AND rx >= 0),
                tx INTEGER NOT NULL DEFAULT 0 CHECK (typeof(tx) = 'integer' AND tx >= 0),
                CONSTRAINT u_{table} UNIQUE (interface_id, bucket_start)
            )
            "#
        ))
        .execute(pool)
        .await?;
    }
    Ok(())
}

/// Adds one delta to the interface totals and to all five windows containing `now`.
/// Either every counter moves or none does: any failure drops the transaction, which rolls back.
pub(super) async fn apply_delta(
    pool: &SqlitePool,
    policy: TimePolicy,
    interface_id: i64,
    rx: i64,
    tx: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    let now_ms = now.timestamp_millis();
    let keys = bucket_key::bucket_starts(policy, now);

    let mut txn = pool.begin().await?;

    // First statement writes, so the write lock is taken before any read snapshot exists.
    let total = sqlx::query(
        "UPDATE interface SET rx_total = rx_total + $1, tx_total = tx_total + $2, updated = $3 WHERE id = $4",
    )
    .bind(rx)
    .bind(tx)
    .bind(now_ms)
    .bind(interface_id)
    .execute(&mut *txn)
    .await?;
    if total.rows_affected() == 0 {
        return Err(TrafficError::Storage(sqlx::Error::RowNotFound));
    }

    for (granularity, bucket_start) in keys {
        let table = granularity.table();
        let r = sqlx::query(&format!(
            "INSERT INTO {table} (interface_id, bucket_start, rx, tx) VALUES ($1, $2, $3, $4) \
             ON CONFLICT(interface_id, bucket_start) DO UPDATE SET rx = rx + excluded.rx, tx = tx + excluded.tx"
        ))
        .bind(interface_id)
        .bind(bucket_start)
        .bind(rx)
        .bind(tx)
        .execute(&mut *txn)
        .await?;
        if r.rows_affected() != 1 {
            error!(
                interface_id,
                table,
                bucket_start,
                rows = r.rows_affected(),
                "bucket upsert did not touch exactly one row; rolling back"
            );
            return Err(TrafficError::ConsistencyViolation(format!(
                "{table} upsert for interface {interface_id} at {bucket_start} touched {} rows",
                r.rows_affected()
            )));
        }
    }

    txn.commit().await?;
    Ok(())
}

pub(super) async fn fetch_bucket(
    pool: &SqlitePool,
    interface_id: i64,
    granularity: Granularity,
    bucket_start: i64,
) -> Result<Option<BucketRecord>> {
    let table = granularity.table();
    let row = sqlx::query(&format!(
        "SELECT rx, tx FROM {table} WHERE interface_id = $1 AND bucket_start = $2"
    ))
    .bind(interface_id)
    .bind(bucket_start)
    .fetch_optional(pool)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some(BucketRecord {
        interface_id,
        granularity,
        bucket_start,
        rx: row.try_get("rx")?,
        tx: row.try_get("tx")?,
    }))
}

/// Buckets of one granularity for an interface, oldest first.
pub(super) async fn fetch_buckets(
    pool: &SqlitePool,
    interface_id: i64,
    granularity: Granularity,
) -> Result<Vec<BucketRecord>> {
    let table = granularity.table();
    let rows = sqlx::query(&format!(
        "SELECT bucket_start, rx, tx FROM {table} WHERE interface_id = $1 ORDER BY bucket_start ASC"
    ))
    .bind(interface_id)
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(BucketRecord {
            interface_id,
            granularity,
            bucket_start: row.try_get("bucket_start")?,
            rx: row.try_get("rx")?,
            tx: row.try_get("tx")?,
        });
    }
    Ok(out)
}

pub(super) async fn count_buckets(
    pool: &SqlitePool,
    interface_id: i64,
    granularity: Granularity,
) -> Result<i64> {
    let table = granularity.table();
    let count = sqlx::query_scalar::<_, i64>(&format!(
        "SELECT COUNT(*) FROM {table} WHERE interface_id = $1"
    ))
    .bind(interface_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}
