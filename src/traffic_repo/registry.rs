// Interface registry: name -> stable id, created on first sight.
// Totals are checked to stay 64-bit integers: SQLite turns an overflowing `+` into REAL instead of failing.
// The create path tolerates a concurrent creator: a UNIQUE violation on `name` falls back to lookup.

use sqlx::Row;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{Result, TrafficError};
use crate::models::InterfaceRecord;

/// Creates the interface table if not present.
pub async fn init_interface_table(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS interface (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL CHECK (length(name) > 0),
            alias TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created INTEGER NOT NULL,
            updated INTEGER NOT NULL,
            rx_total INTEGER NOT NULL DEFAULT 0 CHECK (typeof(rx_total) = 'integer' AND rx_total >= 0),
            tx_total INTEGER NOT NULL DEFAULT 0 CHECK (typeof(tx_total) = 'integer' AND tx_total >= 0)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub(super) async fn lookup(pool: &SqlitePool, name: &str) -> Result<Option<i64>> {
    let id = sqlx::query_scalar::<_, i64>("SELECT id FROM interface WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    Ok(id)
}

/// Id for `name`, inserting a fresh row (active, zero totals, created = updated = `now_ms`) if unseen.
pub(super) async fn resolve(pool: &SqlitePool, name: &str, now_ms: i64) -> Result<i64> {
    if let Some(id) = lookup(pool, name).await? {
        return Ok(id);
    }

    let inserted = sqlx::query(
        "INSERT INTO interface (name, active, created, updated, rx_total, tx_total) VALUES ($1, 1, $2, $2, 0, 0)",
    )
    .bind(name)
    .bind(now_ms)
    .execute(pool)
    .await;

    match inserted {
        Ok(r) => {
            let id = r.last_insert_rowid();
            debug!(interface = name, id, "interface created");
            Ok(id)
        }
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            debug!(interface = name, "lost create race, using existing row");
            lookup(pool, name)
                .await?
                .ok_or(TrafficError::Storage(sqlx::Error::RowNotFound))
        }
        Err(e) => Err(e.into()),
    }
}

pub(super) async fn fetch(pool: &SqlitePool, name: &str) -> Result<Option<InterfaceRecord>> {
    let row = sqlx::query(
        "SELECT id, name, alias, active, created, updated, rx_total, tx_total FROM interface WHERE name = $1",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(parse_interface_row).transpose()
}

pub(super) async fn fetch_all(pool: &SqlitePool) -> Result<Vec<InterfaceRecord>> {
    let rows = sqlx::query(
        "SELECT id, name, alias, active, created, updated, rx_total, tx_total FROM interface ORDER BY name ASC",
    )
    .fetch_all(pool)
    .await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        out.push(parse_interface_row(row)?);
    }
    Ok(out)
}

fn parse_interface_row(row: &sqlx::sqlite::SqliteRow) -> Result<InterfaceRecord> {
    Ok(InterfaceRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        alias: row.try_get("alias")?,
        active: row.try_get("active")?,
        created: row.try_get("created")?,
        updated: row.try_get("updated")?,
        rx_total: row.try_get("rx_total")?,
        tx_total: row.try_get("tx_total")?,
    })
}
