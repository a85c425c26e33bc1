// SQLite traffic store. One `TrafficRepo` owns the pool; every operation goes through it.
// Schema: interface (totals), fiveminute/hour/day/month/year (windowed counters), info (dbversion).

pub mod aggregate;
pub mod bucket_key;
pub mod registry;

use crate::config::DatabaseConfig;
use crate::error::{Result, TrafficError};
use crate::models::{BucketRecord, Granularity, InterfaceRecord, TimePolicy};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, instrument};

/// Schema version written to `info.dbversion` on first init.
pub const DB_VERSION: i64 = 1;

const DEFAULT_MAX_POOL_SIZE: u32 = 8;
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TrafficRepo {
    pool: SqlitePool,
    time_policy: TimePolicy,
}

impl TrafficRepo {
    /// Connect with default pool size and busy timeout.
    pub async fn connect(path: &str, time_policy: TimePolicy) -> anyhow::Result<Self> {
        Self::open(path, DEFAULT_MAX_POOL_SIZE, DEFAULT_BUSY_TIMEOUT, time_policy).await
    }

    pub async fn connect_with(
        database: &DatabaseConfig,
        time_policy: TimePolicy,
    ) -> anyhow::Result<Self> {
        Self::open(
            &database.path,
            database.max_pool_size,
            Duration::from_millis(database.busy_timeout_ms),
            time_policy,
        )
        .await
    }

    /// Create parent dir and DB if missing; WAL so readers never block the writer.
    async fn open(
        path: &str,
        max_pool_size: u32,
        busy_timeout: Duration,
        time_policy: TimePolicy,
    ) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(busy_timeout)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_pool_size)
            .connect_with(opts)
            .await?;
        Ok(Self { pool, time_policy })
    }

    pub fn time_policy(&self) -> TimePolicy {
        self.time_policy
    }

    /// Create tables if they don't exist. Safe to call on every startup.
    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS info (name TEXT PRIMARY KEY, value TEXT NOT NULL)",
        )
        .execute(&self.pool)
        .await?;

        registry::init_interface_table(&self.pool).await?;
        aggregate::init_bucket_tables(&self.pool).await?;

        sqlx::query("INSERT OR IGNORE INTO info (name, value) VALUES ('dbversion', $1)")
            .bind(DB_VERSION.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn db_version(&self) -> anyhow::Result<Option<i64>> {
        let value =
            sqlx::query_scalar::<_, String>("SELECT value FROM info WHERE name = 'dbversion'")
                .fetch_optional(&self.pool)
                .await?;
        value
            .map(|v| v.parse::<i64>().map_err(|e| anyhow::anyhow!("info.dbversion: {}", e)))
            .transpose()
    }

    /// Record one sample stamped with the current time.
    pub async fn record(&self, interface: &str, rx: i64, tx: i64) -> Result<()> {
        self.record_at(interface, rx, tx, Utc::now()).await
    }

    /// Record one sample: resolve the interface, then add the delta to its totals and to the
    /// five windows containing `now` in a single transaction. Returns after commit.
    #[instrument(skip(self), fields(repo = "traffic", operation = "record"))]
    pub async fn record_at(
        &self,
        interface: &str,
        rx: i64,
        tx: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        validate_name(interface)?;
        if rx < 0 {
            return Err(TrafficError::InvalidInput(format!(
                "rx must be >= 0, got {}",
                rx
            )));
        }
        if tx < 0 {
            return Err(TrafficError::InvalidInput(format!(
                "tx must be >= 0, got {}",
                tx
            )));
        }

        let interface_id = registry::resolve(&self.pool, interface, now.timestamp_millis())
            .await
            .inspect_err(|e| debug!(error = %e, "interface resolution failed"))?;
        aggregate::apply_delta(&self.pool, self.time_policy, interface_id, rx, tx, now)
            .await
            .inspect_err(|e| debug!(error = %e, interface_id, "apply delta failed"))?;
        Ok(())
    }

    /// Stable id for `interface`, creating the record on first sight.
    #[instrument(skip(self), fields(repo = "traffic", operation = "resolve_interface"))]
    pub async fn resolve_interface(&self, interface: &str) -> Result<i64> {
        validate_name(interface)?;
        registry::resolve(&self.pool, interface, Utc::now().timestamp_millis()).await
    }

    pub async fn get_interface(&self, interface: &str) -> Result<Option<InterfaceRecord>> {
        registry::fetch(&self.pool, interface).await
    }

    pub async fn list_interfaces(&self) -> Result<Vec<InterfaceRecord>> {
        registry::fetch_all(&self.pool).await
    }

    /// Returns false when no interface has that name.
    pub async fn set_alias(&self, interface: &str, alias: Option<&str>) -> Result<bool> {
        let r = sqlx::query("UPDATE interface SET alias = $1 WHERE name = $2")
            .bind(alias)
            .bind(interface)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected() > 0)
    }

    /// Delete an interface and, by cascade, all of its buckets.
    #[instrument(skip(self), fields(repo = "traffic", operation = "remove_interface"))]
    pub async fn remove_interface(&self, interface: &str) -> Result<bool> {
        let r = sqlx::query("DELETE FROM interface WHERE name = $1")
            .bind(interface)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected() > 0)
    }

    pub async fn get_bucket(
        &self,
        interface_id: i64,
        granularity: Granularity,
        bucket_start: i64,
    ) -> Result<Option<BucketRecord>> {
        aggregate::fetch_bucket(&self.pool, interface_id, granularity, bucket_start).await
    }

    /// Bucket for the window containing `at`, using this repo's time policy.
    pub async fn get_bucket_at(
        &self,
        interface_id: i64,
        granularity: Granularity,
        at: DateTime<Utc>,
    ) -> Result<Option<BucketRecord>> {
        let bucket_start = bucket_key::bucket_start_ms(self.time_policy, granularity, at);
        self.get_bucket(interface_id, granularity, bucket_start).await
    }

    pub async fn get_buckets(
        &self,
        interface_id: i64,
        granularity: Granularity,
    ) -> Result<Vec<BucketRecord>> {
        aggregate::fetch_buckets(&self.pool, interface_id, granularity).await
    }

    /// Number of stored windows of `granularity` for an interface.
    pub async fn count_buckets(&self, interface_id: i64, granularity: Granularity) -> Result<i64> {
        aggregate::count_buckets(&self.pool, interface_id, granularity).await
    }
}

fn validate_name(interface: &str) -> Result<()> {
    if interface.trim().is_empty() {
        return Err(TrafficError::InvalidInput(
            "interface name must be non-empty".into(),
        ));
    }
    Ok(())
}
