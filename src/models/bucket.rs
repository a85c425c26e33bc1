// Time buckets: the five fixed granularities and one accumulated row.

use serde::{Deserialize, Serialize};

/// Bucket width. Each granularity owns one table with identical shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    FiveMinute,
    Hour,
    Day,
    Month,
    Year,
}

impl Granularity {
    /// Every granularity, finest first. The write path iterates this table.
    pub const ALL: [Granularity; 5] = [
        Granularity::FiveMinute,
        Granularity::Hour,
        Granularity::Day,
        Granularity::Month,
        Granularity::Year,
    ];

    /// Backing table name. Fixed identifiers only, never caller input.
    pub const fn table(self) -> &'static str {
        match self {
            Granularity::FiveMinute => "fiveminute",
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Month => "month",
            Granularity::Year => "year",
        }
    }
}

/// Which wall clock bucket boundaries follow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimePolicy {
    /// Server local time (DST-aware).
    #[default]
    Local,
    Utc,
}

/// Accumulated counters for one interface in one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketRecord {
    pub interface_id: i64,
    pub granularity: Granularity,
    /// Window start, epoch milliseconds (UTC instant).
    pub bucket_start: i64,
    pub rx: i64,
    pub tx: i64,
}
