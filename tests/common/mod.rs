// Shared test helpers

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;
use traffic_store::models::TimePolicy;
use traffic_store::traffic_repo::TrafficRepo;

/// Fresh, initialized repo in a temp dir. Keep the `TempDir` alive for the test's duration.
pub async fn utc_repo() -> (TempDir, TrafficRepo) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("traffic.db");
    let repo = TrafficRepo::connect(path.to_str().unwrap(), TimePolicy::Utc)
        .await
        .unwrap();
    repo.init().await.unwrap();
    (dir, repo)
}

pub fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
}

pub fn ms(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> i64 {
    at(y, mo, d, h, mi, s).timestamp_millis()
}
