// Sampler tests: recording OS-style deltas, and spawn/shutdown of the background task

mod common;

use common::utc_repo;
use sqlx::Connection;
use std::sync::Arc;
use tempfile::TempDir;
use traffic_store::config::DatabaseConfig;
use traffic_store::models::{Granularity, TimePolicy};
use traffic_store::traffic_repo::TrafficRepo;
use traffic_store::worker::{
    InterfaceDelta, InterfaceFilter, NetworkCounters, PendingDeltas, SamplerConfig, SamplerDeps,
    TickSummary, record_deltas, spawn,
};

fn delta(name: &str, rx: u64, tx: u64) -> InterfaceDelta {
    InterfaceDelta {
        name: name.into(),
        rx,
        tx,
    }
}

#[tokio::test]
async fn record_deltas_records_each_interface() {
    let (_dir, repo) = utc_repo().await;
    let mut pending = PendingDeltas::default();
    let summary = record_deltas(
        &repo,
        &[delta("eth0", 1500, 200), delta("wlan0", 0, 0)],
        &mut pending,
    )
    .await;
    assert_eq!(
        summary,
        TickSummary {
            recorded: 2,
            failed: 0,
            held: 0
        }
    );

    let summary = record_deltas(&repo, &[delta("eth0", 500, 100)], &mut pending).await;
    assert_eq!(summary.recorded, 1);
    assert!(pending.is_empty());

    let eth0 = repo.get_interface("eth0").await.unwrap().unwrap();
    assert_eq!((eth0.rx_total, eth0.tx_total), (2000, 300));
    let wlan0 = repo.get_interface("wlan0").await.unwrap().unwrap();
    assert_eq!((wlan0.rx_total, wlan0.tx_total), (0, 0));
}

#[tokio::test]
async fn record_deltas_drops_unstorable_values() {
    let (_dir, repo) = utc_repo().await;
    let mut pending = PendingDeltas::default();
    let summary = record_deltas(
        &repo,
        &[delta("eth0", u64::MAX, 1), delta("eth1", 10, 10), delta("", 1, 1)],
        &mut pending,
    )
    .await;
    assert_eq!(summary.recorded, 1);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.held, 0);
    assert!(pending.is_empty());
    assert!(repo.get_interface("eth0").await.unwrap().is_none());
    assert!(repo.get_interface("eth1").await.unwrap().is_some());
}

#[tokio::test]
async fn storage_failure_holds_delta_until_next_tick() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("traffic.db");
    let database = DatabaseConfig {
        path: path.to_str().unwrap().into(),
        max_pool_size: 2,
        busy_timeout_ms: 50,
    };
    let repo = TrafficRepo::connect_with(&database, TimePolicy::Utc)
        .await
        .unwrap();
    repo.init().await.unwrap();
    repo.record("eth0", 1000, 100).await.unwrap();

    // Another writer holds the write lock past the busy timeout.
    let mut writer = sqlx::SqliteConnection::connect(&format!("sqlite:{}", database.path))
        .await
        .unwrap();
    sqlx::query("BEGIN IMMEDIATE")
        .execute(&mut writer)
        .await
        .unwrap();

    let mut pending = PendingDeltas::default();
    let summary = record_deltas(&repo, &[delta("eth0", 100, 10)], &mut pending).await;
    assert_eq!(
        summary,
        TickSummary {
            recorded: 0,
            failed: 1,
            held: 1
        }
    );
    assert_eq!(pending.get("eth0"), Some((100, 10)));
    let eth0 = repo.get_interface("eth0").await.unwrap().unwrap();
    assert_eq!((eth0.rx_total, eth0.tx_total), (1000, 100));

    sqlx::query("ROLLBACK").execute(&mut writer).await.unwrap();
    writer.close().await.unwrap();

    let summary = record_deltas(&repo, &[delta("eth0", 5, 5)], &mut pending).await;
    assert_eq!(summary.recorded, 1);
    assert_eq!(summary.held, 0);
    assert!(pending.is_empty());
    let eth0 = repo.get_interface("eth0").await.unwrap().unwrap();
    assert_eq!((eth0.rx_total, eth0.tx_total), (1105, 115));

    let years = repo.get_buckets(eth0.id, Granularity::Year).await.unwrap();
    let rx: i64 = years.iter().map(|b| b.rx).sum();
    assert_eq!(rx, 1105);
}

#[tokio::test]
async fn network_counters_apply_filter() {
    let counters = NetworkCounters::new();
    let filter = InterfaceFilter {
        names: vec!["definitely-not-an-interface".into()],
        include_loopback: false,
    };
    let deltas = counters.read_deltas(&filter).await.unwrap();
    assert!(deltas.is_empty());
}

#[tokio::test]
async fn sampler_spawns_and_shuts_down() {
    let (_dir, repo) = utc_repo().await;
    let repo = Arc::new(repo);
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    let handle = spawn(
        SamplerDeps {
            traffic_repo: repo.clone(),
            counters: NetworkCounters::new(),
            shutdown_rx,
        },
        SamplerConfig {
            sample_interval_ms: 20,
            stats_log_interval_secs: 3600,
            filter: InterfaceFilter {
                names: vec![],
                include_loopback: true,
            },
        },
    );
    tokio::time::sleep(tokio::time::Duration::from_millis(120)).await;
    let _ = shutdown_tx.send(());
    handle.await.unwrap();

    // Every recorded interface must have consistent totals vs. its year bucket.
    for iface in repo.list_interfaces().await.unwrap() {
        let years = repo
            .get_buckets(iface.id, Granularity::Year)
            .await
            .unwrap();
        let rx: i64 = years.iter().map(|b| b.rx).sum();
        let tx: i64 = years.iter().map(|b| b.tx).sum();
        assert_eq!((rx, tx), (iface.rx_total, iface.tx_total), "{}", iface.name);
    }
}
