// Background sampler: reads per-interface byte deltas from the OS each tick and records them.
// sysinfo reports bytes since the previous refresh, so every tick yields a delta directly.

use crate::traffic_repo::TrafficRepo;
use std::collections::HashMap;
use std::sync::Arc;
use sysinfo::Networks;
use tokio::time::{Duration, interval};
use tracing::Instrument;

/// Bytes moved on one interface since the previous sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDelta {
    pub name: String,
    pub rx: u64,
    pub tx: u64,
}

/// Which OS interfaces get recorded.
#[derive(Debug, Clone, Default)]
pub struct InterfaceFilter {
    /// Empty accepts every name.
    pub names: Vec<String>,
    pub include_loopback: bool,
}

impl InterfaceFilter {
    pub fn accepts(&self, name: &str) -> bool {
        if !self.names.is_empty() {
            return self.names.iter().any(|n| n == name);
        }
        self.include_loopback || !is_loopback(name)
    }
}

fn is_loopback(name: &str) -> bool {
    name == "lo" || name == "lo0"
}

/// OS network counters. Construction takes the baseline; each `read_deltas` returns bytes since the last call.
pub struct NetworkCounters {
    networks: Arc<std::sync::Mutex<Networks>>,
}

impl Default for NetworkCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkCounters {
    pub fn new() -> Self {
        Self {
            networks: Arc::new(std::sync::Mutex::new(Networks::new_with_refreshed_list())),
        }
    }

    pub async fn read_deltas(
        &self,
        filter: &InterfaceFilter,
    ) -> anyhow::Result<Vec<InterfaceDelta>> {
        let networks = self.networks.clone();
        let filter = filter.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = networks
                .lock()
                .map_err(|e| anyhow::anyhow!("sysinfo networks lock poisoned: {}", e))?;
            guard.refresh(true);
            let mut deltas: Vec<InterfaceDelta> = guard
                .list()
                .iter()
                .filter(|(name, _)| filter.accepts(name))
                .map(|(name, data)| InterfaceDelta {
                    name: name.clone(),
                    rx: data.received(),
                    tx: data.transmitted(),
                })
                .collect();
            deltas.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(deltas)
        })
        .await
        .map_err(|e| anyhow::anyhow!("sysinfo task join: {}", e))?
    }
}

/// Outcome of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub recorded: u64,
    pub failed: u64,
    /// Failed deltas kept for the next tick (subset of `failed`).
    pub held: u64,
}

/// Bytes read from the OS but not yet stored, per interface.
///
/// sysinfo has already advanced past these bytes, so dropping them would lose traffic for good.
/// They are folded into the interface's next delta instead.
#[derive(Debug, Default)]
pub struct PendingDeltas {
    by_name: HashMap<String, (u64, u64)>,
}

impl PendingDeltas {
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Held `(rx, tx)` for `name`, if any.
    pub fn get(&self, name: &str) -> Option<(u64, u64)> {
        self.by_name.get(name).copied()
    }

    fn hold(&mut self, delta: InterfaceDelta) {
        let entry = self.by_name.entry(delta.name).or_insert((0, 0));
        entry.0 = entry.0.saturating_add(delta.rx);
        entry.1 = entry.1.saturating_add(delta.tx);
    }

    /// Adds held bytes into `fresh` and empties the carry-over. Held interfaces missing from
    /// `fresh` are appended so they get another attempt.
    fn drain_into(&mut self, fresh: &[InterfaceDelta]) -> Vec<InterfaceDelta> {
        let mut merged: Vec<InterfaceDelta> = fresh
            .iter()
            .map(|d| match self.by_name.remove(&d.name) {
                Some((rx, tx)) => InterfaceDelta {
                    name: d.name.clone(),
                    rx: d.rx.saturating_add(rx),
                    tx: d.tx.saturating_add(tx),
                },
                None => d.clone(),
            })
            .collect();
        let mut leftover: Vec<InterfaceDelta> = self
            .by_name
            .drain()
            .map(|(name, (rx, tx))| InterfaceDelta { name, rx, tx })
            .collect();
        leftover.sort_by(|a, b| a.name.cmp(&b.name));
        merged.extend(leftover);
        merged
    }
}

/// Records each delta as its own sample, after folding in bytes held from earlier ticks.
///
/// A storage failure keeps the delta in `pending` for the next tick. Deltas that can never be
/// stored (rejected input, values beyond `i64`) are logged and dropped.
pub async fn record_deltas(
    repo: &TrafficRepo,
    deltas: &[InterfaceDelta],
    pending: &mut PendingDeltas,
) -> TickSummary {
    let mut summary = TickSummary::default();
    for d in pending.drain_into(deltas) {
        let (Ok(rx), Ok(tx)) = (i64::try_from(d.rx), i64::try_from(d.tx)) else {
            tracing::warn!(
                interface = %d.name,
                rx = d.rx,
                tx = d.tx,
                "delta exceeds storable range, dropping"
            );
            summary.failed += 1;
            continue;
        };
        match repo.record(&d.name, rx, tx).await {
            Ok(()) => summary.recorded += 1,
            Err(e) if e.is_invalid_input() => {
                tracing::warn!(
                    error = %e,
                    interface = %d.name,
                    operation = "record",
                    "traffic sample rejected, dropping"
                );
                summary.failed += 1;
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    interface = %d.name,
                    operation = "record",
                    "failed to record traffic sample, holding for next tick"
                );
                summary.failed += 1;
                summary.held += 1;
                pending.hold(d);
            }
        }
    }
    summary
}

pub struct SamplerDeps {
    pub traffic_repo: Arc<TrafficRepo>,
    pub counters: NetworkCounters,
    pub shutdown_rx: tokio::sync::oneshot::Receiver<()>,
}

pub struct SamplerConfig {
    pub sample_interval_ms: u64,
    /// How often to log sampler stats (real seconds).
    pub stats_log_interval_secs: u64,
    pub filter: InterfaceFilter,
}

pub fn spawn(deps: SamplerDeps, config: SamplerConfig) -> tokio::task::JoinHandle<()> {
    let SamplerDeps {
        traffic_repo,
        counters,
        mut shutdown_rx,
    } = deps;
    let SamplerConfig {
        sample_interval_ms,
        stats_log_interval_secs,
        filter,
    } = config;

    let sampler_span = tracing::span!(tracing::Level::DEBUG, "sampler", sample_interval_ms);

    let sampler = async move {
        let mut tick = interval(Duration::from_millis(sample_interval_ms));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so the first delta covers a full interval.
        tick.tick().await;
        let mut stats_log_tick = interval(Duration::from_secs(stats_log_interval_secs));
        stats_log_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut pending = PendingDeltas::default();
        let mut samples_recorded_total: u64 = 0;
        let mut samples_failed_total: u64 = 0;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let deltas = match counters.read_deltas(&filter).await {
                        Ok(d) => d,
                        Err(e) => {
                            tracing::warn!(
                                error = %e,
                                operation = "read_deltas",
                                "network counters failed"
                            );
                            continue;
                        }
                    };
                    let summary = record_deltas(&traffic_repo, &deltas, &mut pending).await;
                    samples_recorded_total += summary.recorded;
                    samples_failed_total += summary.failed;
                    tracing::debug!(
                        recorded = summary.recorded,
                        failed = summary.failed,
                        held = summary.held,
                        "sample tick"
                    );
                }
                _ = &mut shutdown_rx => {
                    tracing::debug!("Sampler shutting down");
                    break;
                }
                _ = stats_log_tick.tick() => {
                    tracing::info!(
                        samples_recorded_total,
                        samples_failed_total,
                        pending_interfaces = pending.len(),
                        "sampler stats"
                    );
                }
            }
        }
    };
    tokio::spawn(sampler.instrument(sampler_span))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_skips_loopback_only() {
        let filter = InterfaceFilter::default();
        assert!(filter.accepts("eth0"));
        assert!(filter.accepts("wlan0"));
        assert!(!filter.accepts("lo"));
        assert!(!filter.accepts("lo0"));
    }

    #[test]
    fn include_loopback_accepts_lo() {
        let filter = InterfaceFilter {
            names: vec![],
            include_loopback: true,
        };
        assert!(filter.accepts("lo"));
    }

    #[test]
    fn explicit_names_win_over_loopback_rule() {
        let filter = InterfaceFilter {
            names: vec!["lo".into(), "eth1".into()],
            include_loopback: false,
        };
        assert!(filter.accepts("lo"));
        assert!(filter.accepts("eth1"));
        assert!(!filter.accepts("eth0"));
    }

    fn delta(name: &str, rx: u64, tx: u64) -> InterfaceDelta {
        InterfaceDelta {
            name: name.into(),
            rx,
            tx,
        }
    }

    #[test]
    fn pending_bytes_fold_into_next_reading() {
        let mut pending = PendingDeltas::default();
        pending.hold(delta("eth0", 100, 10));
        pending.hold(delta("eth0", 50, 5));
        pending.hold(delta("wlan0", 7, 3));
        assert_eq!(pending.get("eth0"), Some((150, 15)));

        let merged = pending.drain_into(&[delta("eth0", 1, 1), delta("eth1", 2, 2)]);
        assert_eq!(
            merged,
            vec![delta("eth0", 151, 16), delta("eth1", 2, 2), delta("wlan0", 7, 3)]
        );
        assert!(pending.is_empty());
    }

    #[test]
    fn pending_saturates_instead_of_wrapping() {
        let mut pending = PendingDeltas::default();
        pending.hold(delta("eth0", u64::MAX, 1));
        pending.hold(delta("eth0", 1, 1));
        assert_eq!(pending.get("eth0"), Some((u64::MAX, 2)));
    }
}
