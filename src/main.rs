use anyhow::Result;
use std::sync::Arc;
use traffic_store::*;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        db = %app_config.database.path,
        time_policy = ?app_config.aggregation.time_policy,
        "starting"
    );

    let traffic_repo = Arc::new(
        traffic_repo::TrafficRepo::connect_with(
            &app_config.database,
            app_config.aggregation.time_policy,
        )
        .await?,
    );
    traffic_repo.init().await?;
    let known = traffic_repo.list_interfaces().await?;
    tracing::info!(interfaces = known.len(), "database ready");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let sampler_handle = worker::spawn(
        worker::SamplerDeps {
            traffic_repo: traffic_repo.clone(),
            counters: worker::NetworkCounters::new(),
            shutdown_rx,
        },
        worker::SamplerConfig {
            sample_interval_ms: app_config.monitoring.sample_interval_ms,
            stats_log_interval_secs: app_config.monitoring.stats_log_interval_secs,
            filter: worker::InterfaceFilter {
                names: app_config.monitoring.interfaces.clone(),
                include_loopback: app_config.monitoring.include_loopback,
            },
        },
    );

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("Received shutdown signal");
    let _ = shutdown_tx.send(());
    let _ = sampler_handle.await;

    Ok(())
}
