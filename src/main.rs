use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use rigledger::clock::SystemClock;
use rigledger::config::Config;
use rigledger::engine::Ledger;
use rigledger::file_store::FileStore;
use rigledger::model::Ms;
use rigledger::sweep::run_sweeper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    rigledger::observability::init(config.metrics_port);

    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(FileStore::new(
        config.data_dir.clone(),
        config.backup_dir.clone(),
        config.compact_threshold,
    )?);
    let ledger = Arc::new(Ledger::new(
        config.deployment.clone(),
        store,
        Arc::new(SystemClock),
        config.cache_ttl.as_millis() as Ms,
    ));

    info!("rigledger started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  backup_dir: {}", config.backup_dir.display());
    info!("  pools: {}", config.deployment.ids().map(|id| id.as_str()).collect::<Vec<_>>().join(", "));
    info!("  cache_ttl: {:?}", config.cache_ttl);
    info!("  sweep_interval: {:?}", config.sweep_interval);
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let snapshot = ledger.remaining_resources().await?;
    info!("remaining resources: {}", serde_json::to_string(&*snapshot)?);

    let cancel = CancellationToken::new();
    let sweeper = tokio::spawn(run_sweeper(ledger.clone(), config.sweep_interval, cancel.clone()));

    // Graceful shutdown: stop the sweeper between passes on SIGTERM/ctrl-c
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    info!("shutdown signal received, stopping sweeper");
    cancel.cancel();
    sweeper.await?;

    let snapshot = ledger.remaining_resources().await?;
    info!("remaining resources: {}", serde_json::to_string(&*snapshot)?);
    info!("rigledger stopped");
    Ok(())
}
