use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use shongo_booking::acl::InMemoryAclManager;
use shongo_booking::config::ControllerConfig;
use shongo_booking::engine::Engine;
use shongo_booking::reaper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ControllerConfig::from_env();
    shongo_booking::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let wal_path = config.wal_path();
    let engine = Arc::new(Engine::open(
        &wal_path,
        config.domain(),
        Arc::new(InMemoryAclManager::new()),
    )?);

    info!("shongo controller started");
    info!("  domain: {}", config.local_domain);
    info!("  journal: {}", wal_path.display());
    info!("  cleanup interval: {:?}", config.cleanup_interval);
    info!("  compact threshold: {}", config.compact_threshold);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let cleanup = tokio::spawn(reaper::run_cleanup(engine.clone(), config.cleanup_interval));
    let compactor = tokio::spawn(reaper::run_compactor(engine.clone(), config.compact_threshold));

    // Graceful shutdown on SIGTERM/ctrl-c: stop background work, then compact once more.
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    info!("shutdown signal received");
    cleanup.abort();
    compactor.abort();
    if let Err(e) = engine.compact().await {
        tracing::warn!("final compaction failed: {e}");
    }
    info!("shongo controller stopped");
    Ok(())
}
