use std::sync::Arc;

use tracing::{error, info, warn};

use toolshed::config::Config;
use toolshed::engine::Engine;
use toolshed::reconciler;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    toolshed::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let engine = Arc::new(Engine::with_timeout(config.wal_path(), config.store_timeout)?);

    let violations = engine.audit_overlaps().await;
    for (a, b) in &violations {
        error!("committed bookings {a} and {b} overlap");
    }

    info!("toolshed store ready");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  bookings: {} across {} tools", engine.booking_count(), engine.tool_count());
    info!("  pending propagations: {}", engine.pending_propagations().len());
    info!("  overlap violations: {}", violations.len());
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let compactor = tokio::spawn(reconciler::run_compactor(
        engine.clone(),
        config.compact_threshold,
        config.compact_interval,
    ));

    shutdown_signal().await?;
    info!("shutdown signal received");
    compactor.abort();

    if let Err(e) = engine.compact_wal().await {
        warn!("final compaction failed: {e}");
    }
    info!("toolshed stopped");
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let terminate = async move {
        sigterm.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        r = tokio::signal::ctrl_c() => r,
        _ = terminate => Ok(()),
    }
}
