use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::lifecycle::BookingService;

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

/// Returns whether a compaction ran.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends ({} bookings)", engine.booking_count());
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

/// Background task that finishes holder propagations a pickup left behind.
pub async fn run_reconciler(service: Arc<BookingService>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        reconcile_once(&service).await;
    }
}

/// One pass over the pending propagations. Returns how many finished.
pub async fn reconcile_once(service: &BookingService) -> usize {
    let pending = service.engine().pending_propagations();
    metrics::gauge!(crate::observability::PROPAGATIONS_PENDING).set(pending.len() as f64);
    let mut finished = 0;
    for p in pending {
        match service.resume_propagation(p.booking_id).await {
            Ok(true) => finished += 1,
            Ok(false) => {}
            Err(e) => {
                // The next tick tries again.
                debug!("propagation for booking {} still pending: {e}", p.booking_id);
            }
        }
    }
    if finished > 0 {
        info!("reconciler finished {finished} propagations");
    }
    finished
}
