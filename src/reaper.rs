use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::info;

use crate::engine::Engine;

/// Background task that cancels pending bookings whose confirmation window
/// has lapsed, releasing their slots.
pub async fn run_reaper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let now = Utc::now().naive_utc();
        for id in engine.collect_expired_pending(now) {
            match engine.expire_pending(id).await {
                Ok(()) => info!("reaped expired pending booking {id}"),
                Err(e) => {
                    // May have been confirmed or cancelled in the meantime
                    tracing::debug!("reaper skip {id}: {e}");
                }
            }
        }
    }
}

/// Background task that rewrites the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::warn!("WAL compaction failed: {e}"),
        }
    }
}
