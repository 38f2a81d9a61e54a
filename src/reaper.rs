use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::engine::Engine;
use crate::model::now_ms;

/// How often the compactor checks the WAL size.
const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that returns lapsed holds to available on a fixed
/// cadence, whether or not any client is polling.
pub async fn run_reaper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let expired = engine.expire_holds(now_ms()).await;
        if expired > 0 {
            info!("released {expired} expired seat holds");
        }
        engine.notify.prune();
    }
}

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            debug!(appends, threshold, "compaction not needed");
            continue;
        }
        match engine.compact_wal().await {
            Ok(records) => info!(appends, records, "WAL compacted"),
            Err(e) => error!("WAL compaction failed: {e}"),
        }
    }
}
