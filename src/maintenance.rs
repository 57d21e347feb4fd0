use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Engine;

/// When and how often the background compactor rewrites the WAL.
#[derive(Debug, Clone)]
pub struct CompactorConfig {
    pub poll_period: Duration,
    /// Appends accumulated since the last compaction before the next
    /// one triggers.
    pub append_threshold: u64,
}

impl Default for CompactorConfig {
    fn default() -> Self {
        Self {
            poll_period: Duration::from_secs(30),
            append_threshold: 10_000,
        }
    }
}

/// Background task that compacts the WAL once enough appends pile up.
/// Failures are counted and retried on the next tick.
pub async fn run_compactor(engine: Arc<Engine>, config: CompactorConfig) {
    let mut interval = tokio::time::interval(config.poll_period);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < config.append_threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!(appends, "compacted WAL"),
            Err(e) => {
                metrics::counter!(crate::observability::COMPACT_FAILURES_TOTAL).increment(1);
                warn!("compaction failed: {e}");
            }
        }
    }
}
