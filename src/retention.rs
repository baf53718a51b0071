// ============================================================================
// SECTION 16: RETENTION
// ============================================================================
// Readings older than `retention.days` are pruned once at startup and then
// every `retention.sweep_interval`. Queries racing a sweep just see fewer
// rows.
// ============================================================================

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle as TokioJoinHandle;
use tracing::{debug, info, warn};

use crate::config::ConfigSource;
use crate::error::StorageResult;
use crate::poller::sleep_or_shutdown;
use crate::storage::TelemetryStorage;

/// Oldest instant a reading may carry and still be kept.
pub fn cutoff(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    now - Duration::days(i64::from(days))
}

/// Periodic pruning of expired readings.
#[derive(Clone)]
pub struct RetentionJob {
    storage: Arc<dyn TelemetryStorage>,
    config: Arc<dyn ConfigSource>,
}

impl RetentionJob {
    pub fn new(storage: Arc<dyn TelemetryStorage>, config: Arc<dyn ConfigSource>) -> Self {
        Self { storage, config }
    }

    /// Prune once against the current configuration.
    pub async fn sweep(&self) -> StorageResult<u64> {
        let days = self.config.snapshot().retention.days;
        let cutoff = cutoff(Utc::now(), days);
        let removed = self.storage.prune_before(cutoff).await?;

        if removed > 0 {
            info!(target: "isley::retention", removed, days, cutoff = %cutoff, "Pruned expired readings");
        } else {
            debug!(target: "isley::retention", days, "Nothing to prune");
        }
        Ok(removed)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.sweep().await {
                warn!(
                    target: "isley::retention",
                    recoverable = e.is_recoverable(),
                    error = %e,
                    "Retention sweep failed"
                );
            }

            let interval = self.config.snapshot().retention.sweep_interval;
            if sleep_or_shutdown(interval, &mut shutdown).await {
                break;
            }
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> TokioJoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
