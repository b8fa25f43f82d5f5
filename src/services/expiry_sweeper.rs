use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::lifecycle::ConsentLifecycle;

/// Periodically flips lapsed grants to EXPIRED.
///
/// Storage hygiene only: reads already expire lazily, so a stopped or
/// failing sweeper never changes an access decision.
pub struct ExpirySweeper {
    lifecycle: Arc<ConsentLifecycle>,
    interval: Duration,
    batch_size: usize,
}

impl ExpirySweeper {
    pub fn new(lifecycle: Arc<ConsentLifecycle>, interval: Duration, batch_size: usize) -> Self {
        Self {
            lifecycle,
            interval,
            batch_size,
        }
    }

    /// One pass. Drains full batches until a short one comes back.
    pub async fn sweep_once(&self) -> usize {
        let mut total = 0;
        loop {
            match self.lifecycle.expire_lapsed(self.batch_size).await {
                Ok(0) => break,
                Ok(flipped) => {
                    total += flipped;
                    if flipped < self.batch_size {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Expiry sweep failed");
                    break;
                }
            }
        }
        if total > 0 {
            tracing::info!(expired = total, "Expiry sweep completed");
        }
        total
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
            }
        }
        tracing::info!("Expiry sweeper stopped");
    }

    pub fn spawn(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
