//! Outbox relay: the single background task that delivers outbox messages.
//!
//! Wakes every half resend interval, or as soon as the executor signals that
//! new messages were enqueued. Each sweep also expires stale votes and prunes
//! old finalized records. Failures are logged and retried on a later sweep;
//! the relay itself never stops.

use std::sync::Arc;

use interbank_types::{InterbankError, Result};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use crate::{InterbankExecutor, MessageDelivery};

/// Counters for one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Messages handed to the transport.
    pub attempted: usize,
    /// Messages whose receipt was recorded.
    pub delivered: usize,
    /// Messages left for a later sweep.
    pub failed: usize,
    /// Transactions rolled back on vote timeout.
    pub expired: usize,
}

/// Drives delivery of the executor's outbox.
pub struct OutboxRelay {
    executor: Arc<InterbankExecutor>,
    delivery: Arc<dyn MessageDelivery>,
}

impl OutboxRelay {
    #[must_use]
    pub fn new(executor: Arc<InterbankExecutor>, delivery: Arc<dyn MessageDelivery>) -> Self {
        Self { executor, delivery }
    }

    /// Run forever.
    pub async fn run(self) {
        let period = self.executor.config().sweep_period();
        let flush = self.executor.flush_signal();
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            period_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
            transport = self.delivery.name(),
            "[OutboxRelay] Started"
        );

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                () = flush.notified() => {}
            }
            let stats = self.sweep().await;
            if stats.attempted > 0 || stats.expired > 0 {
                debug!(?stats, "[OutboxRelay] Sweep finished");
            }
        }
    }

    /// One pass: housekeeping, then deliver everything due.
    ///
    /// Executor calls take the transaction key and write the journal, so
    /// they run on the blocking pool. Only delivery itself is async.
    pub async fn sweep(&self) -> SweepStats {
        let mut stats = SweepStats::default();

        match self.blocking(InterbankExecutor::expire_stale_votes).await {
            Ok(n) => stats.expired = n,
            Err(e) => error!(error = %e, "[OutboxRelay] Vote expiry failed"),
        }
        if let Err(e) = self.blocking(InterbankExecutor::prune_finalized).await {
            error!(error = %e, "[OutboxRelay] Pruning failed");
        }

        let due = match self.blocking(InterbankExecutor::process_outbox).await {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "[OutboxRelay] Could not claim outbox messages");
                return stats;
            }
        };

        for msg in due {
            stats.attempted += 1;
            let receipt = match self.delivery.deliver(msg.destination, &msg.body).await {
                Ok(receipt) => receipt,
                Err(e) => {
                    warn!(
                        idempotence_key = %msg.idempotence_key,
                        destination = %msg.destination,
                        error = %e,
                        "[OutboxRelay] Delivery failed, will retry"
                    );
                    stats.failed += 1;
                    continue;
                }
            };
            let key = msg.idempotence_key.clone();
            match self.blocking(move |ex| ex.acknowledge(&key, receipt)).await {
                Ok(()) => stats.delivered += 1,
                Err(e) => {
                    warn!(
                        idempotence_key = %msg.idempotence_key,
                        destination = %msg.destination,
                        error = %e,
                        "[OutboxRelay] Receipt rejected, will retry"
                    );
                    stats.failed += 1;
                }
            }
        }
        stats
    }

    /// Run `work` against the executor on tokio's blocking pool.
    async fn blocking<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&InterbankExecutor) -> Result<T> + Send + 'static,
    {
        let executor = Arc::clone(&self.executor);
        tokio::task::spawn_blocking(move || work(&executor))
            .await
            .map_err(|e| InterbankError::Internal(format!("executor task failed: {e}")))?
    }
}
