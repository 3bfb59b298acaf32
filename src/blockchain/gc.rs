//! Retention garbage collection.
//!
//! Broadcasts still unmined past the deadline move to TIMEOUT (they stay
//! queryable; TIMEOUT excludes them from retry selection). Unpinned,
//! non-broadcast transfer history below the retention horizon is deleted.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::blockchain::client::Chain;
use crate::blockchain::JobError;
use crate::db::transaction::TransactionStore;
use crate::metrics;

pub struct GarbageCollector {
    chain: Arc<dyn Chain>,
    transactions: TransactionStore,
    retention_blocks: u64,
}

impl GarbageCollector {
    pub fn new(
        chain: Arc<dyn Chain>,
        transactions: TransactionStore,
        retention_blocks: u64,
    ) -> Self {
        Self {
            chain,
            transactions,
            retention_blocks,
        }
    }

    pub async fn run(self, interval: Duration, shutdown: CancellationToken) {
        info!("starting garbage collector");
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let started = Instant::now();
                    match self.tick(&shutdown).await {
                        Ok(()) => {
                            metrics::record_job_duration("garbage_collector", "success", started.elapsed());
                        }
                        Err(e) => {
                            error!("garbage collector tick failed: {}", e);
                            metrics::record_job_duration("garbage_collector", "failed", started.elapsed());
                        }
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("shutting down garbage collector");
                    break;
                }
            }
        }
    }

    pub async fn tick(&self, cancel: &CancellationToken) -> Result<(), JobError> {
        let height = self.chain.height().await?;
        let Some(before_block) = height.height.checked_sub(self.retention_blocks) else {
            return Ok(());
        };

        let hashes = self.transactions.broadcasts_to_collect(before_block).await?;
        if !hashes.is_empty() {
            info!(amount = hashes.len(), "timing out stale broadcasts");
            self.transactions.collect_broadcasts(&hashes).await?;
        }

        self.transactions
            .collect_transactions(before_block, cancel)
            .await?;

        info!(before_block, "garbage collection finished");
        Ok(())
    }
}
