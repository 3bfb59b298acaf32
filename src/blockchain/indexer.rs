//! Block ingestion. Advances a cursor from the last stored marker toward
//! `tip - confirmation_depth`, repairing reorgs on the way. A block's
//! marker is written only after every one of its transfer batches
//! acknowledged, so the marker is the restart point after a crash.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::blockchain::client::Chain;
use crate::blockchain::JobError;
use crate::db::block::BlockStore;
use crate::db::transaction::TransactionStore;
use crate::metrics;
use crate::models::Transaction;

pub struct BlockIndexer {
    chain: Arc<dyn Chain>,
    transactions: TransactionStore,
    blocks: BlockStore,
    start_block: u64,
    confirmation_depth: u64,
    batch_size: usize,
    parallel_batch: usize,
}

impl BlockIndexer {
    pub fn new(
        chain: Arc<dyn Chain>,
        transactions: TransactionStore,
        blocks: BlockStore,
        start_block: u64,
        confirmation_depth: u64,
        batch_size: usize,
        parallel_batch: usize,
    ) -> Self {
        Self {
            chain,
            transactions,
            blocks,
            start_block,
            confirmation_depth,
            batch_size: batch_size.max(1),
            parallel_batch: parallel_batch.max(1),
        }
    }

    pub async fn run(self, interval: Duration, shutdown: CancellationToken) {
        info!("starting block indexer");
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let started = Instant::now();
                    match self.tick(&shutdown).await {
                        Ok(()) => {
                            metrics::record_job_duration("block_indexer", "success", started.elapsed());
                        }
                        Err(e) => {
                            error!("indexer tick failed: {}", e);
                            metrics::record_job_duration("block_indexer", "failed", started.elapsed());
                        }
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("shutting down block indexer");
                    break;
                }
            }
        }
    }

    /// One pass from the resume point up to the confirmed head. Any error
    /// aborts the pass; everything already committed stays, and the next
    /// tick re-executes idempotently.
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<(), JobError> {
        let height = self.chain.height().await?;
        let Some(head) = height.height.checked_sub(self.confirmation_depth) else {
            return Ok(());
        };

        let next = match self.blocks.last_block().await? {
            Some(last) => last.number + 1,
            None => self.start_block,
        };
        if head < next || head < self.start_block {
            debug!(head, next, "nothing to index");
            return Ok(());
        }

        info!(from = next, to = head, "indexing blocks");

        let mut current = next;
        while current <= head {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let block = self.chain.block(current).await?;

            if let Some(rewound_to) = self.reconcile_reorg(current, cancel).await? {
                info!(current, rewound_to, "reorg repaired, rewinding cursor");
                current = rewound_to;
                continue;
            }

            let transfers = self.chain.transfers(current).await?;
            let amount = transfers.len();
            self.store_transfers(transfers).await?;

            // Marker write last: its presence implies the block is complete.
            self.blocks.create_block(&block).await?;

            metrics::record_block_fetched();
            metrics::record_transactions_inserted(amount);
            metrics::record_block_indexed(current);
            debug!(block_number = current, transfers = amount, "finished block");

            current += 1;
        }

        info!(last_indexed = head, "indexer tick finished");
        Ok(())
    }

    /// Walks backwards while the stored hash of `h - 1` disagrees with the
    /// chain's previous-hash of `h`, deleting the transfers of each
    /// divergent height. Markers are deleted in one call afterwards, so a
    /// partial failure leaves markers the next tick will re-examine.
    ///
    /// Returns the lowest rewound height (the new cursor) on a reorg,
    /// `None` if the chain agrees. A missing stored block, a missing hash
    /// on either side or a fetch failure aborts without further commits.
    async fn reconcile_reorg(
        &self,
        processed_block: u64,
        cancel: &CancellationToken,
    ) -> Result<Option<u64>, JobError> {
        let mut block_number = processed_block;
        let mut markers_to_delete: Vec<u64> = Vec::new();

        loop {
            let Some(previous) = block_number.checked_sub(1) else {
                return Ok(None);
            };

            let Some(stored) = self.blocks.block(previous).await? else {
                // Nothing stored below the cursor; nothing to compare.
                return Ok(None);
            };
            let Some(stored_hash) = stored.hash else {
                warn!(previous, "stored block has no hash, aborting reorg repair");
                return Ok(None);
            };

            let chain_block = match self.chain.block(block_number).await {
                Ok(block) => block,
                Err(e) => {
                    error!(block_number, "could not fetch block during reorg check: {}", e);
                    return Ok(None);
                }
            };
            let Some(previous_hash) = chain_block.previous_hash else {
                warn!(block_number, "chain block has no previous hash, aborting reorg repair");
                return Ok(None);
            };

            if stored_hash == previous_hash {
                break;
            }

            debug!(previous, "previous hash mismatch, deleting block transfers");
            self.transactions
                .delete_block_transactions(previous, cancel)
                .await?;
            markers_to_delete.push(previous);
            block_number -= 1;
        }

        if block_number == processed_block {
            return Ok(None);
        }

        info!(blocks = ?markers_to_delete, "deleting reorged block markers");
        self.blocks.delete_blocks(&markers_to_delete).await?;

        Ok(Some(block_number))
    }

    /// Persists one block's transfers in windows of
    /// `batch_size * parallel_batch` rows: up to `parallel_batch`
    /// concurrent upserts of `batch_size` rows each, with a barrier per
    /// window. Any sub-batch failure fails the whole block.
    async fn store_transfers(&self, transfers: Vec<Transaction>) -> Result<(), JobError> {
        if transfers.is_empty() {
            return Ok(());
        }

        let window = self.batch_size * self.parallel_batch;
        for window_chunk in transfers.chunks(window) {
            let inserts = window_chunk.chunks(self.batch_size).map(|batch| {
                let store = self.transactions.clone();
                let batch = batch.to_vec();
                async move { store.create_transactions(&batch).await }
            });

            let errors: Vec<String> = futures::future::join_all(inserts)
                .await
                .into_iter()
                .filter_map(|result| result.err())
                .map(|e| e.to_string())
                .collect();

            if !errors.is_empty() {
                return Err(JobError::Batch(errors.join("; ")));
            }
        }
        Ok(())
    }
}
