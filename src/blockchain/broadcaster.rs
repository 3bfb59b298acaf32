//! Retrying submission of customer raw transactions.
//!
//! Each tick selects the broadcast rows whose last attempt is at least
//! `broadcast_interval` blocks old and fans them out to a worker pool.
//! A row's failure stays confined to that row; the tick itself only
//! aborts on selection or tip errors.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::blockchain::client::Chain;
use crate::blockchain::{worker_pool, JobError};
use crate::db::trail::TrailStore;
use crate::db::transaction::TransactionStore;
use crate::metrics;
use crate::models::{BroadcastTrail, Status, Transaction};

const MISSING_RAW_TRANSACTION: &str = "raw transaction is missing";

pub struct Broadcaster {
    chain: Arc<dyn Chain>,
    transactions: TransactionStore,
    trails: TrailStore,
    broadcast_interval: u64,
    batch_size: u64,
    workers_amount: usize,
}

impl Broadcaster {
    pub fn new(
        chain: Arc<dyn Chain>,
        transactions: TransactionStore,
        trails: TrailStore,
        broadcast_interval: u64,
        batch_size: u64,
        workers_amount: usize,
    ) -> Self {
        Self {
            chain,
            transactions,
            trails,
            broadcast_interval,
            batch_size,
            workers_amount: workers_amount.max(1),
        }
    }

    pub async fn run(self, interval: Duration, shutdown: CancellationToken) {
        info!("starting broadcaster");
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let started = Instant::now();
                    match self.tick(&shutdown).await {
                        Ok(()) => {
                            metrics::record_job_duration("broadcaster", "success", started.elapsed());
                        }
                        Err(e) => {
                            error!("broadcaster tick failed: {}", e);
                            metrics::record_job_duration("broadcaster", "failed", started.elapsed());
                        }
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("shutting down broadcaster");
                    break;
                }
            }
        }
    }

    pub async fn tick(&self, cancel: &CancellationToken) -> Result<(), JobError> {
        let height = self.chain.height().await?;
        let block_number = height.height;

        if self.broadcast_interval > block_number {
            warn!(
                block_number,
                broadcast_interval = self.broadcast_interval,
                "broadcast interval is greater than block number"
            );
            return Ok(());
        }
        let broadcasted_before_block = block_number - self.broadcast_interval;

        let pending = self
            .transactions
            .pending_broadcasts(broadcasted_before_block, self.batch_size)
            .await?;

        if pending.is_empty() {
            info!("no work to do");
            return Ok(());
        }
        info!(broadcasts_amount = pending.len(), "got pending broadcasts");

        let work_amount = pending.len();
        let chain = self.chain.clone();
        let transactions = self.transactions.clone();
        let trails = self.trails.clone();

        let (_, errors) = worker_pool::fan_out(
            pending,
            self.workers_amount,
            cancel,
            move |transaction: Transaction| {
                let chain = chain.clone();
                let transactions = transactions.clone();
                let trails = trails.clone();
                async move {
                    broadcast_one(&*chain, &transactions, &trails, transaction, block_number)
                        .await
                }
            },
        )
        .await;

        for e in &errors {
            error!("could not broadcast transaction: {}", e);
        }

        metrics::record_transactions_broadcasted(work_amount);
        info!("broadcaster tick finished");
        Ok(())
    }
}

/// Processes one broadcast row: submit, derive the next status, update the
/// row, append a trail entry for the attempt.
///
/// A terminal error on the very first attempt means the submission itself
/// is malformed and the row goes to INVALID, never to be retried. Later
/// terminal errors go to FAILURE: the transaction may have transiently
/// been accepted in the mempool.
async fn broadcast_one(
    chain: &dyn Chain,
    transactions: &TransactionStore,
    trails: &TrailStore,
    transaction: Transaction,
    block_number: u64,
) -> Result<(), JobError> {
    let mut status = Status::Pending;
    let mut message: Option<String> = None;

    match transaction.raw_transaction.as_deref() {
        None => {
            status = Status::Invalid;
            message = Some(MISSING_RAW_TRANSACTION.to_string());
        }
        Some(raw_transaction) => {
            info!(hash = %transaction.hash, "broadcasting transaction");
            if let Err(e) = chain.broadcast_transaction(raw_transaction).await {
                error!(hash = %transaction.hash, "broadcasting failed: {}", e);
                status = if transaction.status == Status::New && !e.is_retryable_broadcast() {
                    Status::Invalid
                } else {
                    Status::Failure
                };
                message = Some(format!(
                    "could not send transaction {:?}: {}",
                    transaction.hash, e
                ));
            } else {
                info!(hash = %transaction.hash, "broadcasting success");
            }

            let trail = BroadcastTrail {
                action: "broadcast".to_string(),
                transaction_hash: transaction.hash.clone(),
                broadcast_status: status.to_string(),
                date: Utc::now().timestamp(),
            };
            if let Err(e) = trails.insert_trails(&[trail]).await {
                error!(hash = %transaction.hash, "unable to insert trail: {}", e);
            }
        }
    }

    transactions
        .update_broadcast(&transaction.hash, status, message.as_deref(), block_number)
        .await?;
    Ok(())
}
