pub mod broadcaster;
pub mod cache;
pub mod client;
pub mod gc;
pub mod indexer;
pub mod models;
pub mod worker_pool;

use thiserror::Error;

use crate::blockchain::client::ClientError;
use crate::db::StoreError;

/// Errors that abort one job tick. The scheduler re-invokes the job on
/// its own cadence; committed writes are reconciled by idempotent
/// re-execution.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("client error: {0}")]
    Client(#[from] ClientError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("batch failed: {0}")]
    Batch(String),
}
