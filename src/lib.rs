pub mod api;
pub mod blockchain;
pub mod config;
pub mod db;
pub mod metrics;
pub mod models;
pub mod service;
pub mod state;
pub mod validation;

#[cfg(test)]
mod tests;

pub use api::error::ApiError;
pub use api::response::ApiResponse;
pub use api::route::create_router;
pub use blockchain::client::{Chain, ClientError, TezosClient};
pub use blockchain::worker_pool;
pub use db::transaction::TransactionStore;
pub use models::{Status, Transaction};
