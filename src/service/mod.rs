//! The query/command facade over the store and the chain client.
//!
//! One interface; validation, caching and transport concerns are adapters
//! composed around `Chain` and the HTTP layer, not extra service types.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::error;

use crate::blockchain::client::{Chain, ClientError};
use crate::db::address::AddressStore;
use crate::db::attribute::AttributeStore;
use crate::db::block::BlockStore;
use crate::db::trail::TrailStore;
use crate::db::transaction::TransactionStore;
use crate::db::StoreError;
use crate::models::{
    Balance, BroadcastTrail, ChainInfo, Counter, Fees, Status, Transaction,
};
use crate::validation::{
    self, validate_addresses, validate_hashes, validate_limit, validate_raw_transaction,
    ValidationError,
};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

pub struct TezosService {
    chain: Arc<dyn Chain>,
    transactions: TransactionStore,
    blocks: BlockStore,
    addresses: AddressStore,
    attributes: AttributeStore,
    trails: TrailStore,
    start_block: u64,
}

impl TezosService {
    pub fn new(
        chain: Arc<dyn Chain>,
        transactions: TransactionStore,
        blocks: BlockStore,
        addresses: AddressStore,
        attributes: AttributeStore,
        trails: TrailStore,
        start_block: u64,
    ) -> Self {
        Self {
            chain,
            transactions,
            blocks,
            addresses,
            attributes,
            trails,
            start_block,
        }
    }

    /// Registers addresses of interest and pins their existing history so
    /// garbage collection keeps it.
    pub async fn add_addresses(&self, addresses: &[String]) -> Result<(), ServiceError> {
        validate_addresses(addresses)?;
        self.addresses.create_addresses(addresses).await?;
        self.transactions.mark_pinned(addresses).await?;
        Ok(())
    }

    /// Accepts a customer raw transaction: computes its canonical hash,
    /// stores the customer attributes, inserts the broadcast row anchored
    /// at the last indexed block and leaves a "store" trail entry. The
    /// broadcaster picks the row up on its next tick.
    pub async fn broadcast(
        &self,
        customer_id: &str,
        raw_transaction: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<String, ServiceError> {
        validate_raw_transaction(raw_transaction)?;

        let hash = self.chain.raw_transaction_hash(raw_transaction)?;

        if !attributes.is_empty() {
            self.attributes
                .create_attributes(customer_id, &hash, attributes)
                .await?;
        }

        let block_number = match self.blocks.last_block().await? {
            Some(block) => block.number,
            None => self.start_block,
        };

        let record = Transaction {
            id: String::new(),
            hash: hash.clone(),
            index: 0,
            block_number: None,
            source_address: None,
            destination_address: None,
            amount: None,
            fee: None,
            counter: None,
            status: Status::New,
            raw_transaction: Some(raw_transaction.to_string()),
            pinned: false,
            broadcasted: true,
            message: None,
            timestamp: Some(0),
            created_at: None,
            created_at_block: Some(block_number),
            broadcasted_at_block: Some(0),
            attributes: HashMap::new(),
        };
        self.transactions.broadcast(&record).await?;

        let trail = BroadcastTrail {
            action: "store".to_string(),
            transaction_hash: hash.clone(),
            broadcast_status: Status::New.to_string(),
            date: Utc::now().timestamp(),
        };
        if let Err(e) = self.trails.insert_trails(&[trail]).await {
            error!(hash = %hash, "unable to insert trail: {}", e);
        }

        Ok(hash)
    }

    pub async fn blockchain_info(&self) -> Result<ChainInfo, ServiceError> {
        let height = self.chain.height().await?;
        Ok(ChainInfo {
            height: height.height,
            confirmation_block_hash: height.hash,
        })
    }

    pub async fn estimated_fee(&self) -> Result<Fees, ServiceError> {
        Ok(self.chain.estimated_fee().await?)
    }

    pub async fn balances(
        &self,
        addresses: &[String],
        block_number: u64,
    ) -> Result<Vec<Balance>, ServiceError> {
        validate_addresses(addresses)?;
        Ok(self.chain.balances(addresses, block_number).await?)
    }

    pub async fn counters(&self, addresses: &[String]) -> Result<Vec<Counter>, ServiceError> {
        validate_addresses(addresses)?;
        Ok(self.chain.counters(addresses).await?)
    }

    /// Rows for the given hashes plus the current tip height, decorated
    /// with the customer's attributes.
    pub async fn transactions_by_hashes(
        &self,
        customer_id: &str,
        hashes: &[String],
    ) -> Result<(Vec<Transaction>, u64), ServiceError> {
        validate_hashes(hashes)?;
        self.transactions_by_hashes_inner(customer_id, hashes).await
    }

    async fn transactions_by_hashes_inner(
        &self,
        customer_id: &str,
        hashes: &[String],
    ) -> Result<(Vec<Transaction>, u64), ServiceError> {
        let mut transactions = self.transactions.transactions_by_hashes(hashes).await?;
        let height = self.chain.height().await?;
        self.decorate_attributes(customer_id, &mut transactions)
            .await?;
        Ok((transactions, height.height))
    }

    pub async fn transactions_by_blocks(
        &self,
        customer_id: &str,
        addresses: &[String],
        from_block: u64,
        to_block: u64,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<Transaction>, u64, u64), ServiceError> {
        validate_addresses(addresses)?;
        validate_limit(limit)?;
        if to_block != 0 && to_block < from_block {
            return Err(ValidationError::InvalidParameter(
                "to_block must not be below from_block".to_string(),
            )
            .into());
        }

        let height = self.chain.height().await?;
        let to_block = if to_block == 0 { height.height } else { to_block };

        let (mut transactions, total) = self
            .transactions
            .transactions_between_blocks(addresses, from_block, to_block, limit, offset)
            .await?;
        self.decorate_attributes(customer_id, &mut transactions)
            .await?;
        Ok((transactions, total, height.height))
    }

    /// Date-range query. Bounds are truncated to minute granularity so
    /// that repeated queries are cache-friendly.
    pub async fn transactions_by_dates(
        &self,
        customer_id: &str,
        addresses: &[String],
        from_ts: i64,
        to_ts: i64,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<Transaction>, u64, u64), ServiceError> {
        validate_addresses(addresses)?;
        validate_limit(limit)?;
        if to_ts < from_ts {
            return Err(ValidationError::InvalidParameter(
                "to_date must not be before from_date".to_string(),
            )
            .into());
        }

        let from_ts = from_ts - from_ts.rem_euclid(60);
        let to_ts = to_ts - to_ts.rem_euclid(60);

        let (mut transactions, total) = self
            .transactions
            .transactions_between_dates(addresses, from_ts, to_ts, limit, offset)
            .await?;
        let height = self.chain.height().await?;
        self.decorate_attributes(customer_id, &mut transactions)
            .await?;
        Ok((transactions, total, height.height))
    }

    /// Attribute search: the matching hashes are re-issued as a by-hashes
    /// query. The result is the union of rows for those hashes.
    pub async fn transactions_by_attributes(
        &self,
        customer_id: &str,
        key: &str,
        value: &str,
    ) -> Result<(Vec<Transaction>, u64), ServiceError> {
        validation::validate_attribute(key, value)?;

        let hashes = self.attributes.search(customer_id, key, value).await?;
        if hashes.is_empty() {
            let height = self.chain.height().await?;
            return Ok((Vec::new(), height.height));
        }
        self.transactions_by_hashes_inner(customer_id, &hashes).await
    }

    pub fn raw_transaction_hash(&self, raw_transaction: &str) -> Result<String, ServiceError> {
        validate_raw_transaction(raw_transaction)?;
        Ok(self.chain.raw_transaction_hash(raw_transaction)?)
    }

    pub async fn dump_pending_broadcasts(
        &self,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<Transaction>, u64), ServiceError> {
        validate_limit(limit)?;
        Ok(self.transactions.dump_pending_broadcasts(limit, offset).await?)
    }

    pub async fn dump_pinned_transactions(
        &self,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<Transaction>, u64), ServiceError> {
        validate_limit(limit)?;
        Ok(self
            .transactions
            .dump_pinned_transactions(limit, offset)
            .await?)
    }

    async fn decorate_attributes(
        &self,
        customer_id: &str,
        transactions: &mut [Transaction],
    ) -> Result<(), ServiceError> {
        if transactions.is_empty() {
            return Ok(());
        }

        let hashes: Vec<String> = transactions.iter().map(|tx| tx.hash.clone()).collect();
        let map = self.attributes.attributes_map(customer_id, &hashes).await?;
        for transaction in transactions {
            if let Some(attributes) = map.get(&transaction.hash) {
                transaction.attributes = attributes.clone();
            }
        }
        Ok(())
    }
}
