//! Shared fixtures: a scripted in-memory chain and row builders.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use num_bigint::BigUint;
use sqlx::SqlitePool;

use crate::blockchain::client::{compute_operation_hash, Chain, ClientError};
use crate::db::address::AddressStore;
use crate::db::attribute::AttributeStore;
use crate::db::block::BlockStore;
use crate::db::trail::TrailStore;
use crate::db::transaction::TransactionStore;
use crate::models::{Balance, Block, Counter, Fees, Height, Status, Transaction};

pub async fn stores() -> (
    SqlitePool,
    TransactionStore,
    BlockStore,
    AddressStore,
    AttributeStore,
    TrailStore,
) {
    let pool = crate::db::connection::memory_pool().await;
    (
        pool.clone(),
        TransactionStore::new(pool.clone()),
        BlockStore::new(pool.clone()),
        AddressStore::new(pool.clone()),
        AttributeStore::new(pool.clone()),
        TrailStore::new(pool),
    )
}

pub fn transfer(hash: &str, index: u64, block_number: u64, from: &str, to: &str) -> Transaction {
    Transaction::transfer(
        hash.to_string(),
        index,
        block_number,
        from.to_string(),
        to.to_string(),
        BigUint::from(1_000u32),
        Some(BigUint::from(1420u32)),
        Some(BigUint::from(7u32)),
        1_000 * block_number as i64,
    )
}

pub fn broadcast_record(hash: &str, rawtx: &str, created_at_block: u64) -> Transaction {
    Transaction {
        id: String::new(),
        hash: hash.to_string(),
        index: 0,
        block_number: None,
        source_address: None,
        destination_address: None,
        amount: None,
        fee: None,
        counter: None,
        status: Status::New,
        raw_transaction: Some(rawtx.to_string()),
        pinned: false,
        broadcasted: true,
        message: None,
        timestamp: Some(0),
        created_at: None,
        created_at_block: Some(created_at_block),
        broadcasted_at_block: Some(0),
        attributes: HashMap::new(),
    }
}

/// What a scripted submission attempt should produce.
pub enum SubmitOutcome {
    Ok,
    Retryable(&'static str),
    Terminal(&'static str),
}

#[derive(Default)]
struct MockChainState {
    tip: Option<Height>,
    blocks: HashMap<u64, Block>,
    transfers: HashMap<u64, Vec<Transaction>>,
    submit_outcomes: VecDeque<SubmitOutcome>,
    submitted: Vec<String>,
}

/// A chain the tests steer: fixed blocks and transfers, scripted
/// submission outcomes, recorded submissions.
#[derive(Default)]
pub struct MockChain {
    state: Mutex<MockChainState>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tip(&self, height: u64, hash: &str) {
        let mut state = self.state.lock().unwrap();
        state.tip = Some(Height {
            height,
            hash: hash.to_string(),
        });
    }

    pub fn put_block(&self, number: u64, hash: &str, previous_hash: &str) {
        let mut state = self.state.lock().unwrap();
        state.blocks.insert(
            number,
            Block {
                number,
                hash: Some(hash.to_string()),
                previous_hash: Some(previous_hash.to_string()),
                timestamp: Some(1_000 * number as i64),
                created_at: None,
            },
        );
    }

    /// A linear chain `start..=end` with hashes `B{n}`.
    pub fn linear_chain(&self, start: u64, end: u64) {
        for number in start..=end {
            self.put_block(number, &format!("B{number}"), &format!("B{}", number - 1));
        }
    }

    pub fn put_transfers(&self, number: u64, transfers: Vec<Transaction>) {
        let mut state = self.state.lock().unwrap();
        state.transfers.insert(number, transfers);
    }

    pub fn script_submit(&self, outcome: SubmitOutcome) {
        let mut state = self.state.lock().unwrap();
        state.submit_outcomes.push_back(outcome);
    }

    pub fn submitted(&self) -> Vec<String> {
        self.state.lock().unwrap().submitted.clone()
    }
}

#[async_trait]
impl Chain for MockChain {
    async fn height(&self) -> Result<Height, ClientError> {
        self.state
            .lock()
            .unwrap()
            .tip
            .clone()
            .ok_or_else(|| ClientError::Shape("no tip scripted".to_string()))
    }

    async fn block(&self, number: u64) -> Result<Block, ClientError> {
        self.state
            .lock()
            .unwrap()
            .blocks
            .get(&number)
            .cloned()
            .ok_or_else(|| ClientError::Shape(format!("no block {number} scripted")))
    }

    async fn transfers(&self, number: u64) -> Result<Vec<Transaction>, ClientError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .transfers
            .get(&number)
            .cloned()
            .unwrap_or_default())
    }

    async fn balances(
        &self,
        _addresses: &[String],
        _block_number: u64,
    ) -> Result<Vec<Balance>, ClientError> {
        Ok(Vec::new())
    }

    async fn counters(&self, _addresses: &[String]) -> Result<Vec<Counter>, ClientError> {
        Ok(Vec::new())
    }

    async fn estimated_fee(&self) -> Result<Fees, ClientError> {
        Ok(Fees {
            minimal_fees: BigUint::from(100_000u32),
            minimal_nanotez_per_gas_unit: BigUint::from(100u32),
            minimal_nanotez_per_byte: BigUint::from(1_000u32),
        })
    }

    fn raw_transaction_hash(&self, raw_transaction: &str) -> Result<String, ClientError> {
        compute_operation_hash(raw_transaction)
    }

    async fn broadcast_transaction(&self, raw_transaction: &str) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        state.submitted.push(raw_transaction.to_string());
        match state.submit_outcomes.pop_front() {
            None | Some(SubmitOutcome::Ok) => Ok(()),
            Some(SubmitOutcome::Retryable(message)) => {
                Err(ClientError::BroadcastRetryable(message.to_string()))
            }
            Some(SubmitOutcome::Terminal(message)) => Err(ClientError::Node {
                status: 400,
                body: message.to_string(),
            }),
        }
    }
}
