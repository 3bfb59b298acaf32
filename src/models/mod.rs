use std::collections::HashMap;

use num_bigint::BigUint;
use serde::Serialize;

/// Lifecycle of a broadcasted transaction.
///
/// The integer codes are what the database stores; the string form is
/// what goes over the wire. Both mappings are total over the six states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    New,
    Pending,
    Success,
    Failure,
    Invalid,
    Timeout,
}

impl Status {
    pub fn code(self) -> i64 {
        match self {
            Status::New => 0,
            Status::Pending => 1,
            Status::Success => 2,
            Status::Failure => 3,
            Status::Invalid => 4,
            Status::Timeout => 5,
        }
    }

    pub fn from_code(code: i64) -> Option<Status> {
        match code {
            0 => Some(Status::New),
            1 => Some(Status::Pending),
            2 => Some(Status::Success),
            3 => Some(Status::Failure),
            4 => Some(Status::Invalid),
            5 => Some(Status::Timeout),
            _ => None,
        }
    }

    /// Wire name. FAILURE is reported as "temporary_failure" because a
    /// failed broadcast stays eligible for retry.
    pub fn as_str(self) -> &'static str {
        match self {
            Status::New => "new",
            Status::Pending => "pending",
            Status::Success => "success",
            Status::Failure => "temporary_failure",
            Status::Invalid => "invalid",
            Status::Timeout => "timeout",
        }
    }

    pub fn from_str(s: &str) -> Option<Status> {
        match s {
            "new" => Some(Status::New),
            "pending" => Some(Status::Pending),
            "success" => Some(Status::Success),
            "temporary_failure" => Some(Status::Failure),
            "invalid" => Some(Status::Invalid),
            "timeout" => Some(Status::Timeout),
            _ => None,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row of the `transactions` table: either a transfer mined on-chain or
/// a broadcast record for a raw transaction not yet mined.
/// Nullable columns have `Option` types.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: String,
    pub hash: String,
    pub index: u64,
    /// `None` means the broadcast-only sentinel (stored as -1).
    pub block_number: Option<u64>,
    pub source_address: Option<String>,
    pub destination_address: Option<String>,
    pub amount: Option<BigUint>,
    pub fee: Option<BigUint>,
    pub counter: Option<BigUint>,
    pub status: Status,
    pub raw_transaction: Option<String>,
    pub pinned: bool,
    pub broadcasted: bool,
    pub message: Option<String>,
    /// Block timestamp, UTC unix seconds. Zero for broadcast-only rows.
    pub timestamp: Option<i64>,
    pub created_at: Option<i64>,
    pub created_at_block: Option<u64>,
    pub broadcasted_at_block: Option<u64>,
    /// Customer attributes, resolved separately from the attribute table.
    pub attributes: HashMap<String, String>,
}

impl Transaction {
    /// A mined transfer as extracted from a block.
    #[allow(clippy::too_many_arguments)]
    pub fn transfer(
        hash: String,
        index: u64,
        block_number: u64,
        source: String,
        destination: String,
        amount: BigUint,
        fee: Option<BigUint>,
        counter: Option<BigUint>,
        timestamp: i64,
    ) -> Self {
        Self {
            id: String::new(),
            hash,
            index,
            block_number: Some(block_number),
            source_address: Some(source),
            destination_address: Some(destination),
            amount: Some(amount),
            fee,
            counter,
            status: Status::Success,
            raw_transaction: None,
            pinned: false,
            broadcasted: false,
            message: None,
            timestamp: Some(timestamp),
            created_at: None,
            created_at_block: None,
            broadcasted_at_block: None,
            attributes: HashMap::new(),
        }
    }
}

/// A block marker. One row per fully-processed block; marker presence
/// implies all of the block's transfers were stored.
#[derive(Debug, Clone)]
pub struct Block {
    pub number: u64,
    pub hash: Option<String>,
    pub previous_hash: Option<String>,
    pub timestamp: Option<i64>,
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct Height {
    pub height: u64,
    pub hash: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainInfo {
    pub height: u64,
    pub confirmation_block_hash: String,
}

/// Balance of an address, at the requested block and at the chain tip.
/// A per-address lookup failure is reported here, not as a call failure.
#[derive(Debug, Clone)]
pub struct Balance {
    pub address: String,
    pub balance_at_block: Option<BigUint>,
    pub balance_at_tip: Option<BigUint>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Counter {
    pub address: String,
    pub counter: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Fees {
    pub minimal_fees: BigUint,
    pub minimal_nanotez_per_gas_unit: BigUint,
    pub minimal_nanotez_per_byte: BigUint,
}

/// One append-only audit record of a broadcast attempt.
#[derive(Debug, Clone)]
pub struct BroadcastTrail {
    pub action: String,
    pub transaction_hash: String,
    pub broadcast_status: String,
    pub date: i64,
}
