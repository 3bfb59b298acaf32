use std::collections::HashMap;

use axum::{
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::models::{Balance, Counter, Fees, Transaction};

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Paginated payloads also advertise the total match count in a header.
pub fn with_total_count<T: Serialize>(data: T, count: u64) -> Response {
    let json = match serde_json::to_string(&ApiResponse { data }) {
        Ok(json) => json,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
    headers.insert("X-Total-Count", count.to_string().parse().unwrap());

    (StatusCode::OK, headers, json).into_response()
}

/// Wire image of a transaction row. Big integers travel as decimal
/// strings, the status as its wire name.
#[derive(Debug, Serialize)]
pub struct TransactionView {
    pub id: String,
    pub hash: String,
    pub index: u64,
    pub block_number: Option<u64>,
    pub source_address: Option<String>,
    pub destination_address: Option<String>,
    pub amount: Option<String>,
    pub fee: Option<String>,
    pub counter: Option<String>,
    pub status: String,
    pub pinned: bool,
    pub broadcasted: bool,
    pub message: Option<String>,
    pub timestamp: Option<i64>,
    pub created_at: Option<i64>,
    pub created_at_block: Option<u64>,
    pub broadcasted_at_block: Option<u64>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
}

impl From<Transaction> for TransactionView {
    fn from(tx: Transaction) -> Self {
        Self {
            id: tx.id,
            hash: tx.hash,
            index: tx.index,
            block_number: tx.block_number,
            source_address: tx.source_address,
            destination_address: tx.destination_address,
            amount: tx.amount.map(|a| a.to_string()),
            fee: tx.fee.map(|f| f.to_string()),
            counter: tx.counter.map(|c| c.to_string()),
            status: tx.status.to_string(),
            pinned: tx.pinned,
            broadcasted: tx.broadcasted,
            message: tx.message,
            timestamp: tx.timestamp,
            created_at: tx.created_at,
            created_at_block: tx.created_at_block,
            broadcasted_at_block: tx.broadcasted_at_block,
            attributes: tx.attributes,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransactionsPayload {
    pub transactions: Vec<TransactionView>,
    /// Chain tip at response time, for confirmation counting.
    pub height: u64,
}

#[derive(Debug, Serialize)]
pub struct BalanceView {
    pub address: String,
    pub balance_at_block: Option<String>,
    pub balance_at_tip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Balance> for BalanceView {
    fn from(balance: Balance) -> Self {
        Self {
            address: balance.address,
            balance_at_block: balance.balance_at_block.map(|b| b.to_string()),
            balance_at_tip: balance.balance_at_tip.map(|b| b.to_string()),
            error: balance.error,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CounterView {
    pub address: String,
    pub counter: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Counter> for CounterView {
    fn from(counter: Counter) -> Self {
        Self {
            address: counter.address,
            counter: counter.counter,
            error: counter.error,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FeesView {
    pub minimal_fees: String,
    pub minimal_nanotez_per_gas_unit: String,
    pub minimal_nanotez_per_byte: String,
}

impl From<Fees> for FeesView {
    fn from(fees: Fees) -> Self {
        Self {
            minimal_fees: fees.minimal_fees.to_string(),
            minimal_nanotez_per_gas_unit: fees.minimal_nanotez_per_gas_unit.to_string(),
            minimal_nanotez_per_byte: fees.minimal_nanotez_per_byte.to_string(),
        }
    }
}
