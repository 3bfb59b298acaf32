//! Wire types for the node RPC and the transfer extraction from a block.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use serde::Deserialize;

use crate::blockchain::client::ClientError;
use crate::models::Transaction;

/// `/chains/main/blocks/{n}/header` (the head header carries the block
/// hash alongside the header fields).
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderResponse {
    pub hash: String,
    pub level: u64,
    pub predecessor: String,
    pub timestamp: String,
}

/// `/chains/main/blocks/{n}` restricted to what we consume.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockResponse {
    pub hash: String,
    pub header: BlockHeader,
    #[serde(default)]
    pub operations: Vec<Vec<OperationResponse>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockHeader {
    pub level: u64,
    pub predecessor: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperationResponse {
    pub hash: String,
    #[serde(default)]
    pub contents: Vec<ContentResponse>,
}

/// One operation content. Fields beyond `kind` are only present for some
/// kinds, hence all optional.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentResponse {
    pub kind: String,
    pub source: Option<String>,
    pub destination: Option<String>,
    pub amount: Option<String>,
    pub fee: Option<String>,
    pub counter: Option<String>,
}

/// `/chains/main/blocks/head/context/constants`, reduced to the one
/// constant the fee estimate needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ConstantsResponse {
    pub cost_per_byte: String,
}

pub fn parse_timestamp(timestamp: &str) -> Result<i64, ClientError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|t| t.with_timezone(&Utc).timestamp())
        .map_err(|e| ClientError::Shape(format!("bad block timestamp {timestamp:?}: {e}")))
}

fn parse_amount(field: &'static str, value: &str) -> Result<BigUint, ClientError> {
    BigUint::parse_bytes(value.as_bytes(), 10)
        .ok_or_else(|| ClientError::Shape(format!("bad {field} {value:?}")))
}

/// Pulls the transfers out of a block, in the node's operation-then-content
/// order. `idx` numbers the transfers of one operation hash in that order.
pub fn extract_transfers(block: &BlockResponse) -> Result<Vec<Transaction>, ClientError> {
    let timestamp = parse_timestamp(&block.header.timestamp)?;
    let block_number = block.header.level;

    let mut index_by_hash: HashMap<&str, u64> = HashMap::new();
    let mut transfers = Vec::new();

    for operation in block.operations.iter().flatten() {
        for content in &operation.contents {
            if content.kind != "transaction" {
                continue;
            }

            let source = content
                .source
                .as_deref()
                .ok_or_else(|| ClientError::Shape("transaction without source".to_string()))?;
            let destination = content.destination.as_deref().ok_or_else(|| {
                ClientError::Shape("transaction without destination".to_string())
            })?;
            let amount = content
                .amount
                .as_deref()
                .ok_or_else(|| ClientError::Shape("transaction without amount".to_string()))?;

            let index = index_by_hash.entry(operation.hash.as_str()).or_insert(0);
            transfers.push(Transaction::transfer(
                operation.hash.clone(),
                *index,
                block_number,
                source.to_string(),
                destination.to_string(),
                parse_amount("amount", amount)?,
                content
                    .fee
                    .as_deref()
                    .map(|f| parse_amount("fee", f))
                    .transpose()?,
                content
                    .counter
                    .as_deref()
                    .map(|c| parse_amount("counter", c))
                    .transpose()?,
                timestamp,
            ));
            *index += 1;
        }
    }

    Ok(transfers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(kind: &str, amount: &str) -> ContentResponse {
        ContentResponse {
            kind: kind.to_string(),
            source: Some("tz1source".to_string()),
            destination: Some("tz1dest".to_string()),
            amount: Some(amount.to_string()),
            fee: Some("1420".to_string()),
            counter: Some("7".to_string()),
        }
    }

    fn block(operations: Vec<Vec<OperationResponse>>) -> BlockResponse {
        BlockResponse {
            hash: "BMblock".to_string(),
            header: BlockHeader {
                level: 42,
                predecessor: "BMprev".to_string(),
                timestamp: "2020-03-17T09:18:00Z".to_string(),
            },
            operations,
        }
    }

    #[test]
    fn extracts_transfers_in_order_with_per_hash_index() {
        let block = block(vec![vec![
            OperationResponse {
                hash: "opA".to_string(),
                contents: vec![
                    content("transaction", "100"),
                    content("reveal", "0"),
                    content("transaction", "200"),
                ],
            },
            OperationResponse {
                hash: "opB".to_string(),
                contents: vec![content("transaction", "300")],
            },
        ]]);

        let transfers = extract_transfers(&block).unwrap();
        assert_eq!(transfers.len(), 3);
        assert_eq!((transfers[0].hash.as_str(), transfers[0].index), ("opA", 0));
        assert_eq!((transfers[1].hash.as_str(), transfers[1].index), ("opA", 1));
        assert_eq!((transfers[2].hash.as_str(), transfers[2].index), ("opB", 0));
        assert_eq!(transfers[0].block_number, Some(42));
        assert_eq!(transfers[0].timestamp, Some(1584436680));
    }

    #[test]
    fn non_transfer_contents_are_skipped() {
        let block = block(vec![vec![OperationResponse {
            hash: "opA".to_string(),
            contents: vec![content("endorsement", "0"), content("origination", "0")],
        }]]);
        assert!(extract_transfers(&block).unwrap().is_empty());
    }

    #[test]
    fn malformed_transfer_is_a_shape_error() {
        let mut bad = content("transaction", "100");
        bad.amount = None;
        let block = block(vec![vec![OperationResponse {
            hash: "opA".to_string(),
            contents: vec![bad],
        }]]);
        assert!(matches!(
            extract_transfers(&block),
            Err(ClientError::Shape(_))
        ));
    }
}
