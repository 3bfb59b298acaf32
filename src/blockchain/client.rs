//! Tezos node adapter.
//!
//! `Chain` is the seam the jobs and the service program against; the
//! concrete [`TezosClient`] speaks the node REST RPC with retries and
//! rate limiting, and `CachingChain` (see `blockchain::cache`) layers TTL
//! caches over it without changing the interface.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use num_bigint::BigUint;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::blockchain::models::{
    extract_transfers, parse_timestamp, BlockResponse, ConstantsResponse, HeaderResponse,
};
use crate::blockchain::worker_pool;
use crate::config::Config;
use crate::models::{Balance, Block, Counter, Fees, Height, Transaction};

/// Node errors whose message matches one of these substrings are worth a
/// later retry; everything else is terminal for a first submission.
const RETRYABLE_ERROR_MESSAGES: &[&str] = &["timed out", "connection refused", "mempool full"];

const MAIN_CHAIN_ID: &str = "main";

/// Prefix bytes of a Tezos operation hash: 0x05 goes into base58check's
/// version slot, 0x74 is prepended to the digest payload.
const OPERATION_HASH_PREFIX: [u8; 2] = [0x05, 0x74];

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("node returned {status}: {body}")]
    Node { status: u16, body: String },

    #[error("unexpected node response: {0}")]
    Shape(String),

    #[error("invalid raw transaction: {0}")]
    InvalidRawTransaction(String),

    /// Temporary broadcast failure, e.g. a full mempool. The row stays
    /// eligible for retry.
    #[error("temporary failure: {0}")]
    BroadcastRetryable(String),
}

impl ClientError {
    pub fn is_retryable_broadcast(&self) -> bool {
        matches!(self, ClientError::BroadcastRetryable(_))
    }
}

fn matches_retryable(message: &str) -> bool {
    RETRYABLE_ERROR_MESSAGES.iter().any(|m| message.contains(m))
}

/// The node operations the indexer, broadcaster and query service consume.
#[async_trait]
pub trait Chain: Send + Sync {
    /// Chain tip: highest level and its block hash.
    async fn height(&self) -> Result<Height, ClientError>;

    async fn block(&self, number: u64) -> Result<Block, ClientError>;

    /// Transfers of one block, in operation-then-content order.
    async fn transfers(&self, number: u64) -> Result<Vec<Transaction>, ClientError>;

    /// Balance per address, at `block_number` and at tip. `block_number`
    /// zero means "latest" and the two values are equal. Per-address
    /// failures land on the result object, not on the call.
    async fn balances(
        &self,
        addresses: &[String],
        block_number: u64,
    ) -> Result<Vec<Balance>, ClientError>;

    async fn counters(&self, addresses: &[String]) -> Result<Vec<Counter>, ClientError>;

    async fn estimated_fee(&self) -> Result<Fees, ClientError>;

    /// Canonical operation hash of a raw transaction, without contacting
    /// the node.
    fn raw_transaction_hash(&self, raw_transaction: &str) -> Result<String, ClientError>;

    /// Injects a raw signed operation. Errors are classified: matches of
    /// the retryable substring list become `BroadcastRetryable`.
    async fn broadcast_transaction(&self, raw_transaction: &str) -> Result<(), ClientError>;
}

pub struct TezosClient {
    http: reqwest::Client,
    base_url: String,
    workers_amount: usize,
    rate_limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl TezosClient {
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.rpc_timeout_secs))
            .build()?;

        let rps = config.rpc_rate_limit.unwrap_or(50).max(1);
        let quota = Quota::per_second(NonZeroU32::new(rps).expect("rps is at least 1"));

        info!(
            node_url = %config.node_url,
            workers = config.workers_amount,
            rate_limit = rps,
            "initializing tezos client"
        );

        Ok(Self {
            http,
            base_url: config.node_url.trim_end_matches('/').to_string(),
            workers_amount: config.workers_amount.max(1),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    fn retry_policy() -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(10))
            .with_max_times(5)
            .with_jitter()
    }

    async fn fetch_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, path);
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Node { status, body });
        }
        Ok(response.json::<T>().await?)
    }

    /// GET with the default retry policy; retried errors are transient
    /// transport failures, a decoded response is never retried.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        (|| async { self.fetch_json::<T>(path).await })
            .retry(&Self::retry_policy())
            .await
    }

    async fn contract_balance(
        &self,
        block_id: &str,
        address: &str,
    ) -> Result<BigUint, ClientError> {
        let raw: String = self
            .get_json(&format!(
                "/chains/{MAIN_CHAIN_ID}/blocks/{block_id}/context/contracts/{address}/balance"
            ))
            .await?;
        BigUint::parse_bytes(raw.as_bytes(), 10)
            .ok_or_else(|| ClientError::Shape(format!("bad balance {raw:?}")))
    }

    async fn address_balances(
        &self,
        address: &str,
        tip_hash: &str,
        block_number: u64,
    ) -> Result<(BigUint, BigUint), ClientError> {
        let at_tip = self.contract_balance(tip_hash, address).await?;

        // Block zero means "latest": both values are the tip balance.
        if block_number == 0 {
            return Ok((at_tip.clone(), at_tip));
        }

        let header: HeaderResponse = self
            .get_json(&format!(
                "/chains/{MAIN_CHAIN_ID}/blocks/{block_number}/header"
            ))
            .await?;
        let at_block = self.contract_balance(&header.hash, address).await?;
        Ok((at_block, at_tip))
    }
}

#[async_trait]
impl Chain for TezosClient {
    async fn height(&self) -> Result<Height, ClientError> {
        let header: HeaderResponse = self
            .get_json(&format!("/chains/{MAIN_CHAIN_ID}/blocks/head/header"))
            .await?;
        Ok(Height {
            height: header.level,
            hash: header.hash,
        })
    }

    async fn block(&self, number: u64) -> Result<Block, ClientError> {
        let header: HeaderResponse = self
            .get_json(&format!("/chains/{MAIN_CHAIN_ID}/blocks/{number}/header"))
            .await?;
        Ok(Block {
            number,
            hash: Some(header.hash),
            previous_hash: Some(header.predecessor),
            timestamp: Some(parse_timestamp(&header.timestamp)?),
            created_at: None,
        })
    }

    async fn transfers(&self, number: u64) -> Result<Vec<Transaction>, ClientError> {
        let block: BlockResponse = self
            .get_json(&format!("/chains/{MAIN_CHAIN_ID}/blocks/{number}"))
            .await?;
        extract_transfers(&block)
    }

    async fn balances(
        &self,
        addresses: &[String],
        block_number: u64,
    ) -> Result<Vec<Balance>, ClientError> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }

        let tip = self.height().await?;
        let tip_hash = Arc::new(tip.hash);

        let client = self.clone_handle();
        let cancel = CancellationToken::new();
        let (balances, _) = worker_pool::fan_out(
            addresses.to_vec(),
            self.workers_amount,
            &cancel,
            move |address| {
                let client = client.clone();
                let tip_hash = tip_hash.clone();
                async move {
                    match client
                        .address_balances(&address, &tip_hash, block_number)
                        .await
                    {
                        Ok((at_block, at_tip)) => Ok::<_, ClientError>(Balance {
                            address,
                            balance_at_block: Some(at_block),
                            balance_at_tip: Some(at_tip),
                            error: None,
                        }),
                        Err(e) => Ok(Balance {
                            address,
                            balance_at_block: None,
                            balance_at_tip: None,
                            error: Some(e.to_string()),
                        }),
                    }
                }
            },
        )
        .await;

        Ok(balances)
    }

    async fn counters(&self, addresses: &[String]) -> Result<Vec<Counter>, ClientError> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }

        let tip = self.height().await?;
        let tip_hash = Arc::new(tip.hash);

        let client = self.clone_handle();
        let cancel = CancellationToken::new();
        let (counters, _) = worker_pool::fan_out(
            addresses.to_vec(),
            self.workers_amount,
            &cancel,
            move |address| {
                let client = client.clone();
                let tip_hash = tip_hash.clone();
                async move {
                    let fetched: Result<String, ClientError> = client
                        .get_json(&format!(
                            "/chains/{MAIN_CHAIN_ID}/blocks/{tip_hash}/context/contracts/{address}/counter"
                        ))
                        .await;
                    let result = match fetched {
                        Ok(raw) => match raw.parse::<u64>() {
                            Ok(counter) => Counter {
                                address,
                                counter,
                                error: None,
                            },
                            Err(_) => Counter {
                                address,
                                counter: 0,
                                error: Some(format!("bad counter {raw:?}")),
                            },
                        },
                        Err(e) => Counter {
                            address,
                            counter: 0,
                            error: Some(e.to_string()),
                        },
                    };
                    Ok::<_, ClientError>(result)
                }
            },
        )
        .await;

        Ok(counters)
    }

    async fn estimated_fee(&self) -> Result<Fees, ClientError> {
        let constants: ConstantsResponse = self
            .get_json(&format!(
                "/chains/{MAIN_CHAIN_ID}/blocks/head/context/constants"
            ))
            .await?;
        let per_byte = BigUint::parse_bytes(constants.cost_per_byte.as_bytes(), 10)
            .ok_or_else(|| {
                ClientError::Shape(format!("bad cost_per_byte {:?}", constants.cost_per_byte))
            })?;

        Ok(Fees {
            minimal_fees: BigUint::from(100_000u32),
            minimal_nanotez_per_gas_unit: BigUint::from(100u32),
            minimal_nanotez_per_byte: per_byte,
        })
    }

    fn raw_transaction_hash(&self, raw_transaction: &str) -> Result<String, ClientError> {
        compute_operation_hash(raw_transaction)
    }

    async fn broadcast_transaction(&self, raw_transaction: &str) -> Result<(), ClientError> {
        self.rate_limiter.until_ready().await;

        // The injection endpoint takes the signed operation hex as a JSON
        // string body.
        let url = format!("{}/injection/operation?chain={MAIN_CHAIN_ID}", self.base_url);
        let sent = self.http.post(&url).json(&raw_transaction).send().await;
        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                let message = e.to_string();
                if e.is_timeout() || matches_retryable(&message) {
                    return Err(ClientError::BroadcastRetryable(message));
                }
                return Err(ClientError::Http(e));
            }
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            if matches_retryable(&body) {
                return Err(ClientError::BroadcastRetryable(body));
            }
            return Err(ClientError::Node { status, body });
        }

        debug!("operation injected");
        Ok(())
    }
}

impl TezosClient {
    /// Handle for worker closures. The inner HTTP client and the rate
    /// limiter are shared, not duplicated.
    fn clone_handle(&self) -> Arc<TezosClient> {
        Arc::new(TezosClient {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            workers_amount: self.workers_amount,
            rate_limiter: self.rate_limiter.clone(),
        })
    }
}

/// base58check(0x05, 0x74 + blake2b-256(bytes)): the version byte feeds
/// base58check's one-byte prefix slot, the second prefix byte is prepended
/// to the digest payload.
pub fn compute_operation_hash(raw_transaction: &str) -> Result<String, ClientError> {
    let data = hex::decode(raw_transaction)
        .map_err(|e| ClientError::InvalidRawTransaction(e.to_string()))?;

    let digest = blake2b_simd::Params::new()
        .hash_length(32)
        .to_state()
        .update(&data)
        .finalize();

    let mut payload = Vec::with_capacity(1 + digest.as_bytes().len());
    payload.push(OPERATION_HASH_PREFIX[1]);
    payload.extend_from_slice(digest.as_bytes());

    Ok(bs58::encode(payload)
        .with_check_version(OPERATION_HASH_PREFIX[0])
        .into_string())
}
