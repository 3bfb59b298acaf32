//! TTL caching adapter over a [`Chain`].
//!
//! Only `height` and `block` are cached: they are hit on every query and
//! every job tick, and a short TTL keeps the indexer at most one interval
//! behind. Everything else passes through.

use async_trait::async_trait;
use moka::future::Cache;

use crate::blockchain::client::{Chain, ClientError};
use crate::config::Config;
use crate::models::{Balance, Block, Counter, Fees, Height, Transaction};

pub struct CachingChain<C> {
    inner: C,
    height_cache: Cache<(), Height>,
    block_cache: Cache<u64, Block>,
}

impl<C: Chain> CachingChain<C> {
    pub fn new(inner: C, config: &Config) -> Self {
        Self {
            inner,
            height_cache: Cache::builder()
                .time_to_live(config.height_cache_ttl)
                .max_capacity(1)
                .build(),
            block_cache: Cache::builder()
                .time_to_live(config.block_cache_ttl)
                .max_capacity(config.cache_size)
                .build(),
        }
    }
}

#[async_trait]
impl<C: Chain> Chain for CachingChain<C> {
    async fn height(&self) -> Result<Height, ClientError> {
        if let Some(height) = self.height_cache.get(&()).await {
            return Ok(height);
        }
        let height = self.inner.height().await?;
        self.height_cache.insert((), height.clone()).await;
        Ok(height)
    }

    async fn block(&self, number: u64) -> Result<Block, ClientError> {
        if let Some(block) = self.block_cache.get(&number).await {
            return Ok(block);
        }
        let block = self.inner.block(number).await?;
        self.block_cache.insert(number, block.clone()).await;
        Ok(block)
    }

    async fn transfers(&self, number: u64) -> Result<Vec<Transaction>, ClientError> {
        self.inner.transfers(number).await
    }

    async fn balances(
        &self,
        addresses: &[String],
        block_number: u64,
    ) -> Result<Vec<Balance>, ClientError> {
        self.inner.balances(addresses, block_number).await
    }

    async fn counters(&self, addresses: &[String]) -> Result<Vec<Counter>, ClientError> {
        self.inner.counters(addresses).await
    }

    async fn estimated_fee(&self) -> Result<Fees, ClientError> {
        self.inner.estimated_fee().await
    }

    fn raw_transaction_hash(&self, raw_transaction: &str) -> Result<String, ClientError> {
        self.inner.raw_transaction_hash(raw_transaction)
    }

    async fn broadcast_transaction(&self, raw_transaction: &str) -> Result<(), ClientError> {
        self.inner.broadcast_transaction(raw_transaction).await
    }
}
