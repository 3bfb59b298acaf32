//! Block markers. A marker is written only after every transfer of the
//! block was stored, so the highest marker is a safe restart point.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::{placeholders, StoreError};
use crate::models::Block;

#[derive(Debug, sqlx::FromRow)]
struct BlockRow {
    block_number: i64,
    block_hash: Option<String>,
    previous_hash: Option<String>,
    block_timestamp: Option<i64>,
    created_at: Option<i64>,
}

fn to_model(row: BlockRow) -> Block {
    Block {
        number: row.block_number as u64,
        hash: row.block_hash,
        previous_hash: row.previous_hash,
        timestamp: row.block_timestamp,
        created_at: row.created_at,
    }
}

#[derive(Clone)]
pub struct BlockStore {
    pool: SqlitePool,
}

impl BlockStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_block(&self, block: &Block) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO blocks (block_number, block_hash, previous_hash, block_timestamp, created_at) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT (block_number) DO UPDATE SET block_hash = excluded.block_hash, \
             previous_hash = excluded.previous_hash, block_timestamp = excluded.block_timestamp",
        )
        .bind(block.number as i64)
        .bind(&block.hash)
        .bind(&block.previous_hash)
        .bind(block.timestamp)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn block(&self, number: u64) -> Result<Option<Block>, StoreError> {
        let row = sqlx::query_as::<_, BlockRow>(
            "SELECT block_number, block_hash, previous_hash, block_timestamp, created_at \
             FROM blocks WHERE block_number = ?",
        )
        .bind(number as i64)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(to_model))
    }

    /// The highest stored marker, or `None` on a fresh database.
    pub async fn last_block(&self) -> Result<Option<Block>, StoreError> {
        let row = sqlx::query_as::<_, BlockRow>(
            "SELECT block_number, block_hash, previous_hash, block_timestamp, created_at \
             FROM blocks ORDER BY block_number DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(to_model))
    }

    /// Removes the markers collected by a reorg rewind in one statement.
    pub async fn delete_blocks(&self, numbers: &[u64]) -> Result<(), StoreError> {
        if numbers.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "DELETE FROM blocks WHERE block_number IN ({})",
            placeholders(numbers.len())
        );
        let mut query = sqlx::query(&sql);
        for number in numbers {
            query = query.bind(*number as i64);
        }
        query.execute(&self.pool).await?;
        Ok(())
    }
}
