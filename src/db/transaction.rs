//! Authoritative storage for transfers and broadcast records.
//!
//! Both kinds share one table; broadcast-only rows carry the -1
//! block-number sentinel until the block carrying them is indexed, at
//! which point the upsert upgrades them in place.

use chrono::Utc;
use num_bigint::BigUint;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::blockchain::worker_pool;
use crate::db::{placeholders, StoreError};
use crate::models::{Status, Transaction};
use crate::validation::{validate_address, validate_hash};

const COLUMNS: &str = "id, hash, idx, block_number, addr_to, addr_from, amount, fee, counter, \
                       timestamp, pinned, broadcasted, rawtx, status, message, created_at, \
                       created_at_block, broadcasted_at_block";

/// Rows fetched per garbage-collection round.
const GC_SELECT_LIMIT: i64 = 50_000;
/// Ids deleted per statement during batched deletes.
const DELETE_CHUNK: usize = 100;
/// Concurrent delete statements.
const DELETE_WORKERS: usize = 100;
/// Addresses per pin statement batch.
const PIN_BATCH: usize = 1000;
/// Hashes per TIMEOUT update statement.
const COLLECT_BATCH: usize = 100;

/// Database image of a row; big integers travel as decimal strings.
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: String,
    hash: String,
    idx: i64,
    block_number: Option<i64>,
    addr_to: Option<String>,
    addr_from: Option<String>,
    amount: Option<String>,
    fee: Option<String>,
    counter: Option<String>,
    timestamp: Option<i64>,
    pinned: bool,
    broadcasted: bool,
    rawtx: Option<String>,
    status: i64,
    message: Option<String>,
    created_at: Option<i64>,
    created_at_block: Option<i64>,
    broadcasted_at_block: Option<i64>,
}

fn parse_big(value: Option<String>) -> Option<BigUint> {
    value.and_then(|v| BigUint::parse_bytes(v.as_bytes(), 10))
}

fn to_model(row: TransactionRow) -> Transaction {
    Transaction {
        id: row.id,
        hash: row.hash,
        index: row.idx as u64,
        // -1 is the broadcast-only sentinel, surfaced as "not mined".
        block_number: row.block_number.filter(|n| *n >= 0).map(|n| n as u64),
        source_address: row.addr_from,
        destination_address: row.addr_to,
        amount: parse_big(row.amount),
        fee: parse_big(row.fee),
        counter: parse_big(row.counter),
        status: Status::from_code(row.status).unwrap_or(Status::New),
        raw_transaction: row.rawtx,
        pinned: row.pinned,
        broadcasted: row.broadcasted,
        message: row.message,
        timestamp: row.timestamp,
        created_at: row.created_at,
        created_at_block: row.created_at_block.map(|n| n as u64),
        broadcasted_at_block: row.broadcasted_at_block.map(|n| n as u64),
        attributes: Default::default(),
    }
}

#[derive(Clone)]
pub struct TransactionStore {
    pool: SqlitePool,
}

impl TransactionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Multi-row upsert. Re-ingesting a block is a no-op except that
    /// broadcast-only rows are upgraded in place with the mined values;
    /// the broadcast flags survive and the error message is cleared.
    pub async fn create_transactions(
        &self,
        transactions: &[Transaction],
    ) -> Result<(), StoreError> {
        if transactions.is_empty() {
            return Ok(());
        }

        for tx in transactions {
            validate_hash(&tx.hash)?;
            if tx.amount.is_none() {
                return Err(StoreError::MissingField("amount"));
            }
        }

        let now = Utc::now().timestamp();

        let mut sql = String::from(
            "INSERT INTO transactions (id, hash, idx, block_number, addr_to, addr_from, \
             amount, fee, counter, timestamp, pinned, broadcasted, status, created_at) VALUES ",
        );
        for i in 0..transactions.len() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str("(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)");
        }
        sql.push_str(
            " ON CONFLICT (hash, idx) DO UPDATE SET \
             block_number = excluded.block_number, addr_to = excluded.addr_to, \
             addr_from = excluded.addr_from, amount = excluded.amount, fee = excluded.fee, \
             counter = excluded.counter, timestamp = excluded.timestamp, \
             status = excluded.status, message = NULL",
        );

        let mut query = sqlx::query(&sql);
        for tx in transactions {
            query = query
                .bind(Uuid::new_v4().to_string())
                .bind(&tx.hash)
                .bind(tx.index as i64)
                .bind(tx.block_number.map(|n| n as i64))
                .bind(&tx.destination_address)
                .bind(&tx.source_address)
                .bind(tx.amount.as_ref().map(|a| a.to_string()))
                .bind(tx.fee.as_ref().map(|f| f.to_string()))
                .bind(tx.counter.as_ref().map(|c| c.to_string()))
                .bind(tx.timestamp)
                .bind(tx.pinned)
                .bind(tx.status.code())
                .bind(now);
        }
        query.execute(&self.pool).await?;

        Ok(())
    }

    /// All rows matching any of the hashes. Repairs the SUCCESS-with-message
    /// anomaly on read: a broadcast that failed and then succeeded keeps a
    /// stale error message until someone looks at it.
    pub async fn transactions_by_hashes(
        &self,
        hashes: &[String],
    ) -> Result<Vec<Transaction>, StoreError> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }
        for hash in hashes {
            validate_hash(hash)?;
        }

        let sql = format!(
            "SELECT {COLUMNS} FROM transactions WHERE hash IN ({})",
            placeholders(hashes.len())
        );
        let mut query = sqlx::query_as::<_, TransactionRow>(&sql);
        for hash in hashes {
            query = query.bind(hash);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut transactions = Vec::with_capacity(rows.len());
        for row in rows {
            let mut tx = to_model(row);
            if tx.status == Status::Success && tx.message.is_some() {
                self.erase_error_message(&tx.hash).await;
                tx.message = None;
            }
            transactions.push(tx);
        }
        Ok(transactions)
    }

    async fn erase_error_message(&self, hash: &str) {
        // Lazy repair; a failure here is retried on the next read.
        let _ = sqlx::query("UPDATE transactions SET message = NULL WHERE hash = ?")
            .bind(hash)
            .execute(&self.pool)
            .await;
    }

    /// Rows where either party is one of `addresses` within a block range,
    /// plus the total match count for pagination.
    pub async fn transactions_between_blocks(
        &self,
        addresses: &[String],
        from_block: u64,
        to_block: u64,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<Transaction>, u64), StoreError> {
        self.transactions_between(
            addresses,
            "block_number",
            from_block as i64,
            to_block as i64,
            limit,
            offset,
        )
        .await
    }

    /// Same as [`transactions_between_blocks`] with a timestamp predicate.
    /// Callers truncate the bounds to minute granularity.
    pub async fn transactions_between_dates(
        &self,
        addresses: &[String],
        from_ts: i64,
        to_ts: i64,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<Transaction>, u64), StoreError> {
        self.transactions_between(addresses, "timestamp", from_ts, to_ts, limit, offset)
            .await
    }

    async fn transactions_between(
        &self,
        addresses: &[String],
        column: &str,
        from: i64,
        to: i64,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<Transaction>, u64), StoreError> {
        if addresses.is_empty() {
            return Ok((Vec::new(), 0));
        }
        for address in addresses {
            validate_address(address)?;
        }

        let ph = placeholders(addresses.len());
        let sql = format!(
            "SELECT {COLUMNS} FROM transactions \
             WHERE (addr_from IN ({ph}) OR addr_to IN ({ph})) \
             AND {column} >= ? AND {column} <= ? \
             ORDER BY {column} ASC, idx ASC LIMIT ? OFFSET ?"
        );
        let mut query = sqlx::query_as::<_, TransactionRow>(&sql);
        for address in addresses.iter().chain(addresses.iter()) {
            query = query.bind(address);
        }
        let rows = query
            .bind(from)
            .bind(to)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await?;

        let count_sql = format!(
            "SELECT COUNT(*) FROM transactions \
             WHERE (addr_from IN ({ph}) OR addr_to IN ({ph})) \
             AND {column} >= ? AND {column} <= ?"
        );
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        for address in addresses.iter().chain(addresses.iter()) {
            count_query = count_query.bind(address);
        }
        let count = count_query.bind(from).bind(to).fetch_one(&self.pool).await?;

        let mut transactions = Vec::with_capacity(rows.len());
        for row in rows {
            let mut tx = to_model(row);
            if tx.status == Status::Success && tx.message.is_some() {
                self.erase_error_message(&tx.hash).await;
                tx.message = None;
            }
            transactions.push(tx);
        }
        Ok((transactions, count as u64))
    }

    /// Marks every row touching one of the addresses as pinned, in batches
    /// of 1000 addresses to bound statement size. Pinned rows survive GC.
    pub async fn mark_pinned(&self, addresses: &[String]) -> Result<(), StoreError> {
        for address in addresses {
            validate_address(address)?;
        }

        for batch in addresses.chunks(PIN_BATCH) {
            let mut tx = self.pool.begin().await?;
            for address in batch {
                sqlx::query(
                    "UPDATE transactions SET pinned = 1 \
                     WHERE (addr_from = ? OR addr_to = ?) AND pinned = 0",
                )
                .bind(address)
                .bind(address)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
        }
        Ok(())
    }

    /// Inserts a broadcast-only row. If the hash was already mined the
    /// existing row keeps its block number; it only gains the broadcast
    /// flag and a cleared message.
    pub async fn broadcast(&self, transaction: &Transaction) -> Result<(), StoreError> {
        validate_hash(&transaction.hash)?;
        let rawtx = transaction
            .raw_transaction
            .as_deref()
            .ok_or(StoreError::MissingField("raw_transaction"))?;

        sqlx::query(
            "INSERT INTO transactions (id, hash, idx, block_number, pinned, broadcasted, \
             status, rawtx, timestamp, created_at, created_at_block, broadcasted_at_block) \
             VALUES (?, ?, 0, -1, 0, 1, ?, ?, 0, ?, ?, 0) \
             ON CONFLICT (hash, idx) DO UPDATE SET broadcasted = 1, \
             status = excluded.status, message = NULL, \
             created_at_block = excluded.created_at_block, broadcasted_at_block = 0",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&transaction.hash)
        .bind(Status::New.code())
        .bind(rawtx)
        .bind(Utc::now().timestamp())
        .bind(transaction.created_at_block.map(|n| n as i64))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Broadcast rows eligible for a submission attempt: still unmined,
    /// in a retryable status, last attempted at or before the given block.
    pub async fn pending_broadcasts(
        &self,
        broadcasted_before_block: u64,
        limit: u64,
    ) -> Result<Vec<Transaction>, StoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM transactions \
             WHERE broadcasted = 1 AND status IN ({}, {}, {}) \
             AND block_number = -1 AND broadcasted_at_block <= ? LIMIT ?",
            Status::New.code(),
            Status::Pending.code(),
            Status::Failure.code(),
        );
        let rows = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(broadcasted_before_block as i64)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(to_model).collect())
    }

    pub async fn update_broadcast(
        &self,
        hash: &str,
        status: Status,
        message: Option<&str>,
        broadcasted_at_block: u64,
    ) -> Result<(), StoreError> {
        validate_hash(hash)?;

        sqlx::query(
            "UPDATE transactions SET broadcasted_at_block = ?, status = ?, message = ? \
             WHERE hash = ?",
        )
        .bind(broadcasted_at_block as i64)
        .bind(status.code())
        .bind(message)
        .bind(hash)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Hashes of broadcasts that outlived the retry deadline and should be
    /// moved to TIMEOUT.
    pub async fn broadcasts_to_collect(
        &self,
        before_block: u64,
    ) -> Result<Vec<String>, StoreError> {
        let sql = format!(
            "SELECT hash FROM transactions \
             WHERE broadcasted = 1 AND status IN ({}, {}) \
             AND block_number = -1 AND created_at_block <= ?",
            Status::Pending.code(),
            Status::Failure.code(),
        );
        let hashes = sqlx::query_scalar::<_, String>(&sql)
            .bind(before_block as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(hashes)
    }

    /// Bulk-moves the given broadcasts to TIMEOUT, 100 hashes a statement.
    pub async fn collect_broadcasts(&self, hashes: &[String]) -> Result<(), StoreError> {
        for hash in hashes {
            validate_hash(hash)?;
        }

        for batch in hashes.chunks(COLLECT_BATCH) {
            let sql = format!(
                "UPDATE transactions SET status = ? WHERE hash IN ({})",
                placeholders(batch.len())
            );
            let mut query = sqlx::query(&sql).bind(Status::Timeout.code());
            for hash in batch {
                query = query.bind(hash);
            }
            query.execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Deletes unpinned, non-broadcast history at or below `before_block`.
    /// Ids are selected 50 000 at a time and deleted in parallel chunks;
    /// deletes are idempotent so an aborted round is retried safely.
    pub async fn collect_transactions(
        &self,
        before_block: u64,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        loop {
            let ids = sqlx::query_scalar::<_, String>(
                "SELECT id FROM transactions \
                 WHERE pinned = 0 AND broadcasted = 0 AND block_number <= ? LIMIT ?",
            )
            .bind(before_block as i64)
            .bind(GC_SELECT_LIMIT)
            .fetch_all(&self.pool)
            .await?;

            if ids.is_empty() {
                return Ok(());
            }
            debug!(amount = ids.len(), "garbage collecting transactions");
            self.delete_ids(ids, cancel).await?;
        }
    }

    /// Removes every transfer of one block; invoked by the reorg rewind.
    pub async fn delete_block_transactions(
        &self,
        block_number: u64,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        loop {
            let ids = sqlx::query_scalar::<_, String>(
                "SELECT id FROM transactions WHERE block_number = ? LIMIT ?",
            )
            .bind(block_number as i64)
            .bind(GC_SELECT_LIMIT)
            .fetch_all(&self.pool)
            .await?;

            if ids.is_empty() {
                return Ok(());
            }
            debug!(block_number, amount = ids.len(), "deleting block transactions");
            self.delete_ids(ids, cancel).await?;
        }
    }

    async fn delete_ids(
        &self,
        ids: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        let chunks: Vec<Vec<String>> = ids.chunks(DELETE_CHUNK).map(|c| c.to_vec()).collect();

        let store = self.clone();
        let (_, errors) = worker_pool::fan_out(chunks, DELETE_WORKERS, cancel, move |chunk| {
            let store = store.clone();
            async move { store.delete_transaction_ids(&chunk).await }
        })
        .await;

        if errors.is_empty() {
            Ok(())
        } else {
            let joined = errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            Err(StoreError::Batch(joined))
        }
    }

    async fn delete_transaction_ids(&self, ids: &[String]) -> Result<(), StoreError> {
        let sql = format!(
            "DELETE FROM transactions WHERE id IN ({})",
            placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        query.execute(&self.pool).await?;
        Ok(())
    }

    /// Paginated export of in-flight broadcasts. Page and count run inside
    /// one read transaction so they observe the same snapshot.
    pub async fn dump_pending_broadcasts(
        &self,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<Transaction>, u64), StoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM transactions \
             WHERE broadcasted = 1 AND status IN ({}, {}, {}) LIMIT ? OFFSET ?",
            Status::New.code(),
            Status::Pending.code(),
            Status::Failure.code(),
        );
        let count_sql = format!(
            "SELECT COUNT(*) FROM transactions \
             WHERE broadcasted = 1 AND status IN ({}, {}, {})",
            Status::New.code(),
            Status::Pending.code(),
            Status::Failure.code(),
        );

        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&mut *tx)
            .await?;
        let count = sqlx::query_scalar::<_, i64>(&count_sql)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok((rows.into_iter().map(to_model).collect(), count as u64))
    }

    /// Paginated export of pinned rows, same snapshot semantics.
    pub async fn dump_pinned_transactions(
        &self,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<Transaction>, u64), StoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM transactions WHERE pinned = 1 LIMIT ? OFFSET ?"
        );
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&mut *tx)
            .await?;
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM transactions WHERE pinned = 1")
                .fetch_one(&mut *tx)
                .await?;
        tx.commit().await?;

        Ok((rows.into_iter().map(to_model).collect(), count as u64))
    }
}
