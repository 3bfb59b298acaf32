//! Customer-scoped transaction attributes: free-form key/value tags
//! attached to an operation hash, queryable by `(key, value)`.

use std::collections::HashMap;

use sqlx::SqlitePool;

use crate::db::{placeholders, StoreError};
use crate::validation::{validate_attribute, validate_hash};

#[derive(Clone)]
pub struct AttributeStore {
    pool: SqlitePool,
}

impl AttributeStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_attributes(
        &self,
        customer_id: &str,
        hash: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<(), StoreError> {
        validate_hash(hash)?;
        for (key, value) in attributes {
            validate_attribute(key, value)?;
        }

        let mut tx = self.pool.begin().await?;
        for (key, value) in attributes {
            sqlx::query(
                "INSERT INTO transaction_attributes (customer_id, hash, key, value) \
                 VALUES (?, ?, ?, ?) \
                 ON CONFLICT (customer_id, hash, key) DO UPDATE SET value = excluded.value",
            )
            .bind(customer_id)
            .bind(hash)
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Attributes of the given hashes for one customer, keyed by hash.
    pub async fn attributes_map(
        &self,
        customer_id: &str,
        hashes: &[String],
    ) -> Result<HashMap<String, HashMap<String, String>>, StoreError> {
        if hashes.is_empty() {
            return Ok(HashMap::new());
        }
        for hash in hashes {
            validate_hash(hash)?;
        }

        let sql = format!(
            "SELECT hash, key, value FROM transaction_attributes \
             WHERE customer_id = ? AND hash IN ({})",
            placeholders(hashes.len())
        );
        let mut query = sqlx::query_as::<_, (String, String, String)>(&sql).bind(customer_id);
        for hash in hashes {
            query = query.bind(hash);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut map: HashMap<String, HashMap<String, String>> = HashMap::new();
        for (hash, key, value) in rows {
            map.entry(hash).or_default().insert(key, value);
        }
        Ok(map)
    }

    /// Hashes a customer tagged with the given key/value pair.
    pub async fn search(
        &self,
        customer_id: &str,
        key: &str,
        value: &str,
    ) -> Result<Vec<String>, StoreError> {
        validate_attribute(key, value)?;

        let hashes = sqlx::query_scalar::<_, String>(
            "SELECT hash FROM transaction_attributes \
             WHERE customer_id = ? AND key = ? AND value = ?",
        )
        .bind(customer_id)
        .bind(key)
        .bind(value)
        .fetch_all(&self.pool)
        .await?;
        Ok(hashes)
    }
}
