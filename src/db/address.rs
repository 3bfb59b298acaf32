//! Addresses of interest. Registration is what makes history for an
//! address survive garbage collection (see `TransactionStore::mark_pinned`).

use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::StoreError;
use crate::validation::validate_address;

#[derive(Clone)]
pub struct AddressStore {
    pool: SqlitePool,
}

impl AddressStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_addresses(&self, addresses: &[String]) -> Result<(), StoreError> {
        for address in addresses {
            validate_address(address)?;
        }

        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for address in addresses {
            sqlx::query(
                "INSERT INTO addresses (address, created_at) VALUES (?, ?) \
                 ON CONFLICT (address) DO NOTHING",
            )
            .bind(address)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
