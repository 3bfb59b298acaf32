//! Append-only audit log of broadcast attempts. Rows are never updated
//! or deleted.

use sqlx::SqlitePool;

use crate::db::StoreError;
use crate::models::BroadcastTrail;

#[derive(Clone)]
pub struct TrailStore {
    pool: SqlitePool,
}

impl TrailStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert_trails(&self, trails: &[BroadcastTrail]) -> Result<(), StoreError> {
        if trails.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for trail in trails {
            sqlx::query(
                "INSERT INTO broadcast_trails (action, hash, status, date) VALUES (?, ?, ?, ?)",
            )
            .bind(&trail.action)
            .bind(&trail.transaction_hash)
            .bind(&trail.broadcast_status)
            .bind(trail.date)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    #[cfg(test)]
    pub async fn trails_for_hash(&self, hash: &str) -> Result<Vec<BroadcastTrail>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, String, i64)>(
            "SELECT action, hash, status, date FROM broadcast_trails WHERE hash = ? ORDER BY id",
        )
        .bind(hash)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(action, transaction_hash, broadcast_status, date)| BroadcastTrail {
                action,
                transaction_hash,
                broadcast_status,
                date,
            })
            .collect())
    }
}
