use sqlx::SqlitePool;
use tracing::info;

/// Creates the five tables and their indexes. Every statement is
/// idempotent, so this runs unconditionally at startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    info!("running database migrations");

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS addresses (
            address TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS blocks (
            block_number INTEGER PRIMARY KEY,
            block_hash TEXT,
            previous_hash TEXT,
            block_timestamp INTEGER,
            created_at INTEGER
        )",
    )
    .execute(pool)
    .await?;

    // block_number is signed: -1 marks a broadcast-only row.
    // amount, fee and counter are decimal strings (arbitrary precision).
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            hash TEXT NOT NULL,
            idx INTEGER NOT NULL,
            block_number INTEGER,
            addr_to TEXT,
            addr_from TEXT,
            amount TEXT,
            fee TEXT,
            counter TEXT,
            timestamp INTEGER,
            pinned INTEGER NOT NULL DEFAULT 0,
            broadcasted INTEGER NOT NULL DEFAULT 0,
            rawtx TEXT,
            status INTEGER NOT NULL,
            message TEXT,
            created_at INTEGER,
            created_at_block INTEGER,
            broadcasted_at_block INTEGER,
            UNIQUE (hash, idx)
        )",
    )
    .execute(pool)
    .await?;

    for statement in [
        "CREATE INDEX IF NOT EXISTS transactions_addr_from_timestamp_idx
         ON transactions (addr_from, timestamp)",
        "CREATE INDEX IF NOT EXISTS transactions_addr_to_timestamp_idx
         ON transactions (addr_to, timestamp)",
        "CREATE INDEX IF NOT EXISTS transactions_addr_from_pinned_idx
         ON transactions (addr_from, pinned)",
        "CREATE INDEX IF NOT EXISTS transactions_addr_to_pinned_idx
         ON transactions (addr_to, pinned)",
        "CREATE INDEX IF NOT EXISTS transactions_block_number_idx
         ON transactions (block_number)",
        "CREATE INDEX IF NOT EXISTS transactions_addr_from_block_number_idx
         ON transactions (addr_from, block_number)",
        "CREATE INDEX IF NOT EXISTS transactions_addr_to_block_number_idx
         ON transactions (addr_to, block_number)",
        "CREATE INDEX IF NOT EXISTS transactions_broadcast_selection_idx
         ON transactions (broadcasted, status, block_number, broadcasted_at_block)",
        "CREATE INDEX IF NOT EXISTS transactions_gc_selection_idx
         ON transactions (pinned, broadcasted, block_number)",
    ] {
        sqlx::query(statement).execute(pool).await?;
    }

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS transaction_attributes (
            customer_id TEXT NOT NULL,
            hash TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT,
            PRIMARY KEY (customer_id, hash, key)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS transaction_attributes_search_idx
         ON transaction_attributes (customer_id, key, value)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS broadcast_trails (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            action TEXT NOT NULL,
            hash TEXT NOT NULL,
            status TEXT NOT NULL,
            date INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    info!("database migrations completed");
    Ok(())
}
