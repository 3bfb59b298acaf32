use dotenv::dotenv;
use std::env;
use std::time::Duration;

/// Runtime configuration, read once at startup from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub metrics_port: u16,

    /// Tezos node RPC endpoint.
    pub node_url: String,
    /// Concurrency for per-address balance/counter lookups.
    pub workers_amount: usize,
    pub rpc_timeout_secs: u64,
    pub rpc_rate_limit: Option<u32>,

    /// First height to ingest.
    pub start_block: u64,
    /// How many blocks behind tip the indexer stays.
    pub confirmation_depth: u64,
    /// Rows per insert statement.
    pub batch_size: usize,
    /// Concurrent insert statements per window.
    pub parallel_batch: usize,

    /// Blocks to wait between two submission attempts of the same row.
    pub broadcast_interval: u64,
    /// Rows selected per broadcaster tick.
    pub broadcast_batch: u64,
    /// Broadcaster worker pool size.
    pub broadcast_workers: usize,

    /// Confirmed history and broadcast deadline, in blocks.
    pub retention_blocks: u64,

    pub indexer_interval: Duration,
    pub broadcaster_interval: Duration,
    pub gc_interval: Duration,

    pub cache_size: u64,
    pub height_cache_ttl: Duration,
    pub block_cache_ttl: Duration,
}

fn var_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:data.db".to_string()),
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            server_port: var_or("SERVER_PORT", 8080),
            metrics_port: var_or("METRICS_PORT", 9090),

            node_url: env::var("NODE_URL")
                .unwrap_or_else(|_| "https://mainnet.api.tez.ie".to_string()),
            workers_amount: var_or("WORKERS_AMOUNT", 10).max(1),
            rpc_timeout_secs: var_or("RPC_TIMEOUT_SECS", 30),
            rpc_rate_limit: env::var("RPC_RATE_LIMIT").ok().and_then(|v| v.parse().ok()),

            start_block: var_or("START_BLOCK", 0),
            confirmation_depth: var_or("CONFIRMATION_DEPTH", 6),
            batch_size: var_or("BATCH_SIZE", 500).max(1),
            parallel_batch: var_or("PARALLEL_BATCH", 4).max(1),

            broadcast_interval: var_or("BROADCAST_INTERVAL", 10),
            broadcast_batch: var_or("BROADCAST_BATCH", 100),
            broadcast_workers: var_or("BROADCAST_WORKERS", 10).max(1),

            retention_blocks: var_or("RETENTION_BLOCKS", 100_000),

            indexer_interval: Duration::from_secs(var_or("INDEXER_INTERVAL_SECS", 30)),
            broadcaster_interval: Duration::from_secs(var_or("BROADCASTER_INTERVAL_SECS", 60)),
            gc_interval: Duration::from_secs(var_or("GC_INTERVAL_SECS", 3600)),

            cache_size: var_or("CACHE_SIZE", 10_000),
            height_cache_ttl: Duration::from_secs(var_or("HEIGHT_CACHE_TTL_SECS", 30)),
            block_cache_ttl: Duration::from_secs(var_or("BLOCK_CACHE_TTL_SECS", 60)),
        }
    }
}
