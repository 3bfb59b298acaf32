use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tezos_data_service::blockchain::broadcaster::Broadcaster;
use tezos_data_service::blockchain::cache::CachingChain;
use tezos_data_service::blockchain::client::{Chain, TezosClient};
use tezos_data_service::blockchain::gc::GarbageCollector;
use tezos_data_service::blockchain::indexer::BlockIndexer;
use tezos_data_service::config::Config;
use tezos_data_service::db::address::AddressStore;
use tezos_data_service::db::attribute::AttributeStore;
use tezos_data_service::db::block::BlockStore;
use tezos_data_service::db::trail::TrailStore;
use tezos_data_service::db::transaction::TransactionStore;
use tezos_data_service::db::{connection, migration};
use tezos_data_service::service::TezosService;
use tezos_data_service::state::AppState;
use tezos_data_service::{api, metrics};

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting tezos-data-service");

    let config = Config::from_env();
    info!("configuration loaded: {:?}", config);

    let metrics_addr = format!("{}:{}", config.server_host, config.metrics_port).parse()?;
    metrics::init_metrics(metrics_addr);

    let db_pool = connection::establish_connection(&config.database_url).await?;
    migration::run_migrations(&db_pool).await?;
    info!("database ready");

    let chain: Arc<dyn Chain> = Arc::new(CachingChain::new(TezosClient::new(&config)?, &config));

    let transactions = TransactionStore::new(db_pool.clone());
    let blocks = BlockStore::new(db_pool.clone());
    let addresses = AddressStore::new(db_pool.clone());
    let attributes = AttributeStore::new(db_pool.clone());
    let trails = TrailStore::new(db_pool.clone());

    let shutdown = CancellationToken::new();

    let indexer = BlockIndexer::new(
        chain.clone(),
        transactions.clone(),
        blocks.clone(),
        config.start_block,
        config.confirmation_depth,
        config.batch_size,
        config.parallel_batch,
    );
    let indexer_handle = tokio::spawn({
        let interval = config.indexer_interval;
        let shutdown = shutdown.clone();
        async move { indexer.run(interval, shutdown).await }
    });

    let broadcaster = Broadcaster::new(
        chain.clone(),
        transactions.clone(),
        trails.clone(),
        config.broadcast_interval,
        config.broadcast_batch,
        config.broadcast_workers,
    );
    let broadcaster_handle = tokio::spawn({
        let interval = config.broadcaster_interval;
        let shutdown = shutdown.clone();
        async move { broadcaster.run(interval, shutdown).await }
    });

    let gc = GarbageCollector::new(chain.clone(), transactions.clone(), config.retention_blocks);
    let gc_handle = tokio::spawn({
        let interval = config.gc_interval;
        let shutdown = shutdown.clone();
        async move { gc.run(interval, shutdown).await }
    });

    let service = TezosService::new(
        chain,
        transactions,
        blocks,
        addresses,
        attributes,
        trails,
        config.start_block,
    );
    let app_state = Arc::new(AppState {
        config: config.clone(),
        service,
    });

    let app = api::create_router(app_state);
    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("server listening on {}", addr);

    let server_shutdown = shutdown.clone();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                server_shutdown.cancelled().await;
            })
            .await
            .expect("server error");
    });

    shutdown_signal().await;
    shutdown.cancel();

    let shutdown_timeout = tokio::time::Duration::from_secs(10);
    for (name, handle) in [
        ("indexer", indexer_handle),
        ("broadcaster", broadcaster_handle),
        ("garbage collector", gc_handle),
        ("server", server_handle),
    ] {
        tokio::select! {
            _ = tokio::time::sleep(shutdown_timeout) => {
                warn!("{} shutdown timed out, forcing exit", name);
            }
            _ = handle => {
                info!("{} shut down", name);
            }
        }
    }

    info!("all components shut down, exiting");
    Ok(())
}
