use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::DateTime;
use serde::Deserialize;
use tracing::info;

use crate::api::error::ApiError;
use crate::api::response::{
    with_total_count, ApiResponse, BalanceView, CounterView, FeesView, TransactionView,
    TransactionsPayload,
};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/addresses", post(add_addresses))
        .route("/broadcast", post(broadcast))
        .route("/info", get(blockchain_info))
        .route("/fees", get(estimated_fee))
        .route("/balances", get(balances))
        .route("/counters", get(counters))
        .route("/transactions", get(transactions_by_hashes))
        .route("/transactions/blocks", get(transactions_by_blocks))
        .route("/transactions/dates", get(transactions_by_dates))
        .route("/transactions/attributes", get(transactions_by_attributes))
        .route("/dumps/pending", get(dump_pending))
        .route("/dumps/pinned", get(dump_pinned))
        .with_state(state)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_date(raw: &str) -> Result<i64, ApiError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.timestamp())
        .map_err(|_| ApiError::BadRequest(format!("invalid RFC3339 date: {raw}")))
}

#[derive(Deserialize)]
struct AddAddressesBody {
    addresses: Vec<String>,
}

async fn add_addresses(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AddAddressesBody>,
) -> Result<Response, ApiError> {
    info!(amount = body.addresses.len(), "adding addresses");
    state.service.add_addresses(&body.addresses).await?;
    Ok((StatusCode::CREATED, "addresses registered").into_response())
}

#[derive(Deserialize)]
struct BroadcastBody {
    customer_id: String,
    raw_transaction: String,
    #[serde(default)]
    attributes: HashMap<String, String>,
}

async fn broadcast(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BroadcastBody>,
) -> Result<Response, ApiError> {
    if body.customer_id.is_empty() {
        return Err(ApiError::BadRequest("customer_id is required".to_string()));
    }

    let hash = state
        .service
        .broadcast(&body.customer_id, &body.raw_transaction, &body.attributes)
        .await?;
    info!(hash = %hash, "broadcast accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "hash": hash })),
    )
        .into_response())
}

async fn blockchain_info(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let info = state.service.blockchain_info().await?;
    Ok(ApiResponse { data: info }.into_response())
}

async fn estimated_fee(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let fees = state.service.estimated_fee().await?;
    Ok(ApiResponse {
        data: FeesView::from(fees),
    }
    .into_response())
}

#[derive(Deserialize)]
struct BalancesQuery {
    addresses: String,
    #[serde(default)]
    block_number: u64,
}

async fn balances(
    State(state): State<Arc<AppState>>,
    Query(params): Query<BalancesQuery>,
) -> Result<Response, ApiError> {
    let addresses = split_list(&params.addresses);
    let balances = state
        .service
        .balances(&addresses, params.block_number)
        .await?;
    Ok(ApiResponse {
        data: balances.into_iter().map(BalanceView::from).collect::<Vec<_>>(),
    }
    .into_response())
}

#[derive(Deserialize)]
struct CountersQuery {
    addresses: String,
}

async fn counters(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CountersQuery>,
) -> Result<Response, ApiError> {
    let addresses = split_list(&params.addresses);
    let counters = state.service.counters(&addresses).await?;
    Ok(ApiResponse {
        data: counters.into_iter().map(CounterView::from).collect::<Vec<_>>(),
    }
    .into_response())
}

#[derive(Deserialize)]
struct ByHashesQuery {
    customer_id: String,
    hashes: String,
}

async fn transactions_by_hashes(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ByHashesQuery>,
) -> Result<Response, ApiError> {
    let hashes = split_list(&params.hashes);
    let (transactions, height) = state
        .service
        .transactions_by_hashes(&params.customer_id, &hashes)
        .await?;
    Ok(ApiResponse {
        data: TransactionsPayload {
            transactions: transactions.into_iter().map(TransactionView::from).collect(),
            height,
        },
    }
    .into_response())
}

#[derive(Deserialize)]
struct ByBlocksQuery {
    customer_id: String,
    addresses: String,
    #[serde(default)]
    from_block: u64,
    #[serde(default)]
    to_block: u64,
    #[serde(default = "default_limit")]
    limit: u64,
    #[serde(default)]
    offset: u64,
}

fn default_limit() -> u64 {
    50
}

async fn transactions_by_blocks(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ByBlocksQuery>,
) -> Result<Response, ApiError> {
    let addresses = split_list(&params.addresses);
    let (transactions, total, height) = state
        .service
        .transactions_by_blocks(
            &params.customer_id,
            &addresses,
            params.from_block,
            params.to_block,
            params.limit,
            params.offset,
        )
        .await?;
    Ok(with_total_count(
        TransactionsPayload {
            transactions: transactions.into_iter().map(TransactionView::from).collect(),
            height,
        },
        total,
    ))
}

#[derive(Deserialize)]
struct ByDatesQuery {
    customer_id: String,
    addresses: String,
    from_date: String,
    to_date: String,
    #[serde(default = "default_limit")]
    limit: u64,
    #[serde(default)]
    offset: u64,
}

async fn transactions_by_dates(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ByDatesQuery>,
) -> Result<Response, ApiError> {
    let addresses = split_list(&params.addresses);
    let from_ts = parse_date(&params.from_date)?;
    let to_ts = parse_date(&params.to_date)?;

    let (transactions, total, height) = state
        .service
        .transactions_by_dates(
            &params.customer_id,
            &addresses,
            from_ts,
            to_ts,
            params.limit,
            params.offset,
        )
        .await?;
    Ok(with_total_count(
        TransactionsPayload {
            transactions: transactions.into_iter().map(TransactionView::from).collect(),
            height,
        },
        total,
    ))
}

#[derive(Deserialize)]
struct ByAttributesQuery {
    customer_id: String,
    key: String,
    value: String,
}

async fn transactions_by_attributes(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ByAttributesQuery>,
) -> Result<Response, ApiError> {
    let (transactions, height) = state
        .service
        .transactions_by_attributes(&params.customer_id, &params.key, &params.value)
        .await?;
    Ok(ApiResponse {
        data: TransactionsPayload {
            transactions: transactions.into_iter().map(TransactionView::from).collect(),
            height,
        },
    }
    .into_response())
}

#[derive(Deserialize)]
struct DumpQuery {
    #[serde(default = "default_limit")]
    limit: u64,
    #[serde(default)]
    offset: u64,
}

async fn dump_pending(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DumpQuery>,
) -> Result<Response, ApiError> {
    let (transactions, total) = state
        .service
        .dump_pending_broadcasts(params.limit, params.offset)
        .await?;
    Ok(with_total_count(
        transactions
            .into_iter()
            .map(TransactionView::from)
            .collect::<Vec<_>>(),
        total,
    ))
}

async fn dump_pinned(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DumpQuery>,
) -> Result<Response, ApiError> {
    let (transactions, total) = state
        .service
        .dump_pinned_transactions(params.limit, params.offset)
        .await?;
    Ok(with_total_count(
        transactions
            .into_iter()
            .map(TransactionView::from)
            .collect::<Vec<_>>(),
        total,
    ))
}
