use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::blockchain::broadcaster::Broadcaster;
use crate::db::trail::TrailStore;
use crate::db::transaction::TransactionStore;
use crate::models::{Status, Transaction};
use crate::tests::support::{broadcast_record, stores, MockChain, SubmitOutcome};

fn broadcaster(
    chain: Arc<MockChain>,
    transactions: TransactionStore,
    trails: TrailStore,
) -> Broadcaster {
    Broadcaster::new(chain, transactions, trails, 10, 100, 4)
}

async fn row(transactions: &TransactionStore, hash: &str) -> Transaction {
    transactions
        .transactions_by_hashes(&[hash.to_string()])
        .await
        .unwrap()
        .remove(0)
}

#[tokio::test]
async fn retryable_first_failure_goes_to_temporary_failure() {
    let (_, transactions, _, _, _, trails) = stores().await;
    let chain = Arc::new(MockChain::new());
    chain.set_tip(100, "Btip");
    chain.script_submit(SubmitOutcome::Retryable("mempool full"));

    transactions
        .broadcast(&broadcast_record("opone", "dead", 1))
        .await
        .unwrap();

    let broadcaster = broadcaster(chain.clone(), transactions.clone(), trails.clone());
    broadcaster.tick(&CancellationToken::new()).await.unwrap();

    let updated = row(&transactions, "opone").await;
    assert_eq!(updated.status, Status::Failure);
    assert_eq!(updated.broadcasted_at_block, Some(100));
    assert!(updated.message.unwrap().contains("mempool full"));
    assert_eq!(chain.submitted(), vec!["dead"]);

    let trail = trails.trails_for_hash("opone").await.unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].action, "broadcast");
    assert_eq!(trail[0].broadcast_status, "temporary_failure");
}

#[tokio::test]
async fn terminal_first_failure_goes_to_invalid_and_is_never_reselected() {
    let (_, transactions, _, _, _, trails) = stores().await;
    let chain = Arc::new(MockChain::new());
    chain.set_tip(100, "Btip");
    chain.script_submit(SubmitOutcome::Terminal("invalid signature"));

    transactions
        .broadcast(&broadcast_record("opone", "dead", 1))
        .await
        .unwrap();

    let broadcaster = broadcaster(chain.clone(), transactions.clone(), trails);
    broadcaster.tick(&CancellationToken::new()).await.unwrap();

    let updated = row(&transactions, "opone").await;
    assert_eq!(updated.status, Status::Invalid);
    assert_eq!(updated.broadcasted_at_block, Some(100));

    // A later tick must not pick the row up again: INVALID is outside
    // the eligibility set.
    chain.set_tip(200, "Btip2");
    broadcaster.tick(&CancellationToken::new()).await.unwrap();
    assert_eq!(chain.submitted().len(), 1);
    assert!(transactions
        .pending_broadcasts(190, 100)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn later_terminal_failures_stay_retryable() {
    let (_, transactions, _, _, _, trails) = stores().await;
    let chain = Arc::new(MockChain::new());
    chain.set_tip(100, "Btip");
    chain.script_submit(SubmitOutcome::Retryable("mempool full"));
    chain.script_submit(SubmitOutcome::Terminal("counter in the past"));
    chain.script_submit(SubmitOutcome::Ok);

    transactions
        .broadcast(&broadcast_record("opone", "dead", 1))
        .await
        .unwrap();

    let broadcaster = broadcaster(chain.clone(), transactions.clone(), trails.clone());

    // First attempt: retryable, so FAILURE rather than INVALID.
    broadcaster.tick(&CancellationToken::new()).await.unwrap();
    assert_eq!(row(&transactions, "opone").await.status, Status::Failure);

    // Second attempt: terminal error, but no longer the first attempt.
    chain.set_tip(115, "Btip2");
    broadcaster.tick(&CancellationToken::new()).await.unwrap();
    let after_second = row(&transactions, "opone").await;
    assert_eq!(after_second.status, Status::Failure);
    assert_eq!(after_second.broadcasted_at_block, Some(115));

    // Third attempt: accepted.
    chain.set_tip(130, "Btip3");
    broadcaster.tick(&CancellationToken::new()).await.unwrap();
    let after_third = row(&transactions, "opone").await;
    assert_eq!(after_third.status, Status::Pending);
    assert_eq!(after_third.message, None);

    assert_eq!(chain.submitted().len(), 3);
    assert_eq!(trails.trails_for_hash("opone").await.unwrap().len(), 3);
}

#[tokio::test]
async fn successful_submission_goes_to_pending() {
    let (_, transactions, _, _, _, trails) = stores().await;
    let chain = Arc::new(MockChain::new());
    chain.set_tip(100, "Btip");
    chain.script_submit(SubmitOutcome::Ok);

    transactions
        .broadcast(&broadcast_record("opone", "dead", 1))
        .await
        .unwrap();

    let broadcaster = broadcaster(chain.clone(), transactions.clone(), trails.clone());
    broadcaster.tick(&CancellationToken::new()).await.unwrap();

    let updated = row(&transactions, "opone").await;
    assert_eq!(updated.status, Status::Pending);
    assert_eq!(updated.message, None);
    assert_eq!(updated.broadcasted_at_block, Some(100));

    let trail = trails.trails_for_hash("opone").await.unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].broadcast_status, "pending");
}

#[tokio::test]
async fn missing_raw_transaction_is_invalid_without_a_submission() {
    let (pool, transactions, _, _, _, trails) = stores().await;
    let chain = Arc::new(MockChain::new());
    chain.set_tip(100, "Btip");

    // A broadcast row without rawtx cannot come in through the service;
    // seed it directly.
    sqlx::query(
        "INSERT INTO transactions (id, hash, idx, block_number, pinned, broadcasted, status, \
         timestamp, created_at, created_at_block, broadcasted_at_block) \
         VALUES ('rowid', 'opone', 0, -1, 0, 1, 0, 0, 0, 1, 0)",
    )
    .execute(&pool)
    .await
    .unwrap();

    let broadcaster = broadcaster(chain.clone(), transactions.clone(), trails.clone());
    broadcaster.tick(&CancellationToken::new()).await.unwrap();

    let updated = row(&transactions, "opone").await;
    assert_eq!(updated.status, Status::Invalid);
    assert_eq!(updated.message.as_deref(), Some("raw transaction is missing"));
    assert!(chain.submitted().is_empty());
    // No attempt was made, so no trail entry either.
    assert!(trails.trails_for_hash("opone").await.unwrap().is_empty());
}

#[tokio::test]
async fn one_row_failure_does_not_stop_the_others() {
    let (_, transactions, _, _, _, trails) = stores().await;
    let chain = Arc::new(MockChain::new());
    chain.set_tip(100, "Btip");
    chain.script_submit(SubmitOutcome::Terminal("invalid signature"));
    chain.script_submit(SubmitOutcome::Ok);

    transactions
        .broadcast(&broadcast_record("opone", "aa", 1))
        .await
        .unwrap();
    transactions
        .broadcast(&broadcast_record("opbeta", "bb", 1))
        .await
        .unwrap();

    // Workers race for the scripted outcomes; run single-worker so the
    // first selected row gets the terminal error deterministically.
    let broadcaster = Broadcaster::new(chain.clone(), transactions.clone(), trails, 10, 100, 1);
    broadcaster.tick(&CancellationToken::new()).await.unwrap();

    assert_eq!(chain.submitted().len(), 2);
    let statuses = [
        row(&transactions, "opone").await.status,
        row(&transactions, "opbeta").await.status,
    ];
    assert!(statuses.contains(&Status::Invalid));
    assert!(statuses.contains(&Status::Pending));
}

#[tokio::test]
async fn tip_below_broadcast_interval_skips_the_tick() {
    let (_, transactions, _, _, _, trails) = stores().await;
    let chain = Arc::new(MockChain::new());
    chain.set_tip(5, "Btip");

    transactions
        .broadcast(&broadcast_record("opone", "dead", 1))
        .await
        .unwrap();

    let broadcaster = broadcaster(chain.clone(), transactions.clone(), trails);
    broadcaster.tick(&CancellationToken::new()).await.unwrap();

    assert!(chain.submitted().is_empty());
    assert_eq!(row(&transactions, "opone").await.status, Status::New);
}

#[tokio::test]
async fn recently_attempted_rows_wait_out_the_interval() {
    let (_, transactions, _, _, _, trails) = stores().await;
    let chain = Arc::new(MockChain::new());
    chain.set_tip(100, "Btip");
    chain.script_submit(SubmitOutcome::Retryable("mempool full"));

    transactions
        .broadcast(&broadcast_record("opone", "dead", 1))
        .await
        .unwrap();

    let broadcaster = broadcaster(chain.clone(), transactions.clone(), trails);
    broadcaster.tick(&CancellationToken::new()).await.unwrap();
    assert_eq!(chain.submitted().len(), 1);

    // Tip moved only 5 blocks; the row was attempted at 100 and the
    // interval is 10, so nothing is eligible yet.
    chain.set_tip(105, "Btip2");
    broadcaster.tick(&CancellationToken::new()).await.unwrap();
    assert_eq!(chain.submitted().len(), 1);

    chain.set_tip(110, "Btip3");
    broadcaster.tick(&CancellationToken::new()).await.unwrap();
    assert_eq!(chain.submitted().len(), 2);
}
