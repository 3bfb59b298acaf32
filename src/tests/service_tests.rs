use std::sync::Arc;

use crate::db::transaction::TransactionStore;
use crate::service::{ServiceError, TezosService};
use crate::tests::support::{broadcast_record, stores, MockChain};

async fn service() -> (TezosService, TransactionStore) {
    let (_, transactions, blocks, addresses, attributes, trails) = stores().await;
    let chain = Arc::new(MockChain::new());
    let service = TezosService::new(
        chain,
        transactions.clone(),
        blocks,
        addresses,
        attributes,
        trails,
        0,
    );
    (service, transactions)
}

#[tokio::test]
async fn dump_limits_are_validated_before_the_store_runs() {
    let (service, transactions) = service().await;

    for hash in ["opa", "opb", "opc"] {
        transactions
            .broadcast(&broadcast_record(hash, "cafe", 1))
            .await
            .unwrap();
    }

    // Out-of-range limits are rejected up front. u64::MAX matters: bound
    // as i64 it would wrap negative, which SQLite reads as "no limit".
    for limit in [0, 200, u64::MAX] {
        assert!(matches!(
            service.dump_pending_broadcasts(limit, 0).await,
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            service.dump_pinned_transactions(limit, 0).await,
            Err(ServiceError::Validation(_))
        ));
    }

    // An in-range limit still pages as before.
    let (page, total) = service.dump_pending_broadcasts(2, 0).await.unwrap();
    assert_eq!(total, 3);
    assert_eq!(page.len(), 2);

    let (page, total) = service.dump_pinned_transactions(199, 0).await.unwrap();
    assert_eq!(total, 0);
    assert!(page.is_empty());
}
