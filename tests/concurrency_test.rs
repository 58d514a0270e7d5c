mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use common::each_store;
use futures::future::join_all;
use uuid::Uuid;
use wallet_ledger::LedgerError;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposite_transfers_do_not_deadlock() -> Result<()> {
    for (name, processor, _temp) in each_store(&[(1, 100000), (2, 100000)]).await? {
        let processor = Arc::new(processor);
        let tasks = (0..40).map(|i| {
            let processor = Arc::clone(&processor);
            tokio::spawn(async move {
                // Even tasks move 1 -> 2 (3.00), odd tasks move 2 -> 1 (1.00).
                if i % 2 == 0 {
                    processor.transfer_money(1, 2, 300, Uuid::new_v4()).await
                } else {
                    processor.transfer_money(2, 1, 100, Uuid::new_v4()).await
                }
            })
        });

        for outcome in join_all(tasks).await {
            outcome??;
        }

        assert_eq!(processor.balance(1).await?, 100000 - 20 * 300 + 20 * 100, "{name}");
        assert_eq!(processor.balance(2).await?, 100000 + 20 * 300 - 20 * 100, "{name}");
        // 40 transfers of two legs each, plus one funding row per user.
        assert_eq!(processor.store().list_transactions().await?.len(), 82, "{name}");
        assert!(processor.check_consistency().await?.is_consistent(), "{name}");
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicates_apply_once() -> Result<()> {
    for (name, processor, _temp) in each_store(&[(1, 0)]).await? {
        let processor = Arc::new(processor);
        let request_id = Uuid::new_v4();

        let tasks = (0..10).map(|_| {
            let processor = Arc::clone(&processor);
            tokio::spawn(async move { processor.add_money(1, 5000, request_id).await })
        });

        let mut applied = 0;
        for outcome in join_all(tasks).await {
            match outcome? {
                Ok(_) => applied += 1,
                Err(LedgerError::DuplicateRequest(id)) => assert_eq!(id, request_id),
                Err(other) => panic!("{name}: unexpected error {other}"),
            }
        }

        assert_eq!(applied, 1, "{name}");
        assert_eq!(processor.balance(1).await?, 5000, "{name}");
        assert_eq!(
            processor.store().transactions_for_request(request_id).await?.len(),
            1,
            "{name}"
        );
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_withdrawals_never_overdraw() -> Result<()> {
    for (name, processor, _temp) in each_store(&[(1, 1000)]).await? {
        let processor = Arc::new(processor);
        let tasks = (0..10).map(|_| {
            let processor = Arc::clone(&processor);
            tokio::spawn(async move { processor.add_money(1, -300, Uuid::new_v4()).await })
        });

        let mut applied = 0;
        for outcome in join_all(tasks).await {
            match outcome? {
                Ok(_) => applied += 1,
                Err(LedgerError::InsufficientFunds { .. }) => {}
                Err(other) => panic!("{name}: unexpected error {other}"),
            }
        }

        assert_eq!(applied, 3, "{name}");
        assert_eq!(processor.balance(1).await?, 100, "{name}");
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_see_half_applied_transfers() -> Result<()> {
    for (name, processor, _temp) in each_store(&[(1, 50000), (2, 50000), (3, 50000)]).await? {
        let processor = Arc::new(processor);
        let done = Arc::new(AtomicBool::new(false));

        let reader = {
            let processor = Arc::clone(&processor);
            let done = Arc::clone(&done);
            tokio::spawn(async move {
                let mut snapshots = 0;
                loop {
                    let finished = done.load(Ordering::Acquire);
                    let users = processor.list_users().await?;
                    let total: i64 = users.iter().map(|u| u.balance).sum();
                    assert_eq!(total, 150000, "snapshot {snapshots}: {users:?}");
                    snapshots += 1;
                    if finished {
                        break;
                    }
                    tokio::task::yield_now().await;
                }
                anyhow::Ok(snapshots)
            })
        };

        let tasks = (0..60).map(|i| {
            let processor = Arc::clone(&processor);
            tokio::spawn(async move {
                let from = i % 3 + 1;
                let to = (i + 1) % 3 + 1;
                processor.transfer_money(from, to, 700, Uuid::new_v4()).await
            })
        });
        for outcome in join_all(tasks).await {
            outcome??;
        }

        done.store(true, Ordering::Release);
        assert!(reader.await?? > 0, "{name}");
        assert!(processor.check_consistency().await?.is_consistent(), "{name}");
    }
    Ok(())
}
