
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fixtures::*;
use txtrack_core::transaction::{TransactionRecord, TransactionStatus};
use txtrack_executors::eoa::NonceManagerError;

const LOCK_WAIT: Duration = Duration::from_millis(100);

#[tokio::test]
async fn next_nonce_fills_continuous_pending_run() {
    let harness = Harness::new(10);
    harness.chain.set_block_number(100);
    harness.chain.set_transaction_count(ALICE, 5);
    for nonce in [5, 6, 8] {
        harness
            .store
            .insert(submitted_tx(&format!("tx-{nonce}"), ALICE, nonce))
            .unwrap();
    }

    let lock = harness.nonce_manager.get_nonce_lock(ALICE).await.unwrap();

    assert_eq!(lock.next_nonce, 7);
    assert_eq!(lock.details.network.nonce, 5);
    assert_eq!(lock.details.network.block_number, 100);
    assert_eq!(lock.details.local.start_point, 5);
    assert_eq!(lock.details.local.nonce, 7);
    lock.release();
}

#[tokio::test]
async fn next_nonce_is_chain_count_without_pending() {
    let harness = Harness::new(10);
    harness.chain.set_transaction_count(ALICE, 5);

    let lock = harness.nonce_manager.get_nonce_lock(ALICE).await.unwrap();
    assert_eq!(lock.next_nonce, 5);
}

#[tokio::test]
async fn other_senders_do_not_affect_nonce() {
    let harness = Harness::new(10);
    harness.chain.set_transaction_count(ALICE, 2);
    harness.store.insert(submitted_tx("bob-2", BOB, 2)).unwrap();

    let lock = harness.nonce_manager.get_nonce_lock(ALICE).await.unwrap();
    assert_eq!(lock.next_nonce, 2);
}

#[tokio::test]
async fn local_confirmations_ahead_of_chain_are_respected() {
    let harness = Harness::new(10);
    harness.chain.set_transaction_count(ALICE, 3);
    harness
        .store
        .insert(
            TransactionRecord::new("confirmed-4", ALICE, 4, NETWORK)
                .with_status(TransactionStatus::Confirmed),
        )
        .unwrap();
    harness
        .store
        .insert(
            TransactionRecord::new("elsewhere-9", ALICE, 9, "5")
                .with_status(TransactionStatus::Confirmed),
        )
        .unwrap();
    harness.store.insert(submitted_tx("tx-5", ALICE, 5)).unwrap();

    let lock = harness.nonce_manager.get_nonce_lock(ALICE).await.unwrap();

    assert_eq!(lock.details.params.highest_locally_confirmed, 5);
    assert_eq!(lock.details.params.highest_suggested, 5);
    assert_eq!(lock.details.params.next_network_nonce, 3);
    assert_eq!(lock.next_nonce, 6);
}

#[tokio::test]
async fn next_nonce_never_below_chain_count() {
    let harness = Harness::new(10);
    harness.chain.set_transaction_count(ALICE, 20);
    harness.store.insert(submitted_tx("stale", ALICE, 3)).unwrap();

    let lock = harness.nonce_manager.get_nonce_lock(ALICE).await.unwrap();
    assert!(lock.next_nonce >= 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn same_sender_waits_for_release() {
    let harness = Harness::new(10);
    harness.chain.set_transaction_count(ALICE, 0);

    let first = harness.nonce_manager.get_nonce_lock(ALICE).await.unwrap();
    assert_eq!(first.next_nonce, 0);

    let blocked =
        tokio::time::timeout(LOCK_WAIT, harness.nonce_manager.get_nonce_lock(ALICE)).await;
    assert!(blocked.is_err(), "second caller must wait for the first");

    // The caller records its broadcast before releasing.
    harness.store.insert(submitted_tx("tx-0", ALICE, 0)).unwrap();
    first.release();

    let second = harness.nonce_manager.get_nonce_lock(ALICE).await.unwrap();
    assert_eq!(second.next_nonce, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn different_senders_proceed_in_parallel() {
    let harness = Harness::new(10);
    harness.chain.set_transaction_count(ALICE, 1);
    harness.chain.set_transaction_count(BOB, 7);

    let alice = harness.nonce_manager.get_nonce_lock(ALICE).await.unwrap();
    let bob = tokio::time::timeout(LOCK_WAIT, harness.nonce_manager.get_nonce_lock(BOB))
        .await
        .expect("other sender must not be blocked")
        .unwrap();

    assert_eq!(alice.next_nonce, 1);
    assert_eq!(bob.next_nonce, 7);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn global_lock_waits_for_sender_locks() {
    let harness = Harness::new(10);

    let alice = harness.nonce_manager.get_nonce_lock(ALICE).await.unwrap();
    let blocked = tokio::time::timeout(LOCK_WAIT, harness.nonce_manager.get_global_lock()).await;
    assert!(blocked.is_err(), "global lock must wait for outstanding sender locks");

    alice.release();
    let global = tokio::time::timeout(LOCK_WAIT, harness.nonce_manager.get_global_lock())
        .await
        .expect("global lock should be granted once sender locks are released");
    global.release();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sender_locks_wait_for_global_lock() {
    let harness = Harness::new(10);

    let global = harness.nonce_manager.get_global_lock().await;
    let blocked =
        tokio::time::timeout(LOCK_WAIT, harness.nonce_manager.get_nonce_lock(BOB)).await;
    assert!(blocked.is_err(), "sender lock must wait for the global lock");

    global.release();
    let bob = tokio::time::timeout(LOCK_WAIT, harness.nonce_manager.get_nonce_lock(BOB))
        .await
        .expect("sender lock should be granted once the global lock is released");
    assert!(bob.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn snapshot_failure_releases_lock() {
    let harness = Harness::new(10);
    harness
        .chain
        .fail_snapshots(Some(rpc_error("upstream unavailable")));

    let result = harness.nonce_manager.get_nonce_lock(ALICE).await;
    assert!(matches!(
        result,
        Err(NonceManagerError::ChainQuery { address, .. }) if address == ALICE
    ));

    harness.chain.fail_snapshots(None);
    harness.chain.set_transaction_count(ALICE, 4);
    let lock = tokio::time::timeout(LOCK_WAIT, harness.nonce_manager.get_nonce_lock(ALICE))
        .await
        .expect("failed allocation must not keep the sender locked")
        .unwrap();
    assert_eq!(lock.next_nonce, 4);

    let global = tokio::time::timeout(LOCK_WAIT, harness.nonce_manager.get_global_lock()).await;
    assert!(global.is_err(), "held sender lock still blocks the global lock");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn allocation_waits_for_whole_reconciliation_pass() {
    let harness = Harness::new(10);
    harness.store.insert(submitted_tx("tx-1", ALICE, 1)).unwrap();
    harness.chain.set_transaction_count(ALICE, 1);
    harness.chain.hold_lookups();

    let tracker = harness.tracker.clone();
    let pass = tokio::spawn(async move { tracker.update_pending_transactions().await });

    // The pass holds the global lock once its lookup is in flight.
    tokio::time::timeout(Duration::from_secs(2), async {
        while harness.chain.call_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("reconciliation pass should start its lookup");

    let blocked =
        tokio::time::timeout(LOCK_WAIT, harness.nonce_manager.get_nonce_lock(BOB)).await;
    assert!(blocked.is_err(), "allocation must wait while a pass is running");

    harness.chain.open_lookups();
    pass.await.unwrap().unwrap();

    let lock = tokio::time::timeout(LOCK_WAIT, harness.nonce_manager.get_nonce_lock(ALICE))
        .await
        .expect("allocation proceeds once the pass ends")
        .unwrap();
    assert_eq!(lock.next_nonce, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_sender_waiters_are_served_in_arrival_order() {
    let harness = Harness::new(10);
    let order = Arc::new(Mutex::new(Vec::new()));

    let first = harness.nonce_manager.get_nonce_lock(ALICE).await.unwrap();

    let mut waiters = Vec::new();
    for label in ["a", "b", "c"] {
        let nonce_manager = harness.nonce_manager.clone();
        let order = order.clone();
        waiters.push(tokio::spawn(async move {
            let lock = nonce_manager.get_nonce_lock(ALICE).await.unwrap();
            order.lock().unwrap().push(label);
            lock.release();
        }));
        // Let this waiter queue on the sender lock before the next one arrives.
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    assert!(order.lock().unwrap().is_empty());
    first.release();

    for waiter in waiters {
        waiter.await.unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
}
