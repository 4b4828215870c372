mod common;

use std::time::Duration;

use common::TestContext;
use dealer_inventory::{entities::stock_movement::MovementType, ServiceError};
use rust_decimal_macros::dec;
use sea_orm::TransactionTrait;
use uuid::Uuid;

/// The SQLite pool has one connection, so transactions are serialized by the
/// pool rather than by the product row lock. This checks the ledger invariant
/// under contention; `row_lock_blocks_second_writer_on_postgres` covers the lock.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_consumption_never_oversells() {
    let ctx = TestContext::new().await;
    let product = ctx.product("OIL-5W30", 10, dec!(6)).await;

    let mut tasks = vec![];
    for _ in 0..20 {
        let ledger = ctx.services.ledger.clone();
        let movement = ctx.movement(product.id, MovementType::Out, 1);
        tasks.push(tokio::spawn(async move { ledger.record_movement(movement).await }));
    }

    let mut success = 0;
    let mut insufficient = 0;
    for task in tasks {
        match task.await.expect("task panicked") {
            Ok(_) => success += 1,
            Err(ServiceError::InsufficientStock(_)) => insufficient += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(success, 10, "exactly 10 movements should succeed; got {}", success);
    assert_eq!(insufficient, 10);
    assert_eq!(ctx.services.get_current_stock(product.id).await.unwrap(), 0);

    let verification = ctx.services.ledger.verify_chain(product.id).await.unwrap();
    assert!(verification.is_intact());
    assert_eq!(verification.entries, 11);
    assert_eq!(verification.final_quantity, 0);
}

/// Serialized by the single SQLite connection, like the test above.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_approvals_post_once() {
    let ctx = TestContext::new().await;
    let product = ctx.product("COOLANT-1", 30, dec!(4)).await;
    let adjustment = ctx
        .services
        .post_adjustment(product.id, 25, "count", ctx.actor)
        .await
        .unwrap();

    let mut tasks = vec![];
    for _ in 0..5 {
        let services = ctx.services.clone();
        let approver = ctx.actor;
        tasks.push(tokio::spawn(async move {
            services.approve_adjustment(adjustment.id, approver).await
        }));
    }

    let mut approved = 0;
    let mut conflicts = 0;
    for task in tasks {
        match task.await.expect("task panicked") {
            Ok(_) => approved += 1,
            Err(ServiceError::Conflict(_)) => conflicts += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(approved, 1);
    assert_eq!(conflicts, 4);
    assert_eq!(ctx.services.get_current_stock(product.id).await.unwrap(), 25);
}

/// Runs only when `TEST_POSTGRES_URL` points at a scratch database.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn row_lock_blocks_second_writer_on_postgres() {
    let Ok(url) = std::env::var("TEST_POSTGRES_URL") else {
        return;
    };
    let ctx = TestContext::with_database_url(&url, 4).await;
    let code = format!("LOCK-{}", Uuid::new_v4().simple());
    let product = ctx.product(&code, 5, dec!(6)).await;

    let first = ctx.db.begin().await.unwrap();
    ctx.services
        .ledger
        .append(&first, ctx.movement(product.id, MovementType::Out, 1))
        .await
        .unwrap();

    let db = ctx.db.clone();
    let ledger = ctx.services.ledger.clone();
    let movement = ctx.movement(product.id, MovementType::Out, 1);
    let second = tokio::spawn(async move {
        let txn = db.begin().await?;
        let posting = ledger.append(&txn, movement).await?;
        txn.commit().await?;
        Ok::<_, ServiceError>(posting)
    });

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(
        !second.is_finished(),
        "second writer must wait on the product row lock"
    );

    first.commit().await.unwrap();
    let posting = second.await.expect("task panicked").unwrap();
    assert_eq!(posting.movement.quantity_before, 4);
    assert_eq!(posting.movement.quantity_after, 3);
    assert_eq!(posting.movement.sequence, 3);

    let verification = ctx.services.ledger.verify_chain(product.id).await.unwrap();
    assert!(verification.is_intact());
    assert_eq!(verification.entries, 3);
    assert_eq!(verification.final_quantity, 3);
    assert_eq!(ctx.services.get_current_stock(product.id).await.unwrap(), 3);
}
