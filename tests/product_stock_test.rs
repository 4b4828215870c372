mod common;

use assert_matches::assert_matches;
use common::TestContext;
use dealer_inventory::{
    entities::{
        product,
        stock_movement::{self, MovementType},
    },
    events::Event,
    services::stock_ledger::ChainBreak,
    ServiceError,
};
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

/// Writes the cached quantity behind the ledger's back.
async fn corrupt_cache(ctx: &TestContext, product: product::Model, quantity: i32) {
    let mut active: product::ActiveModel = product.into();
    active.stock_quantity = Set(quantity);
    active.update(&*ctx.db).await.expect("corrupt cache");
}

#[tokio::test]
async fn check_reports_consistent_product() {
    let ctx = TestContext::new().await;
    let product = ctx.product("CLUTCH-01", 14, dec!(85)).await;

    let report = ctx.services.stock.check(product.id).await.unwrap();
    assert!(report.is_consistent());
    assert_eq!(report.cached_quantity, 14);
    assert_eq!(report.ledger_quantity, 14);
    assert_eq!(report.last_quantity_after, Some(14));
    assert_eq!(report.movement_count, 1);
    assert!(!report.repaired);
}

#[tokio::test]
async fn drift_blocks_postings_until_reconciled() {
    let mut ctx = TestContext::new().await;
    let product = ctx.product("CLUTCH-02", 10, dec!(85)).await;
    let product = ctx.services.stock.get_product(product.id).await.unwrap();
    corrupt_cache(&ctx, product.clone(), 17).await;

    let report = ctx.services.stock.check(product.id).await.unwrap();
    assert_eq!(report.drift(), 7);
    assert!(!report.is_consistent());

    let blocked = ctx
        .services
        .ledger
        .record_movement(ctx.movement(product.id, MovementType::In, 1))
        .await;
    assert_matches!(blocked, Err(ServiceError::Conflict(_)));
    ctx.drain_events();

    let repaired = ctx.services.stock.reconcile(product.id).await.unwrap();
    assert!(repaired.repaired);
    assert_eq!(repaired.cached_quantity, 17);
    assert_eq!(repaired.ledger_quantity, 10);
    assert_eq!(ctx.services.get_current_stock(product.id).await.unwrap(), 10);
    assert_matches!(
        ctx.drain_events().as_slice(),
        [Event::StockDriftRepaired { cached_quantity: 17, ledger_quantity: 10, .. }]
    );

    ctx.receive(product.id, 1).await;
    assert_eq!(ctx.services.get_current_stock(product.id).await.unwrap(), 11);
}

#[tokio::test]
async fn reconcile_without_drift_changes_nothing() {
    let mut ctx = TestContext::new().await;
    let product = ctx.product("CLUTCH-03", 5, dec!(85)).await;
    ctx.drain_events();

    let report = ctx.services.stock.reconcile(product.id).await.unwrap();
    assert!(report.is_consistent());
    assert!(!report.repaired);
    assert!(ctx.drain_events().is_empty());
}

#[tokio::test]
async fn reconcile_all_checks_or_repairs_every_product() {
    let ctx = TestContext::new().await;
    let a = ctx.product("A-100", 3, dec!(1)).await;
    let b = ctx.product("B-200", 4, dec!(1)).await;
    let b = ctx.services.stock.get_product(b.id).await.unwrap();
    corrupt_cache(&ctx, b.clone(), 0).await;

    let checked = ctx.services.stock.reconcile_all(false).await.unwrap();
    assert_eq!(checked.len(), 2);
    assert_eq!(checked[0].product_id, a.id);
    assert!(checked[0].is_consistent());
    assert_eq!(checked[1].drift(), -4);
    assert_eq!(ctx.services.get_current_stock(b.id).await.unwrap(), 0);

    let repaired = ctx.services.stock.reconcile_all(true).await.unwrap();
    assert!(repaired[1].repaired);
    assert_eq!(ctx.services.get_current_stock(b.id).await.unwrap(), 4);
}

/// Rewrites `quantity_after` of a product's only movement.
async fn corrupt_tail(ctx: &TestContext, product_id: Uuid, quantity_after: i32) {
    let movement = stock_movement::Entity::find()
        .filter(stock_movement::Column::ProductId.eq(product_id))
        .one(&*ctx.db)
        .await
        .unwrap()
        .expect("opening movement");
    let mut active: stock_movement::ActiveModel = movement.into();
    active.quantity_after = Set(quantity_after);
    active.update(&*ctx.db).await.expect("corrupt tail");
}

#[tokio::test]
async fn broken_tail_is_a_conflict_not_drift() {
    let mut ctx = TestContext::new().await;
    let product = ctx.product("GASKET-9", 10, dec!(3)).await;
    corrupt_tail(&ctx, product.id, 7).await;
    ctx.drain_events();

    let report = ctx.services.stock.check(product.id).await.unwrap();
    assert_eq!(report.drift(), 0);
    assert!(!report.tail_matches_ledger());
    assert!(!report.is_consistent());

    assert_matches!(
        ctx.services.stock.reconcile(product.id).await,
        Err(ServiceError::Conflict(_))
    );
    assert_eq!(ctx.services.get_current_stock(product.id).await.unwrap(), 10);
    assert!(ctx.drain_events().is_empty());

    let verification = ctx.services.ledger.verify_chain(product.id).await.unwrap();
    assert_eq!(
        verification.first_break,
        Some(ChainBreak::InconsistentEntry { sequence: 1 })
    );

    assert_matches!(
        ctx.services
            .ledger
            .record_movement(ctx.movement(product.id, MovementType::In, 1))
            .await,
        Err(ServiceError::Conflict(_))
    );
}

#[tokio::test]
async fn reconcile_all_reports_broken_chain_and_repairs_the_rest() {
    let ctx = TestContext::new().await;
    let broken = ctx.product("HOSE-1", 6, dec!(2)).await;
    let drifted = ctx.product("HOSE-2", 4, dec!(2)).await;
    corrupt_tail(&ctx, broken.id, 5).await;
    let drifted = ctx.services.stock.get_product(drifted.id).await.unwrap();
    corrupt_cache(&ctx, drifted.clone(), 9).await;

    let reports = ctx.services.stock.reconcile_all(true).await.unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].product_id, broken.id);
    assert!(!reports[0].repaired);
    assert!(!reports[0].is_consistent());
    assert!(reports[1].repaired);
    assert_eq!(ctx.services.get_current_stock(drifted.id).await.unwrap(), 4);
}

#[tokio::test]
async fn below_minimum_lists_low_products() {
    let ctx = TestContext::new().await;
    let low = ctx.product("LOW-1", 2, dec!(1)).await;
    let ok = ctx.product("OK-1", 9, dec!(1)).await;

    for (product, min_stock) in [(low.clone(), 5), (ok, 5)] {
        let product = ctx.services.stock.get_product(product.id).await.unwrap();
        let mut active: product::ActiveModel = product.into();
        active.min_stock = Set(min_stock);
        active.update(&*ctx.db).await.unwrap();
    }

    let below = ctx.services.stock.below_minimum().await.unwrap();
    assert_eq!(below.iter().map(|p| p.id).collect::<Vec<_>>(), vec![low.id]);
}

#[tokio::test]
async fn products_resolve_by_code() {
    let ctx = TestContext::new().await;
    let product = ctx.product("SEAL-77", 0, dec!(2)).await;

    assert_eq!(ctx.services.stock.find_by_code("SEAL-77").await.unwrap().id, product.id);
    assert_matches!(
        ctx.services.stock.find_by_code("NOPE").await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        ctx.services.get_current_stock(Uuid::new_v4()).await,
        Err(ServiceError::NotFound(_))
    );
}
