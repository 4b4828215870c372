use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait,
    DatabaseConnection, DatabaseTransaction, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{
        product::{self, Entity as ProductEntity},
        stock_movement::{self, Entity as StockMovementEntity, MovementType},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Cached quantity compared against the ledger it is derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockReconciliation {
    pub product_id: Uuid,
    pub cached_quantity: i32,
    /// Signed sum of every movement
    pub ledger_quantity: i64,
    /// `quantity_after` of the newest movement, None for an empty ledger
    pub last_quantity_after: Option<i32>,
    pub movement_count: u64,
    pub repaired: bool,
}

impl StockReconciliation {
    pub fn drift(&self) -> i64 {
        i64::from(self.cached_quantity) - self.ledger_quantity
    }

    /// The newest entry ends where the signed sum of all entries does.
    pub fn tail_matches_ledger(&self) -> bool {
        self.last_quantity_after.map(i64::from).unwrap_or(0) == self.ledger_quantity
    }

    /// Cache, running total and newest entry all agree.
    pub fn is_consistent(&self) -> bool {
        self.drift() == 0 && self.tail_matches_ledger()
    }
}

/// Read side of a product's stock, plus drift detection and repair.
#[derive(Clone)]
pub struct ProductStockView {
    db: Arc<DatabaseConnection>,
    event_sender: Option<EventSender>,
}

impl ProductStockView {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Option<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Cached quantity; never recomputed on this path
    #[instrument(skip(self))]
    pub async fn get_quantity(&self, product_id: Uuid) -> Result<i32, ServiceError> {
        Ok(self.get_product(product_id).await?.stock_quantity)
    }

    pub async fn get_product(&self, product_id: Uuid) -> Result<product::Model, ServiceError> {
        ProductEntity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Product", product_id))
    }

    pub async fn find_by_code(&self, code: &str) -> Result<product::Model, ServiceError> {
        ProductEntity::find()
            .filter(product::Column::Code.eq(code))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Product", code))
    }

    /// Compares the cache with the ledger without changing anything.
    #[instrument(skip(self))]
    pub async fn check(&self, product_id: Uuid) -> Result<StockReconciliation, ServiceError> {
        let product = self.get_product(product_id).await?;
        compare_with_ledger(&*self.db, &product).await
    }

    /// Recomputes the cached quantity from the ledger and rewrites it if it
    /// drifted. Holds the product lock so no posting interleaves.
    ///
    /// A ledger whose newest entry disagrees with its own running total is a
    /// broken chain, not drift: it is reported as a conflict and left for
    /// `StockLedger::verify_chain` to locate.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, product_id: Uuid) -> Result<StockReconciliation, ServiceError> {
        let txn = self.db.begin().await?;

        let product = lock_product(&txn, product_id).await?;
        let mut report = compare_with_ledger(&txn, &product).await?;

        if !report.tail_matches_ledger() {
            counter!("inventory.reconcile.broken_chain", 1);
            return Err(ServiceError::Conflict(format!(
                "Ledger for product {} is broken: newest entry ends at {} but movements sum to {}; run verify_chain",
                product_id,
                report.last_quantity_after.unwrap_or(0),
                report.ledger_quantity
            )));
        }

        if report.drift() != 0 {
            let repaired_quantity = i32::try_from(report.ledger_quantity).map_err(|_| {
                ServiceError::InternalError(format!(
                    "Ledger total {} for product {} does not fit a stock quantity",
                    report.ledger_quantity, product_id
                ))
            })?;

            store_quantity(&txn, product, repaired_quantity, Utc::now()).await?;
            report.repaired = true;
        }

        txn.commit().await?;

        if report.repaired {
            counter!("inventory.reconcile.drift", 1);
            warn!(
                %product_id,
                cached = report.cached_quantity,
                ledger = report.ledger_quantity,
                "Repaired stock drift"
            );

            if let Some(sender) = &self.event_sender {
                sender
                    .send_or_log(Event::StockDriftRepaired {
                        product_id,
                        cached_quantity: report.cached_quantity,
                        ledger_quantity: report.ledger_quantity,
                        repaired_at: Utc::now(),
                    })
                    .await;
            }
        }

        Ok(report)
    }

    /// Checks, or repairs when `repair` is set, every product.
    #[instrument(skip(self))]
    pub async fn reconcile_all(
        &self,
        repair: bool,
    ) -> Result<Vec<StockReconciliation>, ServiceError> {
        let product_ids: Vec<Uuid> = ProductEntity::find()
            .select_only()
            .column(product::Column::Id)
            .order_by_asc(product::Column::Code)
            .into_tuple()
            .all(&*self.db)
            .await?;

        let mut reports = Vec::with_capacity(product_ids.len());
        for product_id in product_ids {
            let report = if repair {
                match self.reconcile(product_id).await {
                    Ok(report) => report,
                    Err(ServiceError::Conflict(reason)) => {
                        warn!(%product_id, %reason, "Skipping repair of broken ledger");
                        self.check(product_id).await?
                    }
                    Err(e) => return Err(e),
                }
            } else {
                self.check(product_id).await?
            };
            reports.push(report);
        }

        let drifted = reports.iter().filter(|r| !r.is_consistent()).count();
        info!(
            products = reports.len(),
            drifted, repair, "Stock reconciliation finished"
        );

        Ok(reports)
    }

    /// Products at or below their minimum stock level.
    pub async fn below_minimum(&self) -> Result<Vec<product::Model>, ServiceError> {
        Ok(ProductEntity::find()
            .filter(Expr::col(product::Column::StockQuantity).lte(Expr::col(product::Column::MinStock)))
            .order_by_asc(product::Column::Code)
            .all(&*self.db)
            .await?)
    }
}

/// Takes the row lock that serialises every quantity change on a product.
pub(crate) async fn lock_product(
    txn: &DatabaseTransaction,
    product_id: Uuid,
) -> Result<product::Model, ServiceError> {
    ProductEntity::find_by_id(product_id)
        .lock_exclusive()
        .one(txn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Product", product_id))
}

/// Writes the cached quantity. Callers hold the product lock and write the
/// matching ledger entry in the same transaction.
pub(crate) async fn store_quantity(
    txn: &DatabaseTransaction,
    product: product::Model,
    quantity: i32,
    now: DateTime<Utc>,
) -> Result<product::Model, ServiceError> {
    let mut active: product::ActiveModel = product.into();
    active.stock_quantity = Set(quantity);
    active.updated_at = Set(now);
    Ok(active.update(txn).await?)
}

async fn compare_with_ledger<C: ConnectionTrait>(
    conn: &C,
    product: &product::Model,
) -> Result<StockReconciliation, ServiceError> {
    let totals: Vec<(MovementType, Option<i64>)> = StockMovementEntity::find()
        .select_only()
        .column(stock_movement::Column::MovementType)
        .column_as(Expr::col(stock_movement::Column::QuantityMoved).sum(), "total")
        .filter(stock_movement::Column::ProductId.eq(product.id))
        .group_by(stock_movement::Column::MovementType)
        .into_tuple()
        .all(conn)
        .await?;

    let ledger_quantity = totals
        .into_iter()
        .map(|(movement_type, total)| match movement_type {
            MovementType::In => total.unwrap_or(0),
            MovementType::Out => -total.unwrap_or(0),
        })
        .sum();

    let movement_count = StockMovementEntity::find()
        .filter(stock_movement::Column::ProductId.eq(product.id))
        .count(conn)
        .await?;

    let last_quantity_after = StockMovementEntity::find()
        .filter(stock_movement::Column::ProductId.eq(product.id))
        .order_by_desc(stock_movement::Column::Sequence)
        .one(conn)
        .await?
        .map(|movement| movement.quantity_after);

    Ok(StockReconciliation {
        product_id: product.id,
        cached_quantity: product.stock_quantity,
        ledger_quantity,
        last_quantity_after,
        movement_count,
        repaired: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(cached: i32, ledger: i64, last: Option<i32>) -> StockReconciliation {
        StockReconciliation {
            product_id: Uuid::nil(),
            cached_quantity: cached,
            ledger_quantity: ledger,
            last_quantity_after: last,
            movement_count: 0,
            repaired: false,
        }
    }

    #[test]
    fn empty_ledger_with_zero_cache_is_consistent() {
        assert!(report(0, 0, None).is_consistent());
    }

    #[test]
    fn cache_ahead_of_ledger_is_drift() {
        let r = report(55, 50, Some(50));
        assert_eq!(r.drift(), 5);
        assert!(!r.is_consistent());
    }

    #[test]
    fn broken_tail_is_inconsistent_even_without_drift() {
        assert!(!report(50, 50, Some(48)).is_consistent());
    }
}
