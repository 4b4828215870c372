use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{
        goods_receipt::ReceiptStatus,
        purchase_order::Entity as PurchaseOrderEntity,
        purchase_order_line::{self, Entity as PurchaseOrderLineEntity, LineStatus},
    },
    errors::ServiceError,
};

/// Quantities of an order line after accepting a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineQuantities {
    pub received: i32,
    pub pending: i32,
    pub status: LineStatus,
}

impl LineQuantities {
    /// Adds `accepted` to what `ordered`/`received` already record.
    ///
    /// Negative deltas and deliveries beyond the ordered quantity are
    /// rejected, so a received line never goes back to partial.
    pub fn after_receiving(
        ordered: i32,
        received: i32,
        accepted: i32,
    ) -> Result<Self, ServiceError> {
        if accepted < 0 {
            return Err(ServiceError::ValidationError(format!(
                "Accepted quantity must not be negative, got {}",
                accepted
            )));
        }

        let received = received
            .checked_add(accepted)
            .filter(|total| *total <= ordered)
            .ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "Accepting {} would exceed the ordered quantity {} (already received {})",
                    accepted, ordered, received
                ))
            })?;

        Ok(Self {
            received,
            pending: ordered - received,
            status: LineStatus::from_quantities(ordered, received),
        })
    }
}

/// Tracks ordered, received and pending quantities of purchase-order lines.
#[derive(Clone)]
pub struct PurchaseOrderLineReconciler {
    db: Arc<DatabaseConnection>,
}

impl PurchaseOrderLineReconciler {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Adds `accepted_delta` to the line's received quantity inside `txn`.
    ///
    /// Not idempotent: every call counts again. The goods receipt that calls
    /// this runs it exactly once per receipt line in the same transaction.
    #[instrument(skip(self, txn))]
    pub async fn update_quantity_received(
        &self,
        txn: &DatabaseTransaction,
        line_id: Uuid,
        accepted_delta: i32,
    ) -> Result<purchase_order_line::Model, ServiceError> {
        let line = PurchaseOrderLineEntity::find_by_id(line_id)
            .lock_exclusive()
            .one(txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Purchase order line", line_id))?;

        let quantities = LineQuantities::after_receiving(
            line.quantity_ordered,
            line.quantity_received,
            accepted_delta,
        )
        .map_err(|e| {
            warn!(
                ordered = line.quantity_ordered,
                received = line.quantity_received,
                "Rejected order line update: {}",
                e
            );
            e
        })?;

        let now = Utc::now();
        let stamp_received_date = line.received_date.is_none() && accepted_delta > 0;
        let previous_status = line.line_status;

        let mut active: purchase_order_line::ActiveModel = line.into();
        active.quantity_received = Set(quantities.received);
        active.quantity_pending = Set(quantities.pending);
        active.line_status = Set(quantities.status);
        if stamp_received_date {
            active.received_date = Set(Some(now));
        }
        active.updated_at = Set(now);

        let updated = active.update(txn).await?;

        if previous_status != updated.line_status {
            info!(
                from = %previous_status,
                to = %updated.line_status,
                "Order line status changed"
            );
        }

        Ok(updated)
    }

    pub async fn get_line(&self, line_id: Uuid) -> Result<purchase_order_line::Model, ServiceError> {
        PurchaseOrderLineEntity::find_by_id(line_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Purchase order line", line_id))
    }

    /// Lines of an order that still expect goods.
    #[instrument(skip(self))]
    pub async fn pending_lines(
        &self,
        purchase_order_id: Uuid,
    ) -> Result<Vec<purchase_order_line::Model>, ServiceError> {
        self.ensure_order(purchase_order_id).await?;

        Ok(PurchaseOrderLineEntity::find()
            .filter(purchase_order_line::Column::PurchaseOrderId.eq(purchase_order_id))
            .filter(purchase_order_line::Column::LineStatus.ne(LineStatus::Received))
            .order_by_asc(purchase_order_line::Column::CreatedAt)
            .order_by_asc(purchase_order_line::Column::Id)
            .all(&*self.db)
            .await?)
    }

    pub async fn receipt_status(&self, purchase_order_id: Uuid) -> Result<ReceiptStatus, ServiceError> {
        self.ensure_order(purchase_order_id).await?;
        receipt_status_for_order(&*self.db, purchase_order_id).await
    }

    async fn ensure_order(&self, purchase_order_id: Uuid) -> Result<(), ServiceError> {
        PurchaseOrderEntity::find_by_id(purchase_order_id)
            .one(&*self.db)
            .await?
            .map(|_| ())
            .ok_or_else(|| ServiceError::not_found("Purchase order", purchase_order_id))
    }
}

pub(crate) async fn lines_for_order<C: ConnectionTrait>(
    conn: &C,
    purchase_order_id: Uuid,
) -> Result<Vec<purchase_order_line::Model>, ServiceError> {
    Ok(PurchaseOrderLineEntity::find()
        .filter(purchase_order_line::Column::PurchaseOrderId.eq(purchase_order_id))
        .order_by_asc(purchase_order_line::Column::CreatedAt)
        .order_by_asc(purchase_order_line::Column::Id)
        .all(conn)
        .await?)
}

/// Partial while any line of the order is open, Completed once all are received.
pub(crate) async fn receipt_status_for_order<C: ConnectionTrait>(
    conn: &C,
    purchase_order_id: Uuid,
) -> Result<ReceiptStatus, ServiceError> {
    let lines = lines_for_order(conn, purchase_order_id).await?;
    Ok(ReceiptStatus::from_line_statuses(
        lines.iter().map(|line| line.line_status),
    ))
}
