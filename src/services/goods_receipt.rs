use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    entities::{
        goods_receipt::{self, Entity as GoodsReceiptEntity, ReceiptStatus},
        goods_receipt_line::{self, Entity as GoodsReceiptLineEntity},
        purchase_order::{self, Entity as PurchaseOrderEntity, PurchaseOrderStatus},
        purchase_order_line,
        stock_movement::{MovementType, ReferenceType},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        numbering::next_document_number,
        publish,
        purchase_order_lines::{lines_for_order, PurchaseOrderLineReconciler},
        stock_ledger::{NewMovement, StockLedger},
        valuation::{add_value, extended_value, fits_amount, MAX_AMOUNT},
        ServiceSettings,
    },
};

/// One delivered product on a goods receipt.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_line_quantities"))]
pub struct ReceiptLineInput {
    pub product_id: Uuid,
    /// Resolved from the product when omitted
    pub purchase_order_line_id: Option<Uuid>,
    #[validate(range(min = 0))]
    pub quantity_accepted: i32,
    #[validate(range(min = 0))]
    pub quantity_rejected: i32,
    #[validate(custom = "validate_unit_cost")]
    pub unit_cost: Decimal,
    #[validate(length(max = 500))]
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateGoodsReceipt {
    pub purchase_order_id: Uuid,
    #[validate(length(min = 1, message = "A goods receipt needs at least one line"))]
    #[validate]
    pub lines: Vec<ReceiptLineInput>,
    pub received_by: Uuid,
    /// Defaults to now
    pub receipt_date: Option<DateTime<Utc>>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

fn validate_line_quantities(line: &ReceiptLineInput) -> Result<(), ValidationError> {
    if line.quantity_accepted.saturating_add(line.quantity_rejected) == 0 {
        let mut err = ValidationError::new("empty_line");
        err.message = Some("A receipt line must accept or reject at least one unit".into());
        return Err(err);
    }
    Ok(())
}

fn validate_unit_cost(cost: &Decimal) -> Result<(), ValidationError> {
    if cost.is_sign_negative() {
        let mut err = ValidationError::new("unit_cost");
        err.message = Some("Unit cost must not be negative".into());
        return Err(err);
    }
    if !fits_amount(*cost) {
        let mut err = ValidationError::new("unit_cost");
        err.message = Some(format!("Unit cost must not exceed {}", MAX_AMOUNT).into());
        return Err(err);
    }
    Ok(())
}

/// A goods receipt header with its lines.
#[derive(Debug, Clone, Serialize)]
pub struct GoodsReceipt {
    pub header: goods_receipt::Model,
    pub lines: Vec<goods_receipt_line::Model>,
}

/// Books physical deliveries against purchase orders.
#[derive(Clone)]
pub struct GoodsReceiptProcessor {
    db: Arc<DatabaseConnection>,
    ledger: StockLedger,
    order_lines: PurchaseOrderLineReconciler,
    event_sender: Option<EventSender>,
    settings: ServiceSettings,
}

impl GoodsReceiptProcessor {
    pub fn new(
        db: Arc<DatabaseConnection>,
        ledger: StockLedger,
        order_lines: PurchaseOrderLineReconciler,
        event_sender: Option<EventSender>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            db,
            ledger,
            order_lines,
            event_sender,
            settings,
        }
    }

    /// Creates a receipt, posts accepted quantities to the ledger and advances
    /// the order lines, all in one transaction.
    ///
    /// Any failing line rolls back every line before it.
    #[instrument(
        skip(self, request),
        fields(purchase_order_id = %request.purchase_order_id, lines = request.lines.len())
    )]
    pub async fn create_receipt(
        &self,
        request: CreateGoodsReceipt,
    ) -> Result<GoodsReceipt, ServiceError> {
        request.validate()?;
        let started = Instant::now();

        let txn = self.db.begin().await?;

        // Serialises receipts against the same order
        let order = PurchaseOrderEntity::find_by_id(request.purchase_order_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Purchase order", request.purchase_order_id))?;

        if !order.status.accepts_receipts() {
            warn!(status = %order.status, "Rejected receipt for order in wrong state");
            return Err(ServiceError::InvalidOperation(format!(
                "Purchase order {} is {} and cannot receive goods",
                order.po_number, order.status
            )));
        }

        let now = Utc::now();
        let receipt_date = request.receipt_date.unwrap_or(now);
        let receipt_number = next_document_number::<GoodsReceiptEntity, _>(
            &txn,
            goods_receipt::Column::ReceiptNumber,
            &self.settings.receipt_number_prefix,
            receipt_date.date_naive(),
        )
        .await?;

        let header = goods_receipt::ActiveModel {
            id: Set(Uuid::new_v4()),
            receipt_number: Set(receipt_number.clone()),
            purchase_order_id: Set(order.id),
            receipt_date: Set(receipt_date),
            status: Set(ReceiptStatus::Partial),
            total_received_value: Set(Decimal::ZERO),
            received_by: Set(request.received_by),
            notes: Set(request.notes.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let order_lines = lines_for_order(&txn, order.id).await?;
        let mut remaining: HashMap<Uuid, i32> = order_lines
            .iter()
            .map(|line| (line.id, line.quantity_pending))
            .collect();

        // Product locks are always taken in the same order
        let mut inputs = request.lines;
        inputs.sort_by_key(|input| input.product_id);

        let mut postings = Vec::new();
        let mut receipt_lines = Vec::with_capacity(inputs.len());
        let mut total_received_value = Decimal::ZERO;

        for input in inputs {
            let order_line = resolve_order_line(&order_lines, &remaining, &input)?;
            let pending = remaining.get(&order_line.id).copied().unwrap_or(0);
            let delivered = input.quantity_accepted.saturating_add(input.quantity_rejected);

            if delivered > pending {
                warn!(
                    order_line_id = %order_line.id,
                    delivered,
                    pending,
                    "Rejected receipt line beyond pending quantity"
                );
                return Err(ServiceError::ValidationError(format!(
                    "Product {}: accepted {} + rejected {} exceeds pending quantity {}",
                    input.product_id, input.quantity_accepted, input.quantity_rejected, pending
                )));
            }

            let mut stock_movement_id = None;
            if input.quantity_accepted > 0 {
                let posting = self
                    .ledger
                    .append(
                        &txn,
                        NewMovement {
                            product_id: input.product_id,
                            movement_type: MovementType::In,
                            reference_type: ReferenceType::Purchase,
                            reference_id: Some(header.id),
                            quantity: input.quantity_accepted,
                            unit_cost: Some(input.unit_cost),
                            actor: request.received_by,
                            notes: Some(format!("Goods receipt {}", receipt_number)),
                        },
                    )
                    .await?;
                stock_movement_id = Some(posting.movement.id);
                postings.push(posting);

                self.order_lines
                    .update_quantity_received(&txn, order_line.id, input.quantity_accepted)
                    .await?;
                remaining.insert(order_line.id, pending - input.quantity_accepted);
            }

            let line_value = extended_value(input.unit_cost, input.quantity_accepted)?;
            total_received_value = add_value(total_received_value, line_value)?;

            let line = goods_receipt_line::ActiveModel {
                id: Set(Uuid::new_v4()),
                goods_receipt_id: Set(header.id),
                purchase_order_line_id: Set(order_line.id),
                product_id: Set(input.product_id),
                quantity_accepted: Set(input.quantity_accepted),
                quantity_rejected: Set(input.quantity_rejected),
                unit_cost: Set(input.unit_cost),
                line_value: Set(line_value),
                rejection_reason: Set(input.rejection_reason),
                stock_movement_id: Set(stock_movement_id),
            }
            .insert(&txn)
            .await?;
            receipt_lines.push(line);
        }

        let lines_after = lines_for_order(&txn, order.id).await?;
        let status = ReceiptStatus::from_line_statuses(lines_after.iter().map(|l| l.line_status));

        let mut active: goods_receipt::ActiveModel = header.into();
        active.status = Set(status);
        active.total_received_value = Set(total_received_value);
        active.updated_at = Set(Utc::now());
        let header = active.update(&txn).await?;

        let order_status = next_order_status(order.status, status, &lines_after);
        let fully_received =
            order_status == PurchaseOrderStatus::Received && order.status != order_status;
        if order_status != order.status {
            let mut active: purchase_order::ActiveModel = order.into();
            active.status = Set(order_status);
            active.updated_at = Set(Utc::now());
            active.update(&txn).await?;
        }

        txn.commit().await?;

        counter!("inventory.receipts.created", 1);
        histogram!(
            "inventory.receipts.duration",
            started.elapsed().as_secs_f64()
        );
        info!(
            receipt_number = %header.receipt_number,
            status = %header.status,
            total_received_value = %header.total_received_value,
            "Goods receipt created"
        );

        let mut events: Vec<Event> = postings.iter().flat_map(|p| p.events()).collect();
        events.push(Event::GoodsReceiptCreated {
            receipt_id: header.id,
            receipt_number: header.receipt_number.clone(),
            purchase_order_id: header.purchase_order_id,
            total_received_value: header.total_received_value,
        });
        if fully_received {
            events.push(Event::PurchaseOrderFullyReceived {
                purchase_order_id: header.purchase_order_id,
            });
        }
        publish(&self.event_sender, events).await;

        Ok(GoodsReceipt {
            header,
            lines: receipt_lines,
        })
    }

    pub async fn get_receipt(&self, receipt_id: Uuid) -> Result<GoodsReceipt, ServiceError> {
        let header = GoodsReceiptEntity::find_by_id(receipt_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Goods receipt", receipt_id))?;

        let lines = GoodsReceiptLineEntity::find()
            .filter(goods_receipt_line::Column::GoodsReceiptId.eq(receipt_id))
            .order_by_asc(goods_receipt_line::Column::ProductId)
            .all(&*self.db)
            .await?;

        Ok(GoodsReceipt { header, lines })
    }

    pub async fn list_receipts_for_order(
        &self,
        purchase_order_id: Uuid,
    ) -> Result<Vec<goods_receipt::Model>, ServiceError> {
        Ok(GoodsReceiptEntity::find()
            .filter(goods_receipt::Column::PurchaseOrderId.eq(purchase_order_id))
            .order_by_asc(goods_receipt::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }
}

/// Finds the order line a receipt line books against: the named one, or the
/// first line for the product that still expects goods.
fn resolve_order_line<'a>(
    order_lines: &'a [purchase_order_line::Model],
    remaining: &HashMap<Uuid, i32>,
    input: &ReceiptLineInput,
) -> Result<&'a purchase_order_line::Model, ServiceError> {
    match input.purchase_order_line_id {
        Some(line_id) => {
            let line = order_lines
                .iter()
                .find(|line| line.id == line_id)
                .ok_or_else(|| ServiceError::not_found("Purchase order line", line_id))?;
            if line.product_id != input.product_id {
                return Err(ServiceError::ValidationError(format!(
                    "Order line {} is for product {}, not {}",
                    line_id, line.product_id, input.product_id
                )));
            }
            Ok(line)
        }
        None => order_lines
            .iter()
            .filter(|line| line.product_id == input.product_id)
            .find(|line| remaining.get(&line.id).copied().unwrap_or(0) > 0)
            .ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "Product {} has no open line on this purchase order",
                    input.product_id
                ))
            }),
    }
}

fn next_order_status(
    current: PurchaseOrderStatus,
    receipt_status: ReceiptStatus,
    lines: &[purchase_order_line::Model],
) -> PurchaseOrderStatus {
    match receipt_status {
        ReceiptStatus::Completed => PurchaseOrderStatus::Received,
        ReceiptStatus::Partial if lines.iter().any(|l| l.quantity_received > 0) => {
            PurchaseOrderStatus::PartiallyReceived
        }
        ReceiptStatus::Partial => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line_input(accepted: i32, rejected: i32) -> ReceiptLineInput {
        ReceiptLineInput {
            product_id: Uuid::new_v4(),
            purchase_order_line_id: None,
            quantity_accepted: accepted,
            quantity_rejected: rejected,
            unit_cost: dec!(12.50),
            rejection_reason: None,
        }
    }

    fn request(lines: Vec<ReceiptLineInput>) -> CreateGoodsReceipt {
        CreateGoodsReceipt {
            purchase_order_id: Uuid::new_v4(),
            lines,
            received_by: Uuid::new_v4(),
            receipt_date: None,
            notes: None,
        }
    }

    #[test]
    fn accepts_well_formed_request() {
        assert!(request(vec![line_input(5, 1)]).validate().is_ok());
    }

    #[test]
    fn rejects_empty_receipt() {
        assert!(request(vec![]).validate().is_err());
    }

    #[test]
    fn rejects_line_with_nothing_delivered() {
        let err: ServiceError = request(vec![line_input(0, 0)]).validate().unwrap_err().into();
        assert!(err.to_string().contains("at least one unit"), "{}", err);
    }

    #[test]
    fn rejects_negative_quantities_and_cost() {
        assert!(request(vec![line_input(-1, 2)]).validate().is_err());

        let mut line = line_input(1, 0);
        line.unit_cost = dec!(-0.01);
        assert!(request(vec![line]).validate().is_err());
    }

    #[test]
    fn rejects_unit_cost_beyond_storable_amount() {
        let mut line = line_input(1, 0);
        line.unit_cost = Decimal::MAX;
        assert!(request(vec![line.clone()]).validate().is_err());

        line.unit_cost = MAX_AMOUNT;
        assert!(request(vec![line]).validate().is_ok());
    }

    fn order_line(product_id: Uuid, ordered: i32) -> purchase_order_line::Model {
        purchase_order_line::Model {
            id: Uuid::new_v4(),
            purchase_order_id: Uuid::nil(),
            product_id,
            quantity_ordered: ordered,
            quantity_received: 0,
            quantity_pending: ordered,
            unit_price: dec!(1),
            line_status: purchase_order_line::LineStatus::Pending,
            received_date: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn resolves_by_product_skipping_exhausted_lines() {
        let product_id = Uuid::new_v4();
        let first = order_line(product_id, 5);
        let second = order_line(product_id, 5);
        let lines = vec![first.clone(), second.clone()];
        let remaining = HashMap::from([(first.id, 0), (second.id, 5)]);

        let mut input = line_input(2, 0);
        input.product_id = product_id;

        let resolved = resolve_order_line(&lines, &remaining, &input).unwrap();
        assert_eq!(resolved.id, second.id);
    }

    #[test]
    fn explicit_line_must_match_product() {
        let line = order_line(Uuid::new_v4(), 5);
        let remaining = HashMap::from([(line.id, 5)]);
        let mut input = line_input(2, 0);
        input.purchase_order_line_id = Some(line.id);

        let err = resolve_order_line(std::slice::from_ref(&line), &remaining, &input).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::Validation);
    }
}
