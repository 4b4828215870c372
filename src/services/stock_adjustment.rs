use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    entities::{
        product::Entity as ProductEntity,
        stock_adjustment::{self, Entity as StockAdjustmentEntity},
        stock_movement::{MovementType, ReferenceType},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        numbering::next_document_number,
        publish,
        stock_ledger::{NewMovement, StockLedger},
        valuation::extended_value,
        ServiceSettings,
    },
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateStockAdjustment {
    pub product_id: Uuid,
    #[validate(range(min = 0, message = "Physical count must not be negative"))]
    pub quantity_physical: i32,
    #[validate(length(min = 1, max = 500), custom = "validate_reason")]
    pub reason: String,
    pub created_by: Uuid,
}

fn validate_reason(reason: &str) -> Result<(), ValidationError> {
    if reason.trim().is_empty() {
        let mut err = ValidationError::new("reason");
        err.message = Some("A reason is required for every stock adjustment".into());
        return Err(err);
    }
    Ok(())
}

/// Lifecycle of an adjustment. Approval always carries the ledger entry it
/// posted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdjustmentState {
    Pending,
    Approved {
        approved_by: Uuid,
        approved_at: DateTime<Utc>,
        movement_id: Uuid,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockAdjustment {
    pub id: Uuid,
    pub adjustment_number: String,
    pub product_id: Uuid,
    pub quantity_system: i32,
    pub quantity_physical: i32,
    pub variance: i32,
    pub unit_cost: Decimal,
    pub cost_impact: Decimal,
    pub reason: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub state: AdjustmentState,
}

impl StockAdjustment {
    pub fn is_pending(&self) -> bool {
        self.state == AdjustmentState::Pending
    }
}

impl TryFrom<stock_adjustment::Model> for StockAdjustment {
    type Error = ServiceError;

    fn try_from(model: stock_adjustment::Model) -> Result<Self, Self::Error> {
        let state = match (model.approved_by, model.approved_at, model.stock_movement_id) {
            (None, None, None) => AdjustmentState::Pending,
            (Some(approved_by), Some(approved_at), Some(movement_id)) => AdjustmentState::Approved {
                approved_by,
                approved_at,
                movement_id,
            },
            _ => {
                return Err(ServiceError::InternalError(format!(
                    "Stock adjustment {} has incomplete approval data",
                    model.id
                )))
            }
        };

        Ok(Self {
            id: model.id,
            adjustment_number: model.adjustment_number,
            product_id: model.product_id,
            quantity_system: model.quantity_system,
            quantity_physical: model.quantity_physical,
            variance: model.variance,
            unit_cost: model.unit_cost,
            cost_impact: model.cost_impact,
            reason: model.reason,
            created_by: model.created_by,
            created_at: model.created_at,
            state,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Variance {
    pub variance: i32,
    pub cost_impact: Decimal,
}

impl Variance {
    /// `physical - system`, valued at `cost_price`.
    pub fn compute(system: i32, physical: i32, cost_price: Decimal) -> Result<Self, ServiceError> {
        let variance = physical.checked_sub(system).ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "Variance between {} and {} is out of range",
                physical, system
            ))
        })?;

        Ok(Self {
            variance,
            cost_impact: extended_value(cost_price, variance)?,
        })
    }

    /// The ledger entry that books this variance. A zero variance still posts
    /// a zero-quantity IN so every approval has a ledger entry.
    pub fn movement(self) -> (MovementType, i32) {
        if self.variance >= 0 {
            (MovementType::In, self.variance)
        } else {
            (MovementType::Out, self.variance.saturating_abs())
        }
    }
}

/// Proposes physical-count corrections and posts them once approved.
#[derive(Clone)]
pub struct StockAdjustmentWorkflow {
    db: Arc<DatabaseConnection>,
    ledger: StockLedger,
    event_sender: Option<EventSender>,
    settings: ServiceSettings,
}

impl StockAdjustmentWorkflow {
    pub fn new(
        db: Arc<DatabaseConnection>,
        ledger: StockLedger,
        event_sender: Option<EventSender>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            db,
            ledger,
            event_sender,
            settings,
        }
    }

    /// Records a pending adjustment against a snapshot of the current stock.
    /// Nothing is posted to the ledger until approval.
    #[instrument(skip(self, request), fields(product_id = %request.product_id))]
    pub async fn create(
        &self,
        request: CreateStockAdjustment,
    ) -> Result<StockAdjustment, ServiceError> {
        request.validate()?;

        let txn = self.db.begin().await?;

        let product = ProductEntity::find_by_id(request.product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Product", request.product_id))?;

        let variance = Variance::compute(
            product.stock_quantity,
            request.quantity_physical,
            product.cost_price,
        )?;

        let now = Utc::now();
        let adjustment_number = next_document_number::<StockAdjustmentEntity, _>(
            &txn,
            stock_adjustment::Column::AdjustmentNumber,
            &self.settings.adjustment_number_prefix,
            now.date_naive(),
        )
        .await?;

        let model = stock_adjustment::ActiveModel {
            id: Set(Uuid::new_v4()),
            adjustment_number: Set(adjustment_number),
            product_id: Set(product.id),
            quantity_system: Set(product.stock_quantity),
            quantity_physical: Set(request.quantity_physical),
            variance: Set(variance.variance),
            unit_cost: Set(product.cost_price),
            cost_impact: Set(variance.cost_impact),
            reason: Set(request.reason.trim().to_string()),
            created_by: Set(request.created_by),
            approved_by: Set(None),
            approved_at: Set(None),
            stock_movement_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        info!(
            adjustment_number = %model.adjustment_number,
            variance = model.variance,
            cost_impact = %model.cost_impact,
            "Stock adjustment created"
        );

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::StockAdjustmentCreated {
                    adjustment_id: model.id,
                    product_id: model.product_id,
                    variance: model.variance,
                })
                .await;
        }

        StockAdjustment::try_from(model)
    }

    /// Approves a pending adjustment and posts its variance to the ledger in
    /// the same transaction. A second approval fails with `Conflict`.
    ///
    /// The variance is the one computed when the count was recorded and is
    /// posted unchanged, even if stock moved since. The adjustment therefore
    /// corrects by the counted difference rather than resetting stock to the
    /// counted quantity. A shortfall that no longer fits the current stock
    /// fails with `InsufficientStock` and the adjustment stays pending.
    #[instrument(skip(self))]
    pub async fn approve(
        &self,
        adjustment_id: Uuid,
        approver: Uuid,
    ) -> Result<StockAdjustment, ServiceError> {
        let txn = self.db.begin().await?;

        let model = StockAdjustmentEntity::find_by_id(adjustment_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Stock adjustment", adjustment_id))?;

        if !StockAdjustment::try_from(model.clone())?.is_pending() {
            warn!(adjustment_number = %model.adjustment_number, "Adjustment already approved");
            return Err(ServiceError::Conflict(format!(
                "Stock adjustment {} is already approved",
                model.adjustment_number
            )));
        }

        let (movement_type, quantity) = Variance {
            variance: model.variance,
            cost_impact: model.cost_impact,
        }
        .movement();

        let posting = self
            .ledger
            .append(
                &txn,
                NewMovement {
                    product_id: model.product_id,
                    movement_type,
                    reference_type: ReferenceType::Adjustment,
                    reference_id: Some(model.id),
                    quantity,
                    unit_cost: Some(model.unit_cost),
                    actor: approver,
                    notes: Some(format!(
                        "Stock adjustment {}: {}",
                        model.adjustment_number, model.reason
                    )),
                },
            )
            .await?;

        let now = Utc::now();
        let mut active: stock_adjustment::ActiveModel = model.into();
        active.approved_by = Set(Some(approver));
        active.approved_at = Set(Some(now));
        active.stock_movement_id = Set(Some(posting.movement.id));
        active.updated_at = Set(now);
        let model = active.update(&txn).await?;

        txn.commit().await?;

        counter!("inventory.adjustments.approved", 1);
        info!(
            adjustment_number = %model.adjustment_number,
            movement_id = %posting.movement.id,
            "Stock adjustment approved"
        );

        let mut events = posting.events();
        events.push(Event::StockAdjustmentApproved {
            adjustment_id: model.id,
            product_id: model.product_id,
            movement_id: posting.movement.id,
            approved_by: approver,
        });
        publish(&self.event_sender, events).await;

        StockAdjustment::try_from(model)
    }

    /// Removes a pending adjustment. Approved adjustments are immutable.
    #[instrument(skip(self))]
    pub async fn delete(&self, adjustment_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        let model = StockAdjustmentEntity::find_by_id(adjustment_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Stock adjustment", adjustment_id))?;

        if !StockAdjustment::try_from(model.clone())?.is_pending() {
            return Err(ServiceError::Conflict(format!(
                "Stock adjustment {} is approved and cannot be deleted",
                model.adjustment_number
            )));
        }

        StockAdjustmentEntity::delete_by_id(adjustment_id)
            .exec(&txn)
            .await?;
        txn.commit().await?;

        info!(adjustment_number = %model.adjustment_number, "Stock adjustment deleted");
        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::StockAdjustmentDeleted { adjustment_id })
                .await;
        }

        Ok(())
    }

    pub async fn get(&self, adjustment_id: Uuid) -> Result<StockAdjustment, ServiceError> {
        let model = StockAdjustmentEntity::find_by_id(adjustment_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Stock adjustment", adjustment_id))?;
        StockAdjustment::try_from(model)
    }

    /// Adjustments awaiting approval, oldest first.
    pub async fn list_pending(
        &self,
        product_id: Option<Uuid>,
    ) -> Result<Vec<StockAdjustment>, ServiceError> {
        let mut query = StockAdjustmentEntity::find()
            .filter(stock_adjustment::Column::ApprovedAt.is_null())
            .order_by_asc(stock_adjustment::Column::CreatedAt);
        if let Some(product_id) = product_id {
            query = query.filter(stock_adjustment::Column::ProductId.eq(product_id));
        }

        query
            .all(&*self.db)
            .await?
            .into_iter()
            .map(StockAdjustment::try_from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[rstest]
    #[case(50, 42, dec!(10), -8, dec!(-80))]
    #[case(10, 15, dec!(2.5), 5, dec!(12.5))]
    #[case(7, 7, dec!(3), 0, dec!(0))]
    fn computes_variance_and_cost_impact(
        #[case] system: i32,
        #[case] physical: i32,
        #[case] cost: Decimal,
        #[case] variance: i32,
        #[case] impact: Decimal,
    ) {
        let v = Variance::compute(system, physical, cost).unwrap();
        assert_eq!(v.variance, variance);
        assert_eq!(v.cost_impact, impact);
    }

    #[rstest]
    #[case(-8, MovementType::Out, 8)]
    #[case(5, MovementType::In, 5)]
    #[case(0, MovementType::In, 0)]
    fn variance_maps_to_movement(
        #[case] variance: i32,
        #[case] movement_type: MovementType,
        #[case] quantity: i32,
    ) {
        let v = Variance {
            variance,
            cost_impact: Decimal::ZERO,
        };
        assert_eq!(v.movement(), (movement_type, quantity));
    }

    fn row() -> stock_adjustment::Model {
        stock_adjustment::Model {
            id: Uuid::new_v4(),
            adjustment_number: "ADJ-20250307-0001".into(),
            product_id: Uuid::new_v4(),
            quantity_system: 50,
            quantity_physical: 42,
            variance: -8,
            unit_cost: dec!(10),
            cost_impact: dec!(-80),
            reason: "count".into(),
            created_by: Uuid::new_v4(),
            approved_by: None,
            approved_at: None,
            stock_movement_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn approval_columns_map_to_state() {
        assert!(StockAdjustment::try_from(row()).unwrap().is_pending());

        let mut approved = row();
        approved.approved_by = Some(Uuid::new_v4());
        approved.approved_at = Some(Utc::now());
        approved.stock_movement_id = Some(Uuid::new_v4());
        assert_matches!(
            StockAdjustment::try_from(approved).unwrap().state,
            AdjustmentState::Approved { .. }
        );
    }

    #[test]
    fn half_approved_row_is_rejected() {
        let mut broken = row();
        broken.approved_by = Some(Uuid::new_v4());
        assert_matches!(
            StockAdjustment::try_from(broken),
            Err(ServiceError::InternalError(_))
        );
    }

    #[test]
    fn blank_reason_is_invalid() {
        let request = CreateStockAdjustment {
            product_id: Uuid::new_v4(),
            quantity_physical: 3,
            reason: "   ".into(),
            created_by: Uuid::new_v4(),
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn negative_count_is_invalid() {
        let request = CreateStockAdjustment {
            product_id: Uuid::new_v4(),
            quantity_physical: -1,
            reason: "count".into(),
            created_by: Uuid::new_v4(),
        };
        assert!(request.validate().is_err());
    }
}
