use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

/// Direction of a ledger entry.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(8))")]
pub enum MovementType {
    #[sea_orm(string_value = "IN")]
    #[strum(serialize = "IN")]
    In,
    #[sea_orm(string_value = "OUT")]
    #[strum(serialize = "OUT")]
    Out,
}

impl MovementType {
    /// Quantity after moving `quantity` units from `before`.
    ///
    /// An OUT that would leave the product below zero is rejected rather than
    /// clamped.
    pub fn apply(self, before: i32, quantity: i32) -> Result<i32, ServiceError> {
        if quantity < 0 {
            return Err(ServiceError::ValidationError(format!(
                "Movement quantity must not be negative, got {}",
                quantity
            )));
        }

        match self {
            MovementType::In => before.checked_add(quantity).ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "Stock quantity overflow: {} + {}",
                    before, quantity
                ))
            }),
            MovementType::Out => {
                if quantity > before {
                    Err(ServiceError::InsufficientStock(format!(
                        "Requested {} but only {} available",
                        quantity, before
                    )))
                } else {
                    Ok(before - quantity)
                }
            }
        }
    }

    /// Signed contribution of a movement to the running total.
    pub fn signed(self, quantity: i32) -> i64 {
        match self {
            MovementType::In => i64::from(quantity),
            MovementType::Out => -i64::from(quantity),
        }
    }
}

/// What caused a ledger entry.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReferenceType {
    #[sea_orm(string_value = "purchase")]
    Purchase,
    #[sea_orm(string_value = "adjustment")]
    Adjustment,
    #[sea_orm(string_value = "repair_usage")]
    RepairUsage,
    #[sea_orm(string_value = "sale")]
    Sale,
    #[sea_orm(string_value = "return")]
    Return,
}

/// One immutable ledger entry.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_movements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub product_id: Uuid,
    /// 1-based position in the product's ledger
    pub sequence: i64,
    pub movement_type: MovementType,
    pub reference_type: ReferenceType,
    pub reference_id: Option<Uuid>,
    pub quantity_before: i32,
    pub quantity_moved: i32,
    pub quantity_after: i32,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub unit_cost: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub total_value: Decimal,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Model {
    /// True when the stored quantities agree with the movement direction.
    pub fn is_consistent(&self) -> bool {
        self.quantity_moved >= 0
            && self
                .movement_type
                .apply(self.quantity_before, self.quantity_moved)
                .map(|after| after == self.quantity_after)
                .unwrap_or(false)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
