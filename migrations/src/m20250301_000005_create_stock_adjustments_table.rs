use sea_orm_migration::prelude::*;

use super::m20250301_000001_create_products_table::Products;
use super::m20250301_000003_create_stock_movements_table::StockMovements;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(StockAdjustments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(StockAdjustments::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockAdjustments::AdjustmentNumber)
                            .string_len(64)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(StockAdjustments::ProductId).uuid().not_null())
                    .col(
                        ColumnDef::new(StockAdjustments::QuantitySystem)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockAdjustments::QuantityPhysical)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockAdjustments::Variance)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockAdjustments::UnitCost)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockAdjustments::CostImpact)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .col(ColumnDef::new(StockAdjustments::Reason).text().not_null())
                    .col(ColumnDef::new(StockAdjustments::CreatedBy).uuid().not_null())
                    // approved_by, approved_at and stock_movement_id are written together
                    .col(ColumnDef::new(StockAdjustments::ApprovedBy).uuid().null())
                    .col(
                        ColumnDef::new(StockAdjustments::ApprovedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(StockAdjustments::StockMovementId)
                            .uuid()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(StockAdjustments::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockAdjustments::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_stock_adjustments_product_id")
                            .from(StockAdjustments::Table, StockAdjustments::ProductId)
                            .to(Products::Table, Products::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_stock_adjustments_stock_movement_id")
                            .from(StockAdjustments::Table, StockAdjustments::StockMovementId)
                            .to(StockMovements::Table, StockMovements::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(StockAdjustments::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum StockAdjustments {
    Table,
    Id,
    AdjustmentNumber,
    ProductId,
    QuantitySystem,
    QuantityPhysical,
    Variance,
    UnitCost,
    CostImpact,
    Reason,
    CreatedBy,
    ApprovedBy,
    ApprovedAt,
    StockMovementId,
    CreatedAt,
    UpdatedAt,
}
