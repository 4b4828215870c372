use sea_orm_migration::prelude::*;

use super::m20250301_000001_create_products_table::Products;
use super::m20250301_000002_create_purchase_order_tables::{PurchaseOrderLines, PurchaseOrders};
use super::m20250301_000003_create_stock_movements_table::StockMovements;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(GoodsReceipts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(GoodsReceipts::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(GoodsReceipts::ReceiptNumber)
                            .string_len(64)
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(GoodsReceipts::PurchaseOrderId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(GoodsReceipts::ReceiptDate)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(GoodsReceipts::Status)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(GoodsReceipts::TotalReceivedValue)
                            .decimal_len(16, 4)
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(GoodsReceipts::ReceivedBy).uuid().not_null())
                    .col(ColumnDef::new(GoodsReceipts::Notes).text().null())
                    .col(
                        ColumnDef::new(GoodsReceipts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(GoodsReceipts::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_goods_receipts_purchase_order_id")
                            .from(GoodsReceipts::Table, GoodsReceipts::PurchaseOrderId)
                            .to(PurchaseOrders::Table, PurchaseOrders::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(GoodsReceiptLines::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(GoodsReceiptLines::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(GoodsReceiptLines::GoodsReceiptId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(GoodsReceiptLines::PurchaseOrderLineId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(GoodsReceiptLines::ProductId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(GoodsReceiptLines::QuantityAccepted)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(GoodsReceiptLines::QuantityRejected)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(GoodsReceiptLines::UnitCost)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(GoodsReceiptLines::LineValue)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(GoodsReceiptLines::RejectionReason)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(GoodsReceiptLines::StockMovementId)
                            .uuid()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_goods_receipt_lines_goods_receipt_id")
                            .from(GoodsReceiptLines::Table, GoodsReceiptLines::GoodsReceiptId)
                            .to(GoodsReceipts::Table, GoodsReceipts::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_goods_receipt_lines_purchase_order_line_id")
                            .from(
                                GoodsReceiptLines::Table,
                                GoodsReceiptLines::PurchaseOrderLineId,
                            )
                            .to(PurchaseOrderLines::Table, PurchaseOrderLines::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_goods_receipt_lines_product_id")
                            .from(GoodsReceiptLines::Table, GoodsReceiptLines::ProductId)
                            .to(Products::Table, Products::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_goods_receipt_lines_stock_movement_id")
                            .from(
                                GoodsReceiptLines::Table,
                                GoodsReceiptLines::StockMovementId,
                            )
                            .to(StockMovements::Table, StockMovements::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(GoodsReceiptLines::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(GoodsReceipts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum GoodsReceipts {
    Table,
    Id,
    ReceiptNumber,
    PurchaseOrderId,
    ReceiptDate,
    Status,
    TotalReceivedValue,
    ReceivedBy,
    Notes,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub enum GoodsReceiptLines {
    Table,
    Id,
    GoodsReceiptId,
    PurchaseOrderLineId,
    ProductId,
    QuantityAccepted,
    QuantityRejected,
    UnitCost,
    LineValue,
    RejectionReason,
    StockMovementId,
}
