use sea_orm_migration::prelude::*;

use super::m20250301_000002_create_purchase_order_tables::PurchaseOrderLines;
use super::m20250301_000003_create_stock_movements_table::StockMovements;
use super::m20250301_000004_create_goods_receipt_tables::{GoodsReceiptLines, GoodsReceipts};
use super::m20250301_000005_create_stock_adjustments_table::StockAdjustments;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Movement history per product, newest first
        manager
            .create_index(
                Index::create()
                    .name("idx_stock_movements_product_created")
                    .table(StockMovements::Table)
                    .col(StockMovements::ProductId)
                    .col((StockMovements::CreatedAt, IndexOrder::Desc))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_stock_movements_reference")
                    .table(StockMovements::Table)
                    .col(StockMovements::ReferenceType)
                    .col(StockMovements::ReferenceId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_purchase_order_lines_order_status")
                    .table(PurchaseOrderLines::Table)
                    .col(PurchaseOrderLines::PurchaseOrderId)
                    .col(PurchaseOrderLines::LineStatus)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_goods_receipts_purchase_order_id")
                    .table(GoodsReceipts::Table)
                    .col(GoodsReceipts::PurchaseOrderId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_goods_receipt_lines_goods_receipt_id")
                    .table(GoodsReceiptLines::Table)
                    .col(GoodsReceiptLines::GoodsReceiptId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_stock_adjustments_product_id")
                    .table(StockAdjustments::Table)
                    .col(StockAdjustments::ProductId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for name in [
            "idx_stock_adjustments_product_id",
            "idx_goods_receipt_lines_goods_receipt_id",
            "idx_goods_receipts_purchase_order_id",
            "idx_purchase_order_lines_order_status",
            "idx_stock_movements_reference",
            "idx_stock_movements_product_created",
        ] {
            manager
                .drop_index(Index::drop().name(name).to_owned())
                .await?;
        }

        Ok(())
    }
}
