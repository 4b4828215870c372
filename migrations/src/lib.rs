pub use sea_orm_migration::prelude::*;

mod m20250301_000001_create_products_table;
mod m20250301_000002_create_purchase_order_tables;
mod m20250301_000003_create_stock_movements_table;
mod m20250301_000004_create_goods_receipt_tables;
mod m20250301_000005_create_stock_adjustments_table;
mod m20250301_000006_add_inventory_indexes;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_products_table::Migration),
            Box::new(m20250301_000002_create_purchase_order_tables::Migration),
            Box::new(m20250301_000003_create_stock_movements_table::Migration),
            Box::new(m20250301_000004_create_goods_receipt_tables::Migration),
            Box::new(m20250301_000005_create_stock_adjustments_table::Migration),
            Box::new(m20250301_000006_add_inventory_indexes::Migration),
        ]
    }
}
