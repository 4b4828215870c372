// Stock ledger and the cached quantity derived from it
pub mod product_stock;
pub mod stock_ledger;

// Purchasing
pub mod goods_receipt;
pub mod purchase_order_lines;

// Physical counts
pub mod stock_adjustment;

// Document numbers and money arithmetic shared by receipts and adjustments
pub mod numbering;
pub mod valuation;

use sea_orm::DatabaseConnection;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    entities::{purchase_order_line, stock_movement},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        goods_receipt::{CreateGoodsReceipt, GoodsReceipt, GoodsReceiptProcessor},
        product_stock::ProductStockView,
        purchase_order_lines::PurchaseOrderLineReconciler,
        stock_adjustment::{CreateStockAdjustment, StockAdjustment, StockAdjustmentWorkflow},
        stock_ledger::StockLedger,
    },
};

/// Tunables shared by the services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    pub history_default_page_size: u64,
    pub history_max_page_size: u64,
    pub receipt_number_prefix: String,
    pub adjustment_number_prefix: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            history_default_page_size: 20,
            history_max_page_size: 100,
            receipt_number_prefix: "GR".to_string(),
            adjustment_number_prefix: "ADJ".to_string(),
        }
    }
}

impl From<&AppConfig> for ServiceSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            history_default_page_size: config.history_default_page_size,
            history_max_page_size: config.history_max_page_size,
            receipt_number_prefix: config.receipt_number_prefix.clone(),
            adjustment_number_prefix: config.adjustment_number_prefix.clone(),
        }
    }
}

impl ServiceSettings {
    /// Page size for history queries, clamped to `1..=history_max_page_size`.
    pub fn history_limit(&self, requested: Option<u64>) -> u64 {
        let max = self.history_max_page_size.max(1);
        requested
            .unwrap_or(self.history_default_page_size)
            .clamp(1, max)
    }
}

/// Sends events after a commit. Delivery failures are logged, never returned.
pub(crate) async fn publish(
    sender: &Option<EventSender>,
    events: impl IntoIterator<Item = Event>,
) {
    if let Some(sender) = sender {
        for event in events {
            sender.send_or_log(event).await;
        }
    }
}

/// The inventory core wired against one connection pool.
#[derive(Clone)]
pub struct InventoryServices {
    pub ledger: StockLedger,
    pub stock: ProductStockView,
    pub order_lines: PurchaseOrderLineReconciler,
    pub receipts: GoodsReceiptProcessor,
    pub adjustments: StockAdjustmentWorkflow,
}

impl InventoryServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Option<EventSender>,
        settings: ServiceSettings,
    ) -> Self {
        let ledger = StockLedger::new(db.clone(), event_sender.clone(), settings.clone());
        let stock = ProductStockView::new(db.clone(), event_sender.clone());
        let order_lines = PurchaseOrderLineReconciler::new(db.clone());
        let receipts = GoodsReceiptProcessor::new(
            db.clone(),
            ledger.clone(),
            order_lines.clone(),
            event_sender.clone(),
            settings.clone(),
        );
        let adjustments =
            StockAdjustmentWorkflow::new(db, ledger.clone(), event_sender, settings);

        Self {
            ledger,
            stock,
            order_lines,
            receipts,
            adjustments,
        }
    }

    pub async fn create_goods_receipt(
        &self,
        request: CreateGoodsReceipt,
    ) -> Result<GoodsReceipt, ServiceError> {
        self.receipts.create_receipt(request).await
    }

    pub async fn get_pending_order_lines(
        &self,
        purchase_order_id: Uuid,
    ) -> Result<Vec<purchase_order_line::Model>, ServiceError> {
        self.order_lines.pending_lines(purchase_order_id).await
    }

    pub async fn post_adjustment(
        &self,
        product_id: Uuid,
        quantity_physical: i32,
        reason: impl Into<String>,
        actor: Uuid,
    ) -> Result<StockAdjustment, ServiceError> {
        self.adjustments
            .create(CreateStockAdjustment {
                product_id,
                quantity_physical,
                reason: reason.into(),
                created_by: actor,
            })
            .await
    }

    pub async fn approve_adjustment(
        &self,
        adjustment_id: Uuid,
        approver: Uuid,
    ) -> Result<StockAdjustment, ServiceError> {
        self.adjustments.approve(adjustment_id, approver).await
    }

    pub async fn get_current_stock(&self, product_id: Uuid) -> Result<i32, ServiceError> {
        self.stock.get_quantity(product_id).await
    }

    /// One page of a product's movements, newest first. `page` starts at 1.
    pub async fn get_stock_history(
        &self,
        product_id: Uuid,
        page: u64,
        limit: Option<u64>,
    ) -> Result<Vec<stock_movement::Model>, ServiceError> {
        Ok(self.ledger.history(product_id, page, limit).await?.movements)
    }
}
