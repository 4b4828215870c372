use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::entities::stock_movement::{MovementType, ReferenceType};

/// Domain events published after a transaction commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    StockMovementRecorded {
        movement_id: Uuid,
        product_id: Uuid,
        movement_type: MovementType,
        reference_type: ReferenceType,
        reference_id: Option<Uuid>,
        quantity_moved: i32,
        quantity_after: i32,
    },
    LowStock {
        product_id: Uuid,
        product_code: String,
        stock_quantity: i32,
        min_stock: i32,
    },
    GoodsReceiptCreated {
        receipt_id: Uuid,
        receipt_number: String,
        purchase_order_id: Uuid,
        total_received_value: Decimal,
    },
    PurchaseOrderFullyReceived {
        purchase_order_id: Uuid,
    },
    StockAdjustmentCreated {
        adjustment_id: Uuid,
        product_id: Uuid,
        variance: i32,
    },
    StockAdjustmentApproved {
        adjustment_id: Uuid,
        product_id: Uuid,
        movement_id: Uuid,
        approved_by: Uuid,
    },
    StockAdjustmentDeleted {
        adjustment_id: Uuid,
    },
    StockDriftRepaired {
        product_id: Uuid,
        cached_quantity: i32,
        ledger_quantity: i64,
        repaired_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the consumer is gone.
    /// The state change behind the event is already committed.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("{}", e);
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: Event) -> Result<(), String>;
}

/// Drains the channel and hands each event to every handler.
pub async fn dispatch_events(mut rx: mpsc::Receiver<Event>, handlers: Vec<Box<dyn EventHandler>>) {
    while let Some(event) = rx.recv().await {
        for handler in &handlers {
            if let Err(e) = handler.handle_event(event.clone()).await {
                error!("Event handler failed for {:?}: {}", event, e);
            }
        }
    }
}

/// Default consumer: logs every event.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::LowStock {
                product_id,
                product_code,
                stock_quantity,
                min_stock,
            } => {
                warn!(
                    %product_id,
                    product_code = %product_code,
                    stock_quantity,
                    min_stock,
                    "Product at or below minimum stock"
                );
            }
            Event::StockDriftRepaired {
                product_id,
                cached_quantity,
                ledger_quantity,
                ..
            } => {
                warn!(
                    %product_id,
                    cached_quantity,
                    ledger_quantity,
                    "Cached stock quantity repaired from ledger"
                );
            }
            Event::PurchaseOrderFullyReceived { purchase_order_id } => {
                info!(%purchase_order_id, "Purchase order fully received");
            }
            other => {
                info!("Received event: {:?}", other);
            }
        }
    }

    warn!("Event processing loop has ended");
}
