#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use dealer_inventory::{
    config::AppConfig,
    db::{self, DbPool},
    entities::{
        product, purchase_order,
        purchase_order::PurchaseOrderStatus,
        purchase_order_line::{self, LineStatus},
        stock_movement::{MovementType, ReferenceType},
    },
    events::{Event, EventSender},
    services::{stock_ledger::NewMovement, InventoryServices, ServiceSettings},
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Services backed by a fresh in-memory SQLite database.
///
/// The pool holds exactly one connection: every other connection would open
/// its own empty in-memory database.
pub struct TestContext {
    pub db: Arc<DbPool>,
    pub services: InventoryServices,
    pub events: mpsc::Receiver<Event>,
    pub actor: Uuid,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_database_url("sqlite::memory:", 1).await
    }

    /// Services on an arbitrary database, migrated before use.
    pub async fn with_database_url(url: &str, max_connections: u32) -> Self {
        let mut cfg = AppConfig::new(url.to_string(), "test".to_string());
        cfg.db_max_connections = max_connections;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");

        let db = Arc::new(pool);
        let (tx, rx) = mpsc::channel(1024);
        let services = InventoryServices::new(
            db.clone(),
            Some(EventSender::new(tx)),
            ServiceSettings::from(&cfg),
        );

        Self {
            db,
            services,
            events: rx,
            actor: Uuid::new_v4(),
        }
    }

    /// Creates a product and, when `stock > 0`, books the opening stock as an
    /// IN movement so the cache and the ledger agree.
    pub async fn product(&self, code: &str, stock: i32, cost_price: Decimal) -> product::Model {
        let now = Utc::now();
        let product = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            name: Set(format!("Test part {}", code)),
            stock_quantity: Set(0),
            cost_price: Set(cost_price),
            min_stock: Set(0),
            max_stock: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("failed to insert product");

        if stock > 0 {
            self.receive(product.id, stock).await;
        }
        product
    }

    pub async fn receive(&self, product_id: Uuid, quantity: i32) {
        self.services
            .ledger
            .record_movement(self.movement(product_id, MovementType::In, quantity))
            .await
            .expect("failed to book stock");
    }

    pub fn movement(&self, product_id: Uuid, movement_type: MovementType, quantity: i32) -> NewMovement {
        NewMovement {
            product_id,
            movement_type,
            reference_type: match movement_type {
                MovementType::In => ReferenceType::Purchase,
                MovementType::Out => ReferenceType::RepairUsage,
            },
            reference_id: None,
            quantity,
            unit_cost: None,
            actor: self.actor,
            notes: None,
        }
    }

    /// Creates a placed purchase order with one line per `(product, ordered)`.
    pub async fn purchase_order(
        &self,
        po_number: &str,
        lines: &[(Uuid, i32)],
    ) -> (purchase_order::Model, Vec<purchase_order_line::Model>) {
        self.purchase_order_with_status(po_number, PurchaseOrderStatus::Ordered, lines)
            .await
    }

    pub async fn purchase_order_with_status(
        &self,
        po_number: &str,
        status: PurchaseOrderStatus,
        lines: &[(Uuid, i32)],
    ) -> (purchase_order::Model, Vec<purchase_order_line::Model>) {
        let now = Utc::now();
        let unit_price = Decimal::new(1250, 2);
        let total: i32 = lines.iter().map(|(_, ordered)| ordered).sum();

        let order = purchase_order::ActiveModel {
            id: Set(Uuid::new_v4()),
            po_number: Set(po_number.to_string()),
            supplier_id: Set(Uuid::new_v4()),
            status: Set(status),
            total_amount: Set(unit_price * Decimal::from(total)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("failed to insert purchase order");

        let mut models = Vec::with_capacity(lines.len());
        for (i, (product_id, ordered)) in lines.iter().enumerate() {
            let created_at = now + chrono::Duration::milliseconds(i as i64);
            let line = purchase_order_line::ActiveModel {
                id: Set(Uuid::new_v4()),
                purchase_order_id: Set(order.id),
                product_id: Set(*product_id),
                quantity_ordered: Set(*ordered),
                quantity_received: Set(0),
                quantity_pending: Set(*ordered),
                unit_price: Set(unit_price),
                line_status: Set(LineStatus::Pending),
                received_date: Set(None),
                created_at: Set(created_at),
                updated_at: Set(created_at),
            }
            .insert(&*self.db)
            .await
            .expect("failed to insert purchase order line");
            models.push(line);
        }

        (order, models)
    }

    /// Events published so far.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}
