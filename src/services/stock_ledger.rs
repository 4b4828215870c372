use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{
        product,
        stock_movement::{self, Entity as StockMovementEntity, MovementType, ReferenceType},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        product_stock::{lock_product, store_quantity},
        publish,
        valuation::extended_value,
        ServiceSettings,
    },
};

/// A ledger entry to be appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMovement {
    pub product_id: Uuid,
    pub movement_type: MovementType,
    pub reference_type: ReferenceType,
    pub reference_id: Option<Uuid>,
    pub quantity: i32,
    /// Falls back to the product's cost price
    pub unit_cost: Option<Decimal>,
    pub actor: Uuid,
    pub notes: Option<String>,
}

/// Result of an append: the new entry and the product with its updated cache.
#[derive(Debug, Clone)]
pub struct Posting {
    pub movement: stock_movement::Model,
    pub product: product::Model,
}

impl Posting {
    /// Events to publish once the surrounding transaction has committed.
    pub fn events(&self) -> Vec<Event> {
        let mut events = vec![Event::StockMovementRecorded {
            movement_id: self.movement.id,
            product_id: self.movement.product_id,
            movement_type: self.movement.movement_type,
            reference_type: self.movement.reference_type,
            reference_id: self.movement.reference_id,
            quantity_moved: self.movement.quantity_moved,
            quantity_after: self.movement.quantity_after,
        }];

        if self.product.is_below_minimum() {
            events.push(Event::LowStock {
                product_id: self.product.id,
                product_code: self.product.code.clone(),
                stock_quantity: self.product.stock_quantity,
                min_stock: self.product.min_stock,
            });
        }

        events
    }
}

/// One page of a product's movement history, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct MovementPage {
    pub movements: Vec<stock_movement::Model>,
    pub page: u64,
    pub limit: u64,
    pub total_items: u64,
    pub total_pages: u64,
}

/// Where a product's ledger stops chaining correctly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ChainBreak {
    SequenceGap {
        expected: i64,
        found: i64,
    },
    QuantityBeforeMismatch {
        sequence: i64,
        expected: i32,
        found: i32,
    },
    InconsistentEntry {
        sequence: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainVerification {
    pub product_id: Uuid,
    pub entries: u64,
    pub final_quantity: i32,
    pub first_break: Option<ChainBreak>,
}

impl ChainVerification {
    pub fn is_intact(&self) -> bool {
        self.first_break.is_none()
    }
}

/// Walks movements in sequence order and returns the first link that does not
/// follow from the previous one.
pub fn find_chain_break(movements: &[stock_movement::Model]) -> Option<ChainBreak> {
    let mut expected_before = 0;
    let mut expected_sequence = 1;

    for movement in movements {
        if movement.sequence != expected_sequence {
            return Some(ChainBreak::SequenceGap {
                expected: expected_sequence,
                found: movement.sequence,
            });
        }
        if movement.quantity_before != expected_before {
            return Some(ChainBreak::QuantityBeforeMismatch {
                sequence: movement.sequence,
                expected: expected_before,
                found: movement.quantity_before,
            });
        }
        if !movement.is_consistent() {
            return Some(ChainBreak::InconsistentEntry {
                sequence: movement.sequence,
            });
        }

        expected_before = movement.quantity_after;
        expected_sequence += 1;
    }

    None
}

/// Append-only stock ledger.
#[derive(Clone)]
pub struct StockLedger {
    db: Arc<DatabaseConnection>,
    event_sender: Option<EventSender>,
    settings: ServiceSettings,
}

impl StockLedger {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Option<EventSender>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            db,
            event_sender,
            settings,
        }
    }

    /// Appends a movement and updates the product's cached quantity inside
    /// `txn`.
    ///
    /// The product row is locked first and stays locked until `txn` ends. An
    /// OUT that would take stock below zero fails with `InsufficientStock`; a
    /// cache that no longer matches the ledger fails with `Conflict` and has
    /// to be reconciled before anything else is posted.
    #[instrument(
        skip(self, txn, movement),
        fields(
            product_id = %movement.product_id,
            movement_type = %movement.movement_type,
            quantity = movement.quantity
        )
    )]
    pub async fn append(
        &self,
        txn: &DatabaseTransaction,
        movement: NewMovement,
    ) -> Result<Posting, ServiceError> {
        let product = lock_product(txn, movement.product_id).await?;

        let last = StockMovementEntity::find()
            .filter(stock_movement::Column::ProductId.eq(movement.product_id))
            .order_by_desc(stock_movement::Column::Sequence)
            .one(txn)
            .await?;
        let (ledger_quantity, next_sequence) = last
            .as_ref()
            .map(|m| (m.quantity_after, m.sequence + 1))
            .unwrap_or((0, 1));

        if product.stock_quantity != ledger_quantity {
            counter!("inventory.reconcile.drift", 1);
            warn!(
                cached = product.stock_quantity,
                ledger = ledger_quantity,
                "Cached stock disagrees with ledger"
            );
            return Err(ServiceError::Conflict(format!(
                "Cached stock {} for product {} disagrees with ledger quantity {}; reconcile or run verify_chain before posting",
                product.stock_quantity, product.id, ledger_quantity
            )));
        }

        let quantity_before = product.stock_quantity;
        let quantity_after = movement
            .movement_type
            .apply(quantity_before, movement.quantity)
            .map_err(|e| {
                if let ServiceError::InsufficientStock(_) = e {
                    counter!("inventory.ledger.insufficient_stock", 1);
                    warn!(available = quantity_before, "Rejected movement: insufficient stock");
                }
                e
            })?;

        let unit_cost = movement.unit_cost.unwrap_or(product.cost_price);
        let total_value = extended_value(unit_cost, movement.quantity)?;
        let now = Utc::now();

        let entry = stock_movement::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product.id),
            sequence: Set(next_sequence),
            movement_type: Set(movement.movement_type),
            reference_type: Set(movement.reference_type),
            reference_id: Set(movement.reference_id),
            quantity_before: Set(quantity_before),
            quantity_moved: Set(movement.quantity),
            quantity_after: Set(quantity_after),
            unit_cost: Set(unit_cost),
            total_value: Set(total_value),
            notes: Set(movement.notes),
            created_by: Set(movement.actor),
            created_at: Set(now),
        }
        .insert(txn)
        .await?;

        let product = store_quantity(txn, product, quantity_after, now).await?;

        counter!(
            "inventory.ledger.append",
            1,
            "movement_type" => movement.movement_type.to_string()
        );
        info!(
            movement_id = %entry.id,
            sequence = entry.sequence,
            quantity_before,
            quantity_after,
            "Stock movement appended"
        );

        Ok(Posting {
            movement: entry,
            product,
        })
    }

    /// Posts a single movement in its own transaction.
    #[instrument(skip(self, movement), fields(product_id = %movement.product_id))]
    pub async fn record_movement(
        &self,
        movement: NewMovement,
    ) -> Result<stock_movement::Model, ServiceError> {
        if movement.quantity <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "Movement quantity must be positive, got {}",
                movement.quantity
            )));
        }

        let txn = self.db.begin().await?;
        let posting = self.append(&txn, movement).await?;
        txn.commit().await?;

        publish(&self.event_sender, posting.events()).await;
        Ok(posting.movement)
    }

    /// Movement history, newest first. `page` is 1-based; `limit` defaults to
    /// and is capped by the configured page sizes.
    #[instrument(skip(self))]
    pub async fn history(
        &self,
        product_id: Uuid,
        page: u64,
        limit: Option<u64>,
    ) -> Result<MovementPage, ServiceError> {
        if page == 0 {
            return Err(ServiceError::ValidationError(
                "History pages start at 1".to_string(),
            ));
        }
        let limit = self.settings.history_limit(limit);
        self.ensure_product(product_id).await?;

        let paginator = StockMovementEntity::find()
            .filter(stock_movement::Column::ProductId.eq(product_id))
            .order_by_desc(stock_movement::Column::CreatedAt)
            .order_by_desc(stock_movement::Column::Sequence)
            .paginate(&*self.db, limit);

        let counts = paginator.num_items_and_pages().await?;
        let movements = paginator.fetch_page(page - 1).await?;

        Ok(MovementPage {
            movements,
            page,
            limit,
            total_items: counts.number_of_items,
            total_pages: counts.number_of_pages,
        })
    }

    /// Lazy pager over the full history of a product.
    pub fn history_stream(&self, product_id: Uuid, page_size: Option<u64>) -> MovementHistory {
        MovementHistory::new(
            self.db.clone(),
            product_id,
            self.settings.history_limit(page_size),
        )
    }

    /// Checks that every entry starts where the previous one ended.
    #[instrument(skip(self))]
    pub async fn verify_chain(&self, product_id: Uuid) -> Result<ChainVerification, ServiceError> {
        self.ensure_product(product_id).await?;

        let movements = StockMovementEntity::find()
            .filter(stock_movement::Column::ProductId.eq(product_id))
            .order_by_asc(stock_movement::Column::Sequence)
            .all(&*self.db)
            .await?;

        let first_break = find_chain_break(&movements);
        if let Some(chain_break) = &first_break {
            warn!(%product_id, ?chain_break, "Stock ledger chain is broken");
        }

        Ok(ChainVerification {
            product_id,
            entries: movements.len() as u64,
            final_quantity: movements.last().map(|m| m.quantity_after).unwrap_or(0),
            first_break,
        })
    }

    async fn ensure_product(&self, product_id: Uuid) -> Result<(), ServiceError> {
        product::Entity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .map(|_| ())
            .ok_or_else(|| ServiceError::not_found("Product", product_id))
    }
}

/// Keyset pager over a product's movements in descending sequence order.
///
/// Each call to [`MovementHistory::next_page`] runs one query; [`MovementHistory::rewind`]
/// starts again from the newest entry.
pub struct MovementHistory {
    db: Arc<DatabaseConnection>,
    product_id: Uuid,
    page_size: u64,
    cursor: Option<i64>,
    exhausted: bool,
}

impl MovementHistory {
    fn new(db: Arc<DatabaseConnection>, product_id: Uuid, page_size: u64) -> Self {
        Self {
            db,
            product_id,
            page_size,
            cursor: None,
            exhausted: false,
        }
    }

    pub async fn next_page(&mut self) -> Result<Option<Vec<stock_movement::Model>>, ServiceError> {
        if self.exhausted {
            return Ok(None);
        }

        let mut query = StockMovementEntity::find()
            .filter(stock_movement::Column::ProductId.eq(self.product_id))
            .order_by_desc(stock_movement::Column::Sequence)
            .limit(self.page_size);
        if let Some(cursor) = self.cursor {
            query = query.filter(stock_movement::Column::Sequence.lt(cursor));
        }

        let movements = query.all(&*self.db).await?;
        if (movements.len() as u64) < self.page_size {
            self.exhausted = true;
        }

        match movements.last() {
            Some(oldest) => {
                self.cursor = Some(oldest.sequence);
                Ok(Some(movements))
            }
            None => Ok(None),
        }
    }

    pub fn rewind(&mut self) {
        self.cursor = None;
        self.exhausted = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movement(
        sequence: i64,
        movement_type: MovementType,
        before: i32,
        moved: i32,
        after: i32,
    ) -> stock_movement::Model {
        stock_movement::Model {
            id: Uuid::new_v4(),
            product_id: Uuid::nil(),
            sequence,
            movement_type,
            reference_type: ReferenceType::Purchase,
            reference_id: None,
            quantity_before: before,
            quantity_moved: moved,
            quantity_after: after,
            unit_cost: Decimal::ONE,
            total_value: Decimal::from(moved),
            notes: None,
            created_by: Uuid::nil(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn intact_chain_has_no_break() {
        let chain = vec![
            movement(1, MovementType::In, 0, 50, 50),
            movement(2, MovementType::Out, 50, 8, 42),
            movement(3, MovementType::In, 42, 0, 42),
        ];
        assert_eq!(find_chain_break(&chain), None);
    }

    #[test]
    fn detects_quantity_before_mismatch() {
        let chain = vec![
            movement(1, MovementType::In, 0, 50, 50),
            movement(2, MovementType::Out, 45, 5, 40),
        ];
        assert_eq!(
            find_chain_break(&chain),
            Some(ChainBreak::QuantityBeforeMismatch {
                sequence: 2,
                expected: 50,
                found: 45
            })
        );
    }

    #[test]
    fn detects_sequence_gap() {
        let chain = vec![
            movement(1, MovementType::In, 0, 5, 5),
            movement(3, MovementType::In, 5, 5, 10),
        ];
        assert_eq!(
            find_chain_break(&chain),
            Some(ChainBreak::SequenceGap {
                expected: 2,
                found: 3
            })
        );
    }

    #[test]
    fn detects_bad_arithmetic() {
        let chain = vec![movement(1, MovementType::Out, 0, 5, 5)];
        assert_eq!(
            find_chain_break(&chain),
            Some(ChainBreak::InconsistentEntry { sequence: 1 })
        );
    }

    #[test]
    fn low_stock_event_follows_posting() {
        let moved = movement(2, MovementType::Out, 6, 4, 2);
        let product = product::Model {
            id: Uuid::nil(),
            code: "OIL-5W30".into(),
            name: "Engine oil".into(),
            stock_quantity: 2,
            cost_price: Decimal::ONE,
            min_stock: 3,
            max_stock: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let events = Posting {
            movement: moved,
            product,
        }
        .events();

        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], Event::LowStock { stock_quantity: 2, min_stock: 3, .. }));
    }
}
