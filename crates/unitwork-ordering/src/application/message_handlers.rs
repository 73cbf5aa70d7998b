//! In-process message handlers for the Ordering context.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use unitwork_core::clock::Clock;
use unitwork_core::dispatcher::MessageHandler;
use unitwork_core::error::DispatchError;
use unitwork_core::message::{Message, MessagePayload};
use unitwork_core::unit_of_work::UnitOfWork;
use uuid::Uuid;

use crate::domain::aggregates::StockItem;
use crate::domain::events::{OrderPlaced, OrderingEventKind};
use crate::error::OrderingError;
use crate::infrastructure::store::InMemoryStore;

/// Reserves stock for every line of a placed order, in the placing
/// transaction.
///
/// Each stock update lands in the unit being drained, so the
/// `aggregate.post_updated` and `inventory.stock_reserved` messages it
/// produces are dispatched in the next cycle. A shortage fails the batch
/// and rolls the whole transaction back.
pub struct ReserveStockOnOrderPlaced {
    stock: Arc<InMemoryStore<StockItem>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ReserveStockOnOrderPlaced {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReserveStockOnOrderPlaced")
            .field("stock", &self.stock)
            .finish_non_exhaustive()
    }
}

impl ReserveStockOnOrderPlaced {
    /// Creates the handler over the stock table.
    #[must_use]
    pub fn new(stock: Arc<InMemoryStore<StockItem>>, clock: Arc<dyn Clock>) -> Self {
        Self { stock, clock }
    }

    fn reserve(
        &self,
        placed: &OrderPlaced,
        correlation_id: Uuid,
        unit: &UnitOfWork,
    ) -> Result<(), OrderingError> {
        for line in &placed.lines {
            let mut item = self.stock.load(unit, line.stock_item_id)?;
            item.reserve(
                placed.order_id,
                line.quantity,
                correlation_id,
                self.clock.as_ref(),
            )?;
            self.stock.update(unit, &mut item)?;
        }
        Ok(())
    }
}

fn decode_order_placed(message: &Message) -> Result<OrderPlaced, DispatchError> {
    let MessagePayload::Domain(body) = message.payload() else {
        return Err(DispatchError::Delivery(format!(
            "{} is not a domain message",
            message.metadata().message_id
        )));
    };
    match serde_json::from_value(body.clone()) {
        Ok(OrderingEventKind::OrderPlaced(placed)) => Ok(placed),
        Ok(other) => Err(DispatchError::Delivery(format!(
            "expected order.placed, got {}",
            other.event_type()
        ))),
        Err(e) => Err(DispatchError::Delivery(format!(
            "malformed order.placed payload: {e}"
        ))),
    }
}

#[async_trait]
impl MessageHandler for ReserveStockOnOrderPlaced {
    async fn handle(&self, message: &Message, unit: &UnitOfWork) -> Result<(), DispatchError> {
        let placed = decode_order_placed(message)?;
        let correlation_id = message
            .metadata()
            .correlation_id
            .unwrap_or(placed.order_id);
        tracing::debug!(
            transaction_id = %unit.transaction_id(),
            order_id = %placed.order_id,
            lines = placed.lines.len(),
            "reserving stock"
        );
        self.reserve(&placed, correlation_id, unit)
            .map_err(|e| DispatchError::Delivery(e.to_string()))
    }
}

/// Records the type of every message it sees, in delivery order.
#[derive(Debug, Default)]
pub struct DispatchJournal {
    entries: Mutex<Vec<String>>,
}

impl DispatchJournal {
    /// Returns the recorded message types.
    #[must_use]
    pub fn message_types(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns and forgets the recorded message types.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.entries.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[async_trait]
impl MessageHandler for DispatchJournal {
    async fn handle(&self, message: &Message, unit: &UnitOfWork) -> Result<(), DispatchError> {
        tracing::info!(
            transaction_id = %unit.transaction_id(),
            message_type = message.message_type(),
            aggregate_id = ?message.metadata().aggregate_id,
            "message delivered"
        );
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.message_type().to_owned());
        Ok(())
    }
}
