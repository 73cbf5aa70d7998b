//! Aggregate roots for the Ordering context.
//!
//! Both aggregates embed an [`AggregateLifecycle`] and raise their domain
//! events into it; the events reach the unit of work when the store
//! reports the aggregate's next `POST_*` transition.

use unitwork_core::clock::Clock;
use unitwork_core::error::DomainError;
use unitwork_core::lifecycle::{AggregateLifecycle, LifecycleAware};
use unitwork_core::listener::PersistentEntity;
use unitwork_core::message::{Message, MessageMetadata};
use uuid::Uuid;

use super::events::{
    OrderCancelled, OrderPlaced, OrderingEvent, OrderingEventKind, PlacedLine, StockReserved,
};

/// Aggregate type name of [`Order`].
pub const ORDER_AGGREGATE_TYPE: &str = "order";
/// Aggregate type name of [`StockItem`].
pub const STOCK_ITEM_AGGREGATE_TYPE: &str = "stock_item";

fn raise(
    lifecycle: &mut AggregateLifecycle,
    aggregate_id: Uuid,
    correlation_id: Uuid,
    kind: OrderingEventKind,
    clock: &dyn Clock,
) {
    let event = OrderingEvent {
        metadata: MessageMetadata {
            message_id: Uuid::new_v4(),
            message_type: kind.event_type().to_owned(),
            aggregate_id: Some(aggregate_id),
            correlation_id: Some(correlation_id),
            occurred_at: clock.now(),
        },
        kind,
    };
    lifecycle.raise(Message::from_event(&event));
}

/// One line of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderLine {
    /// The stock item ordered.
    pub stock_item_id: Uuid,
    /// Units ordered.
    pub quantity: u32,
}

/// Where an order is in its business life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    /// Accepted and awaiting fulfilment.
    Placed,
    /// Withdrawn by the customer or the shop.
    Cancelled,
}

/// The aggregate root for a customer order.
#[derive(Debug, Clone)]
pub struct Order {
    /// Aggregate identifier.
    pub id: Uuid,
    customer_id: Uuid,
    lines: Vec<OrderLine>,
    status: OrderStatus,
    lifecycle: AggregateLifecycle,
}

impl Order {
    /// Places a new order, raising `OrderPlaced`.
    ///
    /// An order without lines is accepted here but cannot be persisted.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if any line has a zero quantity.
    pub fn place(
        id: Uuid,
        customer_id: Uuid,
        lines: Vec<OrderLine>,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<Self, DomainError> {
        if let Some(line) = lines.iter().find(|line| line.quantity == 0) {
            return Err(DomainError::Validation(format!(
                "order {id} requests zero units of stock item {}",
                line.stock_item_id
            )));
        }

        let mut order = Self {
            id,
            customer_id,
            lines,
            status: OrderStatus::Placed,
            lifecycle: AggregateLifecycle::new(),
        };
        let placed = OrderPlaced {
            order_id: id,
            customer_id,
            lines: order
                .lines
                .iter()
                .map(|line| PlacedLine {
                    stock_item_id: line.stock_item_id,
                    quantity: line.quantity,
                })
                .collect(),
        };
        raise(
            &mut order.lifecycle,
            id,
            correlation_id,
            OrderingEventKind::OrderPlaced(placed),
            clock,
        );
        Ok(order)
    }

    /// Cancels the order, raising `OrderCancelled`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the order is already cancelled.
    pub fn cancel(
        &mut self,
        reason: &str,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        if self.status == OrderStatus::Cancelled {
            return Err(DomainError::Validation(format!(
                "order {} is already cancelled",
                self.id
            )));
        }
        self.status = OrderStatus::Cancelled;
        raise(
            &mut self.lifecycle,
            self.id,
            correlation_id,
            OrderingEventKind::OrderCancelled(OrderCancelled {
                order_id: self.id,
                reason: reason.to_owned(),
            }),
            clock,
        );
        Ok(())
    }

    /// Returns the ordering customer.
    #[must_use]
    pub fn customer_id(&self) -> Uuid {
        self.customer_id
    }

    /// Returns the order lines.
    #[must_use]
    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    /// Returns the business status.
    #[must_use]
    pub fn status(&self) -> OrderStatus {
        self.status
    }
}

impl LifecycleAware for Order {
    fn aggregate_id(&self) -> Uuid {
        self.id
    }

    fn aggregate_type(&self) -> &'static str {
        ORDER_AGGREGATE_TYPE
    }

    fn lifecycle(&self) -> &AggregateLifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut AggregateLifecycle {
        &mut self.lifecycle
    }

    fn on_pre_preserve(&mut self) -> Result<(), DomainError> {
        if self.lines.is_empty() {
            return Err(DomainError::Validation(format!(
                "order {} has no lines",
                self.id
            )));
        }
        Ok(())
    }

    fn on_pre_destroy(&mut self) -> Result<(), DomainError> {
        if self.status != OrderStatus::Cancelled {
            return Err(DomainError::Validation(format!(
                "order {} must be cancelled before removal",
                self.id
            )));
        }
        Ok(())
    }
}

impl PersistentEntity for Order {
    fn as_lifecycle_aware(&mut self) -> Option<&mut dyn LifecycleAware> {
        Some(self)
    }
}

/// The aggregate root for the stock of one product.
#[derive(Debug, Clone)]
pub struct StockItem {
    /// Aggregate identifier.
    pub id: Uuid,
    sku: String,
    on_hand: u32,
    reserved: u32,
    lifecycle: AggregateLifecycle,
}

impl StockItem {
    /// Creates a stock item holding `on_hand` units and no reservations.
    #[must_use]
    pub fn new(id: Uuid, sku: impl Into<String>, on_hand: u32) -> Self {
        Self {
            id,
            sku: sku.into(),
            on_hand,
            reserved: 0,
            lifecycle: AggregateLifecycle::new(),
        }
    }

    /// Sets `quantity` units aside for `order_id`, raising `StockReserved`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if `quantity` is zero or exceeds
    /// the available units.
    pub fn reserve(
        &mut self,
        order_id: Uuid,
        quantity: u32,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        if quantity == 0 {
            return Err(DomainError::Validation(format!(
                "cannot reserve zero units of {}",
                self.sku
            )));
        }
        let available = self.available();
        if quantity > available {
            return Err(DomainError::Validation(format!(
                "insufficient stock for {}: requested {quantity}, available {available}",
                self.sku
            )));
        }
        self.reserved += quantity;
        let remaining = self.available();
        raise(
            &mut self.lifecycle,
            self.id,
            correlation_id,
            OrderingEventKind::StockReserved(StockReserved {
                stock_item_id: self.id,
                order_id,
                quantity,
                remaining,
            }),
            clock,
        );
        Ok(())
    }

    /// Returns the stock keeping unit.
    #[must_use]
    pub fn sku(&self) -> &str {
        &self.sku
    }

    /// Returns the units physically held.
    #[must_use]
    pub fn on_hand(&self) -> u32 {
        self.on_hand
    }

    /// Returns the units set aside for orders.
    #[must_use]
    pub fn reserved(&self) -> u32 {
        self.reserved
    }

    /// Returns the units still free to reserve.
    #[must_use]
    pub fn available(&self) -> u32 {
        self.on_hand.saturating_sub(self.reserved)
    }
}

impl LifecycleAware for StockItem {
    fn aggregate_id(&self) -> Uuid {
        self.id
    }

    fn aggregate_type(&self) -> &'static str {
        STOCK_ITEM_AGGREGATE_TYPE
    }

    fn lifecycle(&self) -> &AggregateLifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut AggregateLifecycle {
        &mut self.lifecycle
    }

    fn on_pre_preserve(&mut self) -> Result<(), DomainError> {
        if self.reserved > self.on_hand {
            return Err(DomainError::Validation(format!(
                "stock item {} reserves more than it holds",
                self.sku
            )));
        }
        Ok(())
    }
}

impl PersistentEntity for StockItem {
    fn as_lifecycle_aware(&mut self) -> Option<&mut dyn LifecycleAware> {
        Some(self)
    }
}
