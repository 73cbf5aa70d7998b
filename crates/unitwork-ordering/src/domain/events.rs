//! Domain events for the Ordering context.

use serde::{Deserialize, Serialize};
use unitwork_core::message::{DomainEvent, MessageMetadata};
use uuid::Uuid;

/// Event type of [`OrderPlaced`].
pub const ORDER_PLACED_EVENT_TYPE: &str = "order.placed";
/// Event type of [`OrderCancelled`].
pub const ORDER_CANCELLED_EVENT_TYPE: &str = "order.cancelled";
/// Event type of [`StockReserved`].
pub const STOCK_RESERVED_EVENT_TYPE: &str = "inventory.stock_reserved";

/// One reserved line of a placed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedLine {
    /// The stock item to reserve from.
    pub stock_item_id: Uuid,
    /// Units ordered.
    pub quantity: u32,
}

/// Emitted when an order is placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    /// The order identifier.
    pub order_id: Uuid,
    /// The ordering customer.
    pub customer_id: Uuid,
    /// The ordered lines.
    pub lines: Vec<PlacedLine>,
}

/// Emitted when an order is cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    /// The order identifier.
    pub order_id: Uuid,
    /// Why the order was cancelled.
    pub reason: String,
}

/// Emitted when stock is set aside for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReserved {
    /// The stock item identifier.
    pub stock_item_id: Uuid,
    /// The order the stock is reserved for.
    pub order_id: Uuid,
    /// Units reserved.
    pub quantity: u32,
    /// Units still available after the reservation.
    pub remaining: u32,
}

/// Event payload variants for the Ordering context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderingEventKind {
    /// An order has been placed.
    OrderPlaced(OrderPlaced),
    /// An order has been cancelled.
    OrderCancelled(OrderCancelled),
    /// Stock has been reserved for an order.
    StockReserved(StockReserved),
}

/// Domain event envelope for the Ordering context.
#[derive(Debug, Clone)]
pub struct OrderingEvent {
    /// Event metadata.
    pub metadata: MessageMetadata,
    /// Event-specific payload.
    pub kind: OrderingEventKind,
}

impl OrderingEventKind {
    /// Returns the routing type of this payload.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::OrderPlaced(_) => ORDER_PLACED_EVENT_TYPE,
            Self::OrderCancelled(_) => ORDER_CANCELLED_EVENT_TYPE,
            Self::StockReserved(_) => STOCK_RESERVED_EVENT_TYPE,
        }
    }
}

impl DomainEvent for OrderingEvent {
    fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    fn to_payload(&self) -> serde_json::Value {
        // Serialization of derived Serialize types to Value is infallible.
        serde_json::to_value(&self.kind).expect("OrderingEventKind serialization is infallible")
    }

    fn metadata(&self) -> &MessageMetadata {
        &self.metadata
    }
}
