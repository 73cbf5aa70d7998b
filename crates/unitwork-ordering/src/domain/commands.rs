//! Commands for the Ordering context.

use uuid::Uuid;

/// Trait that all commands implement.
pub trait Command: Send + Sync + std::fmt::Debug {
    /// The type name for this command (for logging/routing).
    fn command_type(&self) -> &'static str;

    /// Correlation ID to trace this command through the system.
    fn correlation_id(&self) -> Uuid;
}

/// One requested line of a new order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderLineRequest {
    /// The stock item to order.
    pub stock_item_id: Uuid,
    /// Units to order.
    pub quantity: u32,
}

/// Command to place a new order.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The identifier the new order gets.
    pub order_id: Uuid,
    /// The ordering customer.
    pub customer_id: Uuid,
    /// The requested lines.
    pub lines: Vec<OrderLineRequest>,
}

impl Command for PlaceOrder {
    fn command_type(&self) -> &'static str {
        "ordering.place_order"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}

/// Command to cancel an existing order.
#[derive(Debug, Clone)]
pub struct CancelOrder {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The order identifier.
    pub order_id: Uuid,
    /// Why the order is cancelled.
    pub reason: String,
}

impl Command for CancelOrder {
    fn command_type(&self) -> &'static str {
        "ordering.cancel_order"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}
