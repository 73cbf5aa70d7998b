//! Command handlers for the Ordering context.
//!
//! Each handler runs inside a unit of work supplied by the caller: load the
//! aggregate, execute the command, write it back through the store. The
//! store's persistence callbacks put the resulting messages into the unit;
//! nothing is dispatched until the transaction commits.

use unitwork_core::clock::Clock;
use unitwork_core::unit_of_work::UnitOfWork;
use uuid::Uuid;

use crate::domain::aggregates::{Order, OrderLine};
use crate::domain::commands::{CancelOrder, Command, PlaceOrder};
use crate::error::OrderingError;
use crate::infrastructure::store::InMemoryStore;

/// Result of a successfully handled command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderingCommandResult {
    /// The aggregate ID affected by the command.
    pub aggregate_id: Uuid,
}

/// Handles the `PlaceOrder` command: creates the order and inserts it.
///
/// # Errors
///
/// Returns `OrderingError::Domain` if a line is invalid, or
/// `OrderingError::UnitOfWork` if the order has no lines (its pre-persist
/// hook vetoes the insert).
pub fn handle_place_order(
    command: &PlaceOrder,
    clock: &dyn Clock,
    unit: &UnitOfWork,
    orders: &InMemoryStore<Order>,
) -> Result<OrderingCommandResult, OrderingError> {
    tracing::debug!(
        command_type = command.command_type(),
        correlation_id = %command.correlation_id(),
        transaction_id = %unit.transaction_id(),
        "handling command"
    );
    let lines = command
        .lines
        .iter()
        .map(|line| OrderLine {
            stock_item_id: line.stock_item_id,
            quantity: line.quantity,
        })
        .collect();
    let mut order = Order::place(
        command.order_id,
        command.customer_id,
        lines,
        command.correlation_id,
        clock,
    )?;

    orders.insert(unit, &mut order)?;

    Ok(OrderingCommandResult {
        aggregate_id: order.id,
    })
}

/// Handles the `CancelOrder` command: loads the order, cancels it, and
/// writes it back.
///
/// # Errors
///
/// Returns `OrderingError::Domain` if the order does not exist or is
/// already cancelled.
pub fn handle_cancel_order(
    command: &CancelOrder,
    clock: &dyn Clock,
    unit: &UnitOfWork,
    orders: &InMemoryStore<Order>,
) -> Result<OrderingCommandResult, OrderingError> {
    tracing::debug!(
        command_type = command.command_type(),
        correlation_id = %command.correlation_id(),
        transaction_id = %unit.transaction_id(),
        "handling command"
    );
    let mut order = orders.load(unit, command.order_id)?;

    order.cancel(&command.reason, command.correlation_id, clock)?;
    orders.update(unit, &mut order)?;

    Ok(OrderingCommandResult {
        aggregate_id: order.id,
    })
}
