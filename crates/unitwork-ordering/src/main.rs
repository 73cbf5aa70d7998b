//! Ordering demo: places and cancels one order and prints what was dispatched.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use unitwork_core::clock::{Clock, SystemClock};
use unitwork_core::config::UnitOfWorkConfig;
use unitwork_core::dispatcher::{ANY_MESSAGE_TYPE, InProcessDispatcher, TimeoutDispatcher};
use unitwork_core::listener::AggregateListener;
use unitwork_core::manager::UnitOfWorkManager;
use unitwork_ordering::application::command_handlers::{handle_cancel_order, handle_place_order};
use unitwork_ordering::application::message_handlers::{
    DispatchJournal, ReserveStockOnOrderPlaced,
};
use unitwork_ordering::application::transactional::in_transaction;
use unitwork_ordering::domain::aggregates::{Order, StockItem};
use unitwork_ordering::domain::commands::{CancelOrder, OrderLineRequest, PlaceOrder};
use unitwork_ordering::domain::events::ORDER_PLACED_EVENT_TYPE;
use unitwork_ordering::infrastructure::store::InMemoryStore;
use uuid::Uuid;

const DISPATCH_TIMEOUT_ENV: &str = "UNITWORK_DISPATCH_TIMEOUT_MS";

fn print_dispatched(label: &str, journal: &DispatchJournal) {
    println!("{label}:");
    for message_type in journal.take() {
        println!("  {message_type}");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize tracing subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting ordering demo");

    // Read configuration from environment.
    let config = UnitOfWorkConfig::from_env()?;
    let dispatch_timeout_ms: u64 = std::env::var(DISPATCH_TIMEOUT_ENV)
        .unwrap_or_else(|_| "5000".to_string())
        .parse()
        .map_err(|e| format!("{DISPATCH_TIMEOUT_ENV} must be a number of milliseconds: {e}"))?;
    tracing::info!(
        max_cascade_cycles = config.max_cascade_cycles,
        dispatch_timeout_ms,
        "configuration loaded"
    );

    // Wire stores, handlers, and the unit-of-work manager.
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let listener = AggregateListener::new(Arc::clone(&clock));
    let orders = InMemoryStore::<Order>::new(listener.clone());
    let stock = Arc::new(InMemoryStore::<StockItem>::new(listener));
    let journal = Arc::new(DispatchJournal::default());
    let dispatcher = InProcessDispatcher::new()
        .subscribe(ANY_MESSAGE_TYPE, journal.clone())
        .subscribe(
            ORDER_PLACED_EVENT_TYPE,
            Arc::new(ReserveStockOnOrderPlaced::new(
                Arc::clone(&stock),
                Arc::clone(&clock),
            )),
        );
    let manager = UnitOfWorkManager::new(
        Arc::new(TimeoutDispatcher::new(
            dispatcher,
            Duration::from_millis(dispatch_timeout_ms),
        )),
        config,
    );

    // Seed stock.
    let widget = Uuid::new_v4();
    let gadget = Uuid::new_v4();
    in_transaction(&manager, |unit| {
        stock.insert(unit, &mut StockItem::new(widget, "WIDGET-1", 10))?;
        stock.insert(unit, &mut StockItem::new(gadget, "GADGET-7", 3))
    })
    .await?;
    print_dispatched("seed stock", &journal);

    // Place an order.
    let place = PlaceOrder {
        correlation_id: Uuid::new_v4(),
        order_id: Uuid::new_v4(),
        customer_id: Uuid::new_v4(),
        lines: vec![
            OrderLineRequest {
                stock_item_id: widget,
                quantity: 4,
            },
            OrderLineRequest {
                stock_item_id: gadget,
                quantity: 1,
            },
        ],
    };
    let placed = in_transaction(&manager, |unit| {
        handle_place_order(&place, clock.as_ref(), unit, &orders)
    })
    .await?;
    print_dispatched("place order", &journal);

    // Cancel it again.
    let cancel = CancelOrder {
        correlation_id: Uuid::new_v4(),
        order_id: placed.aggregate_id,
        reason: "customer request".to_owned(),
    };
    in_transaction(&manager, |unit| {
        handle_cancel_order(&cancel, clock.as_ref(), unit, &orders)
    })
    .await?;
    print_dispatched("cancel order", &journal);

    for (name, id) in [("WIDGET-1", widget), ("GADGET-7", gadget)] {
        if let Some(item) = stock.snapshot(id) {
            println!("{name}: {} available of {}", item.available(), item.on_hand());
        }
    }

    tracing::info!(active_units = manager.active_units(), "ordering demo finished");
    Ok(())
}
