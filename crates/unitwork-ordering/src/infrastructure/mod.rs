//! Persistence adapters for the Ordering context.

pub mod store;
