//! Domain model for the Ordering context.

pub mod aggregates;
pub mod commands;
pub mod events;
