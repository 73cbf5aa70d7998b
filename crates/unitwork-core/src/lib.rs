//! Unitwork Core — transactional unit-of-work coordination.
//!
//! Binds per-transaction state (tracked aggregates and pending messages) to a
//! transaction's lifecycle. Persistence callbacks move aggregates through the
//! [`lifecycle`] state machine and register the results with the transaction's
//! [`unit_of_work::UnitOfWork`]. At `before_completion` the unit drains its
//! queue into a [`dispatcher::MessageDispatcher`], tolerating messages that
//! dispatch itself registers, up to a bounded number of cycles.

pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod listener;
pub mod manager;
pub mod message;
pub mod transaction;
pub mod unit_of_work;
