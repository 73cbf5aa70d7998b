//! Unitwork — Ordering bounded context.
//!
//! A small order-taking domain wired to the unit-of-work coordinator:
//! placing an order inserts it through the in-memory store, and the
//! `order.placed` message reserves stock in the same transaction.

pub mod application;
pub mod domain;
pub mod error;
pub mod infrastructure;
