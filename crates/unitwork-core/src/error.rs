//! Error types for the unit-of-work coordinator.

use thiserror::Error;
use uuid::Uuid;

use crate::lifecycle::Lifecycle;
use crate::transaction::TransactionId;

/// Domain error raised by aggregate hooks and business methods.
#[derive(Debug, Error)]
pub enum DomainError {
    /// A validation error in domain logic.
    #[error("validation error: {0}")]
    Validation(String),

    /// An aggregate was not found.
    #[error("aggregate not found: {0}")]
    AggregateNotFound(Uuid),
}

/// Error raised by a [`MessageDispatcher`](crate::dispatcher::MessageDispatcher).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// A downstream handler rejected or failed to deliver a message.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// Delivery did not finish within the configured timeout.
    #[error("delivery timed out after {0} ms")]
    TimedOut(u128),
}

/// Errors surfaced by the unit of work, its manager, and the lifecycle bridge.
///
/// Every variant except [`UnitOfWorkError::LifecycleViolation`] and
/// [`UnitOfWorkError::PreHookRejected`] is fatal for the owning transaction:
/// the transaction manager converts it into a rollback.
#[derive(Debug, Error)]
pub enum UnitOfWorkError {
    /// A unit of work was requested outside an active transaction.
    #[error("no active transaction")]
    NoActiveTransaction,

    /// The requested lifecycle transition is not reachable from the current state.
    #[error("lifecycle violation on aggregate {aggregate_id}: {from} -> {to}")]
    LifecycleViolation {
        /// The aggregate whose transition was rejected.
        aggregate_id: Uuid,
        /// The state the aggregate is in.
        from: Lifecycle,
        /// The state that was requested.
        to: Lifecycle,
    },

    /// A pre-transition hook rejected the transition.
    #[error("pre-{to} hook rejected aggregate {aggregate_id}: {source}")]
    PreHookRejected {
        /// The aggregate whose hook failed.
        aggregate_id: Uuid,
        /// The state that was requested.
        to: Lifecycle,
        /// The hook's error.
        #[source]
        source: DomainError,
    },

    /// Draining did not converge within the cascade bound.
    #[error("transaction {transaction_id}: messages still pending after {max_cycles} dispatch cycles")]
    CascadeLimitExceeded {
        /// The transaction whose drain failed.
        transaction_id: TransactionId,
        /// The configured cycle bound.
        max_cycles: usize,
    },

    /// The dispatcher failed to deliver a batch.
    #[error("transaction {transaction_id}: dispatch failed: {source}")]
    Dispatch {
        /// The transaction whose drain failed.
        transaction_id: TransactionId,
        /// The dispatcher's error.
        #[source]
        source: DispatchError,
    },

    /// The unit of work has already completed and accepts no more work.
    #[error("unit of work for transaction {0} is closed")]
    Closed(TransactionId),

    /// The transaction refused a synchronization.
    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

/// Errors raised by a transaction's own lifecycle.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// The transaction is no longer active.
    #[error("transaction {0} is not active")]
    NotActive(TransactionId),

    /// The transaction rolled back instead of committing.
    #[error("transaction {transaction_id} rolled back")]
    RolledBack {
        /// The transaction that rolled back.
        transaction_id: TransactionId,
        /// The failure that forced the rollback, if any.
        #[source]
        cause: Option<Box<UnitOfWorkError>>,
    },
}

/// Invalid configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment value could not be used.
    #[error("invalid {key}={value:?}: {reason}")]
    Invalid {
        /// The environment variable name.
        key: &'static str,
        /// The offending value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}
