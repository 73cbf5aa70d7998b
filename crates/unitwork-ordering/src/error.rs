//! Error type for the Ordering context.

use thiserror::Error;
use unitwork_core::error::{DomainError, TransactionError, UnitOfWorkError};
use uuid::Uuid;

/// Everything an ordering command can fail with.
#[derive(Debug, Error)]
pub enum OrderingError {
    /// A business rule rejected the command.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The unit of work refused a registration or a lifecycle transition.
    #[error(transparent)]
    UnitOfWork(#[from] UnitOfWorkError),

    /// The transaction rolled back instead of committing.
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// An insert collided with an existing row.
    #[error("{entity} {id} already exists")]
    AlreadyExists {
        /// The entity kind.
        entity: &'static str,
        /// The colliding identifier.
        id: Uuid,
    },
}
