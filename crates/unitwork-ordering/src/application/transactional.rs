//! Runs application work inside a local transaction.

use unitwork_core::manager::UnitOfWorkManager;
use unitwork_core::transaction::{LocalTransaction, Transaction};
use unitwork_core::unit_of_work::UnitOfWork;

use crate::error::OrderingError;

/// Begins a transaction, hands its unit of work to `work`, and commits if
/// `work` succeeds. Any error from `work` rolls the transaction back, so
/// none of its messages are dispatched and none of its staged writes apply.
///
/// # Errors
///
/// Returns the error of `work`, or `OrderingError::Transaction` if the
/// commit itself rolled back (a dispatch failure or an exhausted cascade).
pub async fn in_transaction<T, F>(manager: &UnitOfWorkManager, work: F) -> Result<T, OrderingError>
where
    F: FnOnce(&UnitOfWork) -> Result<T, OrderingError>,
{
    let tx = LocalTransaction::begin();
    let outcome = manager
        .current_unit_of_work(&tx)
        .map_err(OrderingError::from)
        .and_then(|unit| work(&unit));

    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(error) => {
            tracing::warn!(transaction_id = %tx.id(), %error, "rolling back");
            tx.rollback().await?;
            Err(error)
        }
    }
}
