//! Transaction contract consumed by the unit-of-work manager.
//!
//! The coordinator never drives commit itself. It subscribes a
//! [`Synchronization`] to whatever transaction owns the unit of work and
//! reacts to `before_completion` and `after_completion`.
//! [`LocalTransaction`] is a resource-local implementation for hosts without
//! an external transaction manager.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{TransactionError, UnitOfWorkError};

/// Identifies one transaction attempt. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Generates a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Status of a transaction as seen by its participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Open for work.
    Active,
    /// Open, but can only roll back.
    MarkedRollback,
    /// Committed.
    Committed,
    /// Rolled back.
    RolledBack,
}

impl TransactionStatus {
    /// Returns `true` while participants may still enlist work.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active | Self::MarkedRollback)
    }
}

/// Final outcome reported to `after_completion`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// The transaction committed.
    Committed,
    /// The transaction rolled back.
    RolledBack,
}

/// Callbacks a participant registers with a transaction.
#[async_trait]
pub trait Synchronization: Send + Sync {
    /// Called before the commit decision is finalized. An error forces rollback.
    async fn before_completion(&self) -> Result<(), UnitOfWorkError>;

    /// Called once the outcome is known. Always runs, whatever the outcome.
    async fn after_completion(&self, outcome: TransactionOutcome);
}

/// A transaction a unit of work can bind to.
pub trait Transaction: Send + Sync {
    /// Returns the identifier of this attempt.
    fn id(&self) -> TransactionId;

    /// Returns the current status.
    fn status(&self) -> TransactionStatus;

    /// Subscribes `synchronization` to this transaction's completion.
    ///
    /// # Errors
    ///
    /// Returns `TransactionError::NotActive` once the transaction has completed.
    fn register_synchronization(
        &self,
        synchronization: Arc<dyn Synchronization>,
    ) -> Result<(), TransactionError>;
}

/// A resource-local transaction that runs its synchronizations in-process.
pub struct LocalTransaction {
    id: TransactionId,
    status: Mutex<TransactionStatus>,
    synchronizations: Mutex<Vec<Arc<dyn Synchronization>>>,
}

impl fmt::Debug for LocalTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTransaction")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl LocalTransaction {
    /// Begins a new transaction.
    #[must_use]
    pub fn begin() -> Self {
        let id = TransactionId::new();
        tracing::debug!(transaction_id = %id, "transaction begun");
        Self {
            id,
            status: Mutex::new(TransactionStatus::Active),
            synchronizations: Mutex::new(Vec::new()),
        }
    }

    /// Marks the transaction so that commit rolls back instead.
    ///
    /// # Errors
    ///
    /// Returns `TransactionError::NotActive` if the transaction has completed.
    pub fn set_rollback_only(&self) -> Result<(), TransactionError> {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        if !status.is_active() {
            return Err(TransactionError::NotActive(self.id));
        }
        *status = TransactionStatus::MarkedRollback;
        Ok(())
    }

    /// Commits: runs every `before_completion`, then every `after_completion`.
    ///
    /// Synchronizations registered while `before_completion` callbacks run are
    /// included in the same pass.
    ///
    /// # Errors
    ///
    /// Returns `TransactionError::RolledBack` if the transaction was marked
    /// rollback-only or a `before_completion` failed (the failure is the
    /// cause), and `TransactionError::NotActive` if it already completed.
    pub async fn commit(&self) -> Result<(), TransactionError> {
        match self.status() {
            TransactionStatus::Active => {}
            TransactionStatus::MarkedRollback => {
                self.complete(TransactionOutcome::RolledBack).await;
                return Err(TransactionError::RolledBack {
                    transaction_id: self.id,
                    cause: None,
                });
            }
            TransactionStatus::Committed | TransactionStatus::RolledBack => {
                return Err(TransactionError::NotActive(self.id));
            }
        }

        let mut index = 0;
        while let Some(synchronization) = self.synchronization_at(index) {
            if let Err(err) = synchronization.before_completion().await {
                tracing::warn!(transaction_id = %self.id, error = %err, "before_completion failed, rolling back");
                self.complete(TransactionOutcome::RolledBack).await;
                return Err(TransactionError::RolledBack {
                    transaction_id: self.id,
                    cause: Some(Box::new(err)),
                });
            }
            index += 1;
        }

        self.complete(TransactionOutcome::Committed).await;
        Ok(())
    }

    /// Rolls back without running `before_completion`.
    ///
    /// # Errors
    ///
    /// Returns `TransactionError::NotActive` if the transaction already completed.
    pub async fn rollback(&self) -> Result<(), TransactionError> {
        if !self.status().is_active() {
            return Err(TransactionError::NotActive(self.id));
        }
        self.complete(TransactionOutcome::RolledBack).await;
        Ok(())
    }

    fn synchronization_at(&self, index: usize) -> Option<Arc<dyn Synchronization>> {
        self.synchronizations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index)
            .cloned()
    }

    async fn complete(&self, outcome: TransactionOutcome) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = match outcome {
            TransactionOutcome::Committed => TransactionStatus::Committed,
            TransactionOutcome::RolledBack => TransactionStatus::RolledBack,
        };
        tracing::debug!(transaction_id = %self.id, ?outcome, "transaction completed");

        let synchronizations = std::mem::take(
            &mut *self
                .synchronizations
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for synchronization in synchronizations {
            synchronization.after_completion(outcome).await;
        }
    }
}

impl Transaction for LocalTransaction {
    fn id(&self) -> TransactionId {
        self.id
    }

    fn status(&self) -> TransactionStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register_synchronization(
        &self,
        synchronization: Arc<dyn Synchronization>,
    ) -> Result<(), TransactionError> {
        if !self.status().is_active() {
            return Err(TransactionError::NotActive(self.id));
        }
        self.synchronizations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(synchronization);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[derive(Debug, Default)]
    struct Probe {
        fail_before: bool,
        before_calls: Mutex<usize>,
        outcomes: Mutex<Vec<TransactionOutcome>>,
        ran_after: AtomicBool,
    }

    #[async_trait]
    impl Synchronization for Probe {
        async fn before_completion(&self) -> Result<(), UnitOfWorkError> {
            *self.before_calls.lock().unwrap() += 1;
            if self.fail_before {
                return Err(UnitOfWorkError::NoActiveTransaction);
            }
            Ok(())
        }

        async fn after_completion(&self, outcome: TransactionOutcome) {
            self.outcomes.lock().unwrap().push(outcome);
            self.ran_after.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_commit_runs_before_then_after_completion() {
        // Arrange
        let tx = LocalTransaction::begin();
        let probe = Arc::new(Probe::default());
        tx.register_synchronization(probe.clone()).unwrap();

        // Act
        let result = tx.commit().await;

        // Assert
        assert!(result.is_ok());
        assert_eq!(*probe.before_calls.lock().unwrap(), 1);
        assert_eq!(
            *probe.outcomes.lock().unwrap(),
            vec![TransactionOutcome::Committed]
        );
        assert_eq!(tx.status(), TransactionStatus::Committed);
    }

    #[tokio::test]
    async fn test_failed_before_completion_rolls_back_with_cause() {
        // Arrange
        let tx = LocalTransaction::begin();
        let failing = Arc::new(Probe {
            fail_before: true,
            ..Probe::default()
        });
        let bystander = Arc::new(Probe::default());
        tx.register_synchronization(failing.clone()).unwrap();
        tx.register_synchronization(bystander.clone()).unwrap();

        // Act
        let result = tx.commit().await;

        // Assert
        match result {
            Err(TransactionError::RolledBack { cause: Some(cause), .. }) => {
                assert!(matches!(*cause, UnitOfWorkError::NoActiveTransaction));
            }
            other => panic!("expected RolledBack with cause, got {other:?}"),
        }
        assert_eq!(*bystander.before_calls.lock().unwrap(), 0);
        assert!(bystander.ran_after.load(Ordering::SeqCst));
        assert_eq!(
            *failing.outcomes.lock().unwrap(),
            vec![TransactionOutcome::RolledBack]
        );
        assert_eq!(tx.status(), TransactionStatus::RolledBack);
    }

    #[tokio::test]
    async fn test_rollback_skips_before_completion() {
        let tx = LocalTransaction::begin();
        let probe = Arc::new(Probe::default());
        tx.register_synchronization(probe.clone()).unwrap();

        tx.rollback().await.unwrap();

        assert_eq!(*probe.before_calls.lock().unwrap(), 0);
        assert_eq!(
            *probe.outcomes.lock().unwrap(),
            vec![TransactionOutcome::RolledBack]
        );
    }

    #[tokio::test]
    async fn test_rollback_only_commit_rolls_back() {
        let tx = LocalTransaction::begin();
        let probe = Arc::new(Probe::default());
        tx.register_synchronization(probe.clone()).unwrap();
        tx.set_rollback_only().unwrap();

        let result = tx.commit().await;

        assert!(matches!(
            result,
            Err(TransactionError::RolledBack { cause: None, .. })
        ));
        assert_eq!(*probe.before_calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_completed_transaction_refuses_synchronizations() {
        let tx = LocalTransaction::begin();
        tx.commit().await.unwrap();

        let result = tx.register_synchronization(Arc::new(Probe::default()));

        assert!(matches!(result, Err(TransactionError::NotActive(id)) if id == tx.id()));
        assert!(matches!(
            tx.commit().await,
            Err(TransactionError::NotActive(_))
        ));
    }

    #[test]
    fn test_transaction_ids_are_unique_per_attempt() {
        assert_ne!(TransactionId::new(), TransactionId::new());
    }
}
