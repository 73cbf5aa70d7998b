//! Unit-of-work manager: binds one unit of work to each transaction.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::config::UnitOfWorkConfig;
use crate::dispatcher::MessageDispatcher;
use crate::error::UnitOfWorkError;
use crate::transaction::{Synchronization, Transaction, TransactionId, TransactionOutcome};
use crate::unit_of_work::UnitOfWork;

type Registry = DashMap<TransactionId, Arc<UnitOfWork>>;

/// Process-wide registry of the units of work of in-flight transactions.
///
/// The transaction is always passed in explicitly; the manager never
/// resolves an ambient "current" transaction.
pub struct UnitOfWorkManager {
    units: Arc<Registry>,
    dispatcher: Arc<dyn MessageDispatcher>,
    config: UnitOfWorkConfig,
}

impl fmt::Debug for UnitOfWorkManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWorkManager")
            .field("active_units", &self.units.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl UnitOfWorkManager {
    /// Creates a manager whose units deliver through `dispatcher`.
    #[must_use]
    pub fn new(dispatcher: Arc<dyn MessageDispatcher>, config: UnitOfWorkConfig) -> Self {
        Self {
            units: Arc::new(DashMap::new()),
            dispatcher,
            config,
        }
    }

    /// Returns the configuration units are created with.
    #[must_use]
    pub fn config(&self) -> &UnitOfWorkConfig {
        &self.config
    }

    /// Returns the unit of work bound to `transaction`, starting one if needed.
    ///
    /// # Errors
    ///
    /// Returns `UnitOfWorkError::NoActiveTransaction` if `transaction` is not
    /// active, or the transaction's error if it refuses the synchronization.
    pub fn current_unit_of_work(
        &self,
        transaction: &dyn Transaction,
    ) -> Result<Arc<UnitOfWork>, UnitOfWorkError> {
        if !transaction.status().is_active() {
            return Err(UnitOfWorkError::NoActiveTransaction);
        }
        if let Some(unit) = self.find(transaction.id()) {
            return Ok(unit);
        }
        self.on_transaction_start(transaction)
    }

    /// Creates the unit of work for `transaction` and subscribes it to the
    /// transaction's completion. Returns the existing unit if one is bound.
    ///
    /// # Errors
    ///
    /// Returns the transaction's error if it refuses the synchronization; no
    /// entry is left behind in that case.
    pub fn on_transaction_start(
        &self,
        transaction: &dyn Transaction,
    ) -> Result<Arc<UnitOfWork>, UnitOfWorkError> {
        match self.units.entry(transaction.id()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let unit = Arc::new(UnitOfWork::new(
                    transaction.id(),
                    Arc::clone(&self.dispatcher),
                    &self.config,
                ));
                transaction.register_synchronization(Arc::new(UnitOfWorkSynchronization {
                    unit: Arc::clone(&unit),
                    units: Arc::clone(&self.units),
                }))?;
                entry.insert(Arc::clone(&unit));
                Ok(unit)
            }
        }
    }

    /// Removes the entry for `transaction_id`. Safe to call more than once.
    pub fn on_transaction_end(&self, transaction_id: TransactionId) -> Option<Arc<UnitOfWork>> {
        remove_unit(&self.units, transaction_id)
    }

    /// Looks up the unit bound to `transaction_id`.
    #[must_use]
    pub fn find(&self, transaction_id: TransactionId) -> Option<Arc<UnitOfWork>> {
        self.units
            .get(&transaction_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Returns the number of transactions with a bound unit.
    #[must_use]
    pub fn active_units(&self) -> usize {
        self.units.len()
    }
}

fn remove_unit(units: &Registry, transaction_id: TransactionId) -> Option<Arc<UnitOfWork>> {
    let removed = units.remove(&transaction_id).map(|(_, unit)| unit);
    if removed.is_some() {
        tracing::debug!(%transaction_id, "unit of work released");
    }
    removed
}

/// Subscribed to the owning transaction by [`UnitOfWorkManager::on_transaction_start`].
///
/// Drains the unit first, then gives every participant enlisted with the
/// unit its own completion callbacks.
struct UnitOfWorkSynchronization {
    unit: Arc<UnitOfWork>,
    units: Arc<Registry>,
}

#[async_trait]
impl Synchronization for UnitOfWorkSynchronization {
    async fn before_completion(&self) -> Result<(), UnitOfWorkError> {
        self.unit.drain_and_dispatch().await?;
        let mut index = 0;
        while let Some(participant) = self.unit.participant_at(index) {
            participant.before_completion().await?;
            index += 1;
        }
        Ok(())
    }

    async fn after_completion(&self, outcome: TransactionOutcome) {
        let participants = self.unit.take_participants();
        self.unit.complete(outcome);
        for participant in participants {
            participant.after_completion(outcome).await;
        }
        remove_unit(&self.units, self.unit.transaction_id());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::clock::testing::fixed_clock;
    use crate::dispatcher::LoggingDispatcher;
    use crate::error::{DispatchError, TransactionError};
    use crate::message::Message;
    use crate::transaction::{LocalTransaction, TransactionStatus};
    use crate::unit_of_work::UnitOfWorkStatus;

    fn manager() -> UnitOfWorkManager {
        UnitOfWorkManager::new(Arc::new(LoggingDispatcher), UnitOfWorkConfig::default())
    }

    /// A transaction that only records how many synchronizations it was given.
    #[derive(Default)]
    struct CountingTransaction {
        id: TransactionId,
        registered: Mutex<usize>,
        refuse: bool,
    }

    impl Transaction for CountingTransaction {
        fn id(&self) -> TransactionId {
            self.id
        }

        fn status(&self) -> TransactionStatus {
            TransactionStatus::Active
        }

        fn register_synchronization(
            &self,
            _synchronization: Arc<dyn Synchronization>,
        ) -> Result<(), TransactionError> {
            if self.refuse {
                return Err(TransactionError::NotActive(self.id));
            }
            *self.registered.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[test]
    fn test_current_unit_is_created_once_per_transaction() {
        // Arrange
        let manager = manager();
        let tx = CountingTransaction::default();

        // Act
        let first = manager.current_unit_of_work(&tx).unwrap();
        let second = manager.current_unit_of_work(&tx).unwrap();

        // Assert
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*tx.registered.lock().unwrap(), 1);
        assert_eq!(manager.active_units(), 1);
    }

    #[tokio::test]
    async fn test_completed_transaction_has_no_current_unit() {
        let manager = manager();
        let tx = LocalTransaction::begin();
        tx.commit().await.unwrap();

        let result = manager.current_unit_of_work(&tx);

        assert!(matches!(result, Err(UnitOfWorkError::NoActiveTransaction)));
        assert_eq!(manager.active_units(), 0);
    }

    #[test]
    fn test_refused_synchronization_leaves_no_entry() {
        let manager = manager();
        let tx = CountingTransaction {
            refuse: true,
            ..CountingTransaction::default()
        };

        let result = manager.on_transaction_start(&tx);

        assert!(matches!(
            result,
            Err(UnitOfWorkError::Transaction(TransactionError::NotActive(_)))
        ));
        assert!(manager.find(tx.id()).is_none());
    }

    #[tokio::test]
    async fn test_commit_releases_the_entry_and_stale_ids_miss() {
        // Arrange
        let manager = manager();
        let tx = LocalTransaction::begin();
        let unit = manager.current_unit_of_work(&tx).unwrap();

        // Act
        tx.commit().await.unwrap();

        // Assert
        assert!(manager.find(tx.id()).is_none());
        assert_eq!(manager.active_units(), 0);
        assert_eq!(unit.status(), UnitOfWorkStatus::Completed);
        assert!(manager.on_transaction_end(tx.id()).is_none());
    }

    #[tokio::test]
    async fn test_rollback_discards_and_releases() {
        let manager = manager();
        let tx = LocalTransaction::begin();
        let unit = manager.current_unit_of_work(&tx).unwrap();

        tx.rollback().await.unwrap();

        assert!(manager.find(tx.id()).is_none());
        assert_eq!(unit.status(), UnitOfWorkStatus::Completed);
    }

    /// A participant that records the outcome it is told about.
    #[derive(Default)]
    struct Participant {
        veto: bool,
        prepared: Mutex<usize>,
        outcomes: Mutex<Vec<TransactionOutcome>>,
    }

    #[async_trait]
    impl Synchronization for Participant {
        async fn before_completion(&self) -> Result<(), UnitOfWorkError> {
            *self.prepared.lock().unwrap() += 1;
            if self.veto {
                return Err(UnitOfWorkError::NoActiveTransaction);
            }
            Ok(())
        }

        async fn after_completion(&self, outcome: TransactionOutcome) {
            self.outcomes.lock().unwrap().push(outcome);
        }
    }

    struct Refusing;

    #[async_trait]
    impl MessageDispatcher for Refusing {
        async fn dispatch(&self, _batch: &[Message], _unit: &UnitOfWork) -> Result<(), DispatchError> {
            Err(DispatchError::Delivery("refused".to_owned()))
        }
    }

    #[tokio::test]
    async fn test_enlisted_participant_learns_the_commit() {
        // Arrange
        let manager = manager();
        let tx = LocalTransaction::begin();
        let unit = manager.current_unit_of_work(&tx).unwrap();
        let participant = Arc::new(Participant::default());
        unit.enlist(participant.clone()).unwrap();

        // Act
        tx.commit().await.unwrap();

        // Assert
        assert_eq!(*participant.prepared.lock().unwrap(), 1);
        assert_eq!(
            *participant.outcomes.lock().unwrap(),
            vec![TransactionOutcome::Committed]
        );
        assert_eq!(unit.participant_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_drain_reports_rollback_to_participants() {
        // Arrange
        let manager = UnitOfWorkManager::new(Arc::new(Refusing), UnitOfWorkConfig::default());
        let tx = LocalTransaction::begin();
        let unit = manager.current_unit_of_work(&tx).unwrap();
        unit.register(Message::domain("test.refused", None, serde_json::json!({}), &fixed_clock()))
            .unwrap();
        let participant = Arc::new(Participant::default());
        unit.enlist(participant.clone()).unwrap();

        // Act
        let result = tx.commit().await;

        // Assert
        assert!(matches!(result, Err(TransactionError::RolledBack { .. })));
        assert_eq!(*participant.prepared.lock().unwrap(), 0);
        assert_eq!(
            *participant.outcomes.lock().unwrap(),
            vec![TransactionOutcome::RolledBack]
        );
    }

    #[tokio::test]
    async fn test_participant_veto_rolls_back_everyone() {
        let manager = manager();
        let tx = LocalTransaction::begin();
        let unit = manager.current_unit_of_work(&tx).unwrap();
        let vetoing = Arc::new(Participant {
            veto: true,
            ..Participant::default()
        });
        let bystander = Arc::new(Participant::default());
        unit.enlist(vetoing.clone()).unwrap();
        unit.enlist(bystander.clone()).unwrap();

        let result = tx.commit().await;

        assert!(matches!(result, Err(TransactionError::RolledBack { .. })));
        assert_eq!(*bystander.prepared.lock().unwrap(), 0);
        assert_eq!(
            *bystander.outcomes.lock().unwrap(),
            vec![TransactionOutcome::RolledBack]
        );
        assert_eq!(manager.active_units(), 0);
    }

    #[test]
    fn test_explicit_end_removes_entry() {
        let manager = manager();
        let tx = CountingTransaction::default();
        let unit = manager.on_transaction_start(&tx).unwrap();

        let removed = manager.on_transaction_end(tx.id());

        assert!(removed.is_some_and(|r| Arc::ptr_eq(&r, &unit)));
        assert_eq!(manager.active_units(), 0);
    }
}
