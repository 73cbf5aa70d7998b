//! The per-transaction unit of work.
//!
//! A [`UnitOfWork`] buffers messages and tracks aggregates for exactly one
//! transaction. Nothing leaves the buffer until the transaction's
//! `before_completion` calls [`UnitOfWork::drain_and_dispatch`], which swaps
//! the queue out, hands the batch to the dispatcher, and repeats while
//! dispatch keeps registering new messages, up to the configured cycle bound.
//!
//! Access is assumed sequential per transaction. The internal mutex is held
//! only for queue swaps and bookkeeping, never across dispatch, so handlers
//! can register cascading messages against the unit being drained.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use crate::config::UnitOfWorkConfig;
use crate::dispatcher::MessageDispatcher;
use crate::error::UnitOfWorkError;
use crate::lifecycle::AggregateTransition;
use crate::message::Message;
use crate::transaction::{Synchronization, TransactionId, TransactionOutcome};

/// Something that can be registered with a unit of work.
#[derive(Debug, Clone)]
pub enum Registration {
    /// A message to enqueue as-is.
    Message(Message),
    /// An aggregate lifecycle transition: the aggregate is tracked, and the
    /// transition's message (if any) is enqueued.
    Aggregate(AggregateTransition),
}

impl From<Message> for Registration {
    fn from(message: Message) -> Self {
        Self::Message(message)
    }
}

impl From<AggregateTransition> for Registration {
    fn from(transition: AggregateTransition) -> Self {
        Self::Aggregate(transition)
    }
}

/// Where a unit of work is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOfWorkStatus {
    /// Accepting registrations.
    Active,
    /// Inside `drain_and_dispatch`; cascading registrations are accepted.
    Draining,
    /// Drain finished (or failed); waiting for the transaction outcome.
    Drained,
    /// Discarded or closed after the transaction completed.
    Completed,
}

impl UnitOfWorkStatus {
    fn accepts_registrations(self) -> bool {
        matches!(self, Self::Active | Self::Draining)
    }
}

#[derive(Debug)]
struct State {
    status: UnitOfWorkStatus,
    queue: Vec<Message>,
    registered: HashSet<(&'static str, Uuid)>,
}

/// Per-transaction buffer of registered aggregates and pending messages.
pub struct UnitOfWork {
    transaction_id: TransactionId,
    dispatcher: Arc<dyn MessageDispatcher>,
    max_cascade_cycles: usize,
    state: Mutex<State>,
    participants: Mutex<Vec<Arc<dyn Synchronization>>>,
}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("UnitOfWork")
            .field("transaction_id", &self.transaction_id)
            .field("status", &state.status)
            .field("pending", &state.queue.len())
            .field("registered", &state.registered.len())
            .field("participants", &self.participants().len())
            .finish_non_exhaustive()
    }
}

impl UnitOfWork {
    /// Creates an empty unit of work for `transaction_id`.
    #[must_use]
    pub fn new(
        transaction_id: TransactionId,
        dispatcher: Arc<dyn MessageDispatcher>,
        config: &UnitOfWorkConfig,
    ) -> Self {
        tracing::debug!(%transaction_id, "unit of work begun");
        Self {
            transaction_id,
            dispatcher,
            max_cascade_cycles: config.max_cascade_cycles.max(1),
            state: Mutex::new(State {
                status: UnitOfWorkStatus::Active,
                queue: Vec::new(),
                registered: HashSet::new(),
            }),
            participants: Mutex::new(Vec::new()),
        }
    }

    /// Returns the owning transaction's identifier.
    #[must_use]
    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> UnitOfWorkStatus {
        self.state().status
    }

    /// Returns `true` while [`UnitOfWork::register`] would succeed.
    #[must_use]
    pub fn accepts_registrations(&self) -> bool {
        self.state().status.accepts_registrations()
    }

    /// Returns the number of messages waiting for the next drain cycle.
    #[must_use]
    pub fn pending_messages(&self) -> usize {
        self.state().queue.len()
    }

    /// Returns `true` if the aggregate has been registered in this unit.
    #[must_use]
    pub fn is_registered(&self, aggregate_type: &str, aggregate_id: Uuid) -> bool {
        self.state()
            .registered
            .contains(&(aggregate_type, aggregate_id))
    }

    /// Returns the number of distinct aggregates registered.
    #[must_use]
    pub fn registered_count(&self) -> usize {
        self.state().registered.len()
    }

    /// Registers a message or an aggregate transition.
    ///
    /// Messages are appended in call order. Aggregates are tracked once per
    /// identity, but every registered transition still enqueues its own
    /// message. Nothing is visible outside the unit until it is drained.
    ///
    /// # Errors
    ///
    /// Returns `UnitOfWorkError::Closed` once the unit has drained or completed.
    pub fn register(&self, item: impl Into<Registration>) -> Result<(), UnitOfWorkError> {
        let mut state = self.state();
        if !state.status.accepts_registrations() {
            return Err(UnitOfWorkError::Closed(self.transaction_id));
        }
        match item.into() {
            Registration::Message(message) => state.queue.push(message),
            Registration::Aggregate(transition) => {
                state
                    .registered
                    .insert((transition.aggregate_type, transition.aggregate_id));
                if let Some(message) = transition.message {
                    state.queue.push(message);
                }
            }
        }
        Ok(())
    }

    /// Enlists a transactional resource with the owning transaction.
    ///
    /// Participants see `before_completion` after the queue has drained, in
    /// enlistment order, and always see `after_completion` with the outcome.
    /// Resources touched by cascading handlers may enlist while draining.
    ///
    /// # Errors
    ///
    /// Returns `UnitOfWorkError::Closed` once the unit has completed.
    pub fn enlist(&self, participant: Arc<dyn Synchronization>) -> Result<(), UnitOfWorkError> {
        if self.status() == UnitOfWorkStatus::Completed {
            return Err(UnitOfWorkError::Closed(self.transaction_id));
        }
        self.participants().push(participant);
        Ok(())
    }

    /// Returns the number of enlisted participants.
    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.participants().len()
    }

    pub(crate) fn participant_at(&self, index: usize) -> Option<Arc<dyn Synchronization>> {
        self.participants().get(index).cloned()
    }

    pub(crate) fn take_participants(&self) -> Vec<Arc<dyn Synchronization>> {
        std::mem::take(&mut *self.participants())
    }

    /// Drains the queue into the dispatcher until no new messages appear.
    ///
    /// Each cycle swaps the whole queue out and dispatches it as one batch,
    /// so messages registered during dispatch form the next cycle's batch.
    /// At most `max_cascade_cycles` batches are dispatched.
    ///
    /// # Errors
    ///
    /// - `UnitOfWorkError::Closed` if the unit was already drained or completed.
    /// - `UnitOfWorkError::Dispatch` if the dispatcher fails.
    /// - `UnitOfWorkError::CascadeLimitExceeded` if messages are still pending
    ///   after the last allowed cycle.
    ///
    /// On error the pending queue is dropped; the owning transaction must roll back.
    pub async fn drain_and_dispatch(&self) -> Result<(), UnitOfWorkError> {
        {
            let mut state = self.state();
            if state.status != UnitOfWorkStatus::Active {
                return Err(UnitOfWorkError::Closed(self.transaction_id));
            }
            state.status = UnitOfWorkStatus::Draining;
        }

        let mut cycles = 0;
        let result = loop {
            let batch = std::mem::take(&mut self.state().queue);
            if batch.is_empty() {
                break Ok(());
            }
            if cycles == self.max_cascade_cycles {
                tracing::error!(
                    transaction_id = %self.transaction_id,
                    max_cycles = self.max_cascade_cycles,
                    pending = batch.len(),
                    "message cascade did not converge; probable event cycle"
                );
                break Err(UnitOfWorkError::CascadeLimitExceeded {
                    transaction_id: self.transaction_id,
                    max_cycles: self.max_cascade_cycles,
                });
            }
            cycles += 1;
            tracing::debug!(
                transaction_id = %self.transaction_id,
                cycle = cycles,
                batch_size = batch.len(),
                "dispatching batch"
            );
            if let Err(source) = self.dispatcher.dispatch(&batch, self).await {
                tracing::warn!(
                    transaction_id = %self.transaction_id,
                    cycle = cycles,
                    error = %source,
                    "dispatch failed"
                );
                break Err(UnitOfWorkError::Dispatch {
                    transaction_id: self.transaction_id,
                    source,
                });
            }
        };

        let mut state = self.state();
        if result.is_err() {
            state.queue.clear();
        }
        state.status = UnitOfWorkStatus::Drained;
        result
    }

    /// Drops every pending message and tracked aggregate without dispatching.
    pub fn discard(&self) {
        let mut state = self.state();
        tracing::debug!(
            transaction_id = %self.transaction_id,
            dropped = state.queue.len(),
            "unit of work discarded"
        );
        state.queue.clear();
        state.registered.clear();
        state.status = UnitOfWorkStatus::Completed;
    }

    /// Ends the unit once the transaction outcome is known.
    ///
    /// Rollback discards. Commit closes the unit; messages still queued at
    /// that point were never drained and are dropped with a warning.
    pub fn complete(&self, outcome: TransactionOutcome) {
        if outcome == TransactionOutcome::Committed {
            let pending = self.pending_messages();
            if pending > 0 {
                tracing::warn!(
                    transaction_id = %self.transaction_id,
                    pending,
                    "committed with undrained messages"
                );
            }
        }
        self.discard();
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn participants(&self) -> MutexGuard<'_, Vec<Arc<dyn Synchronization>>> {
        self.participants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::clock::testing::fixed_clock;
    use crate::error::DispatchError;
    use crate::lifecycle::Lifecycle;

    fn message(message_type: &str) -> Message {
        Message::domain(message_type, None, serde_json::json!({}), &fixed_clock())
    }

    /// Records batches; registers `cascade` new messages per call while
    /// `remaining` is positive.
    #[derive(Debug, Default)]
    struct Recording {
        batches: Mutex<Vec<Vec<String>>>,
        remaining: AtomicUsize,
    }

    #[async_trait]
    impl MessageDispatcher for Recording {
        async fn dispatch(&self, batch: &[Message], unit: &UnitOfWork) -> Result<(), DispatchError> {
            self.batches.lock().unwrap().push(
                batch
                    .iter()
                    .map(|m| m.message_type().to_owned())
                    .collect(),
            );
            if self.remaining.load(Ordering::SeqCst) > 0 {
                self.remaining.fetch_sub(1, Ordering::SeqCst);
                unit.register(message("cascade"))
                    .map_err(|e| DispatchError::Delivery(e.to_string()))?;
            }
            Ok(())
        }
    }

    struct Noop;

    #[async_trait]
    impl Synchronization for Noop {
        async fn before_completion(&self) -> Result<(), UnitOfWorkError> {
            Ok(())
        }

        async fn after_completion(&self, _outcome: TransactionOutcome) {}
    }

    fn unit_with(dispatcher: Arc<Recording>, max_cycles: usize) -> UnitOfWork {
        UnitOfWork::new(
            TransactionId::new(),
            dispatcher,
            &UnitOfWorkConfig::default().with_max_cascade_cycles(max_cycles),
        )
    }

    fn transition(id: Uuid, to: Lifecycle) -> AggregateTransition {
        AggregateTransition {
            aggregate_id: id,
            aggregate_type: "order",
            from: Lifecycle::None,
            to,
            message: to
                .is_post()
                .then(|| Message::lifecycle(id, "order", to, &fixed_clock())),
        }
    }

    #[tokio::test]
    async fn test_drain_dispatches_registrations_in_fifo_order() {
        // Arrange
        let dispatcher = Arc::new(Recording::default());
        let unit = unit_with(dispatcher.clone(), 128);
        unit.register(message("a")).unwrap();
        unit.register(message("b")).unwrap();
        unit.register(message("c")).unwrap();

        // Act
        let result = unit.drain_and_dispatch().await;

        // Assert
        assert!(result.is_ok());
        assert_eq!(*dispatcher.batches.lock().unwrap(), vec![vec!["a", "b", "c"]]);
        assert_eq!(unit.status(), UnitOfWorkStatus::Drained);
        assert_eq!(unit.pending_messages(), 0);
    }

    #[tokio::test]
    async fn test_empty_unit_never_calls_dispatcher() {
        let dispatcher = Arc::new(Recording::default());
        let unit = unit_with(dispatcher.clone(), 128);

        unit.drain_and_dispatch().await.unwrap();

        assert!(dispatcher.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cascade_lands_in_next_cycle() {
        // Arrange
        let dispatcher = Arc::new(Recording {
            remaining: AtomicUsize::new(2),
            ..Recording::default()
        });
        let unit = unit_with(dispatcher.clone(), 128);
        unit.register(message("a")).unwrap();
        unit.register(message("b")).unwrap();

        // Act
        unit.drain_and_dispatch().await.unwrap();

        // Assert
        assert_eq!(
            *dispatcher.batches.lock().unwrap(),
            vec![vec!["a", "b"], vec!["cascade"], vec!["cascade"]]
        );
    }

    #[tokio::test]
    async fn test_endless_cascade_fails_after_exactly_the_bound() {
        // Arrange
        let dispatcher = Arc::new(Recording {
            remaining: AtomicUsize::new(usize::MAX),
            ..Recording::default()
        });
        let unit = unit_with(dispatcher.clone(), 8);
        unit.register(message("seed")).unwrap();

        // Act
        let result = unit.drain_and_dispatch().await;

        // Assert
        match result {
            Err(UnitOfWorkError::CascadeLimitExceeded { max_cycles, .. }) => {
                assert_eq!(max_cycles, 8);
            }
            other => panic!("expected CascadeLimitExceeded, got {other:?}"),
        }
        assert_eq!(dispatcher.batches.lock().unwrap().len(), 8);
        assert_eq!(unit.pending_messages(), 0);
    }

    #[tokio::test]
    async fn test_cascade_converging_at_the_bound_succeeds() {
        let dispatcher = Arc::new(Recording {
            remaining: AtomicUsize::new(7),
            ..Recording::default()
        });
        let unit = unit_with(dispatcher.clone(), 8);
        unit.register(message("seed")).unwrap();

        let result = unit.drain_and_dispatch().await;

        assert!(result.is_ok());
        assert_eq!(dispatcher.batches.lock().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_second_drain_is_rejected() {
        let unit = unit_with(Arc::new(Recording::default()), 128);
        unit.drain_and_dispatch().await.unwrap();

        let result = unit.drain_and_dispatch().await;

        assert!(matches!(result, Err(UnitOfWorkError::Closed(id)) if id == unit.transaction_id()));
    }

    #[tokio::test]
    async fn test_discard_drops_everything_and_closes() {
        // Arrange
        let dispatcher = Arc::new(Recording::default());
        let unit = unit_with(dispatcher.clone(), 128);
        let id = Uuid::new_v4();
        unit.register(transition(id, Lifecycle::PostPersisted)).unwrap();
        unit.register(message("a")).unwrap();

        // Act
        unit.discard();

        // Assert
        assert_eq!(unit.pending_messages(), 0);
        assert_eq!(unit.registered_count(), 0);
        assert_eq!(unit.status(), UnitOfWorkStatus::Completed);
        assert!(matches!(
            unit.register(message("late")),
            Err(UnitOfWorkError::Closed(_))
        ));
        assert!(matches!(
            unit.drain_and_dispatch().await,
            Err(UnitOfWorkError::Closed(_))
        ));
        assert!(dispatcher.batches.lock().unwrap().is_empty());
    }

    #[test]
    fn test_aggregate_tracked_once_but_every_post_transition_enqueues() {
        // Arrange
        let unit = unit_with(Arc::new(Recording::default()), 128);
        let id = Uuid::new_v4();

        // Act
        unit.register(transition(id, Lifecycle::PrePersist)).unwrap();
        unit.register(transition(id, Lifecycle::PostPersisted)).unwrap();
        unit.register(transition(id, Lifecycle::PostUpdated)).unwrap();

        // Assert
        assert_eq!(unit.registered_count(), 1);
        assert!(unit.is_registered("order", id));
        assert!(!unit.is_registered("stock_item", id));
        assert_eq!(unit.pending_messages(), 2);
    }

    #[test]
    fn test_enlist_is_refused_once_completed() {
        let unit = unit_with(Arc::new(Recording::default()), 128);
        unit.enlist(Arc::new(Noop)).unwrap();

        unit.complete(TransactionOutcome::RolledBack);

        assert!(matches!(
            unit.enlist(Arc::new(Noop)),
            Err(UnitOfWorkError::Closed(_))
        ));
        assert_eq!(unit.participant_count(), 1);
    }

    #[tokio::test]
    async fn test_registration_rejected_after_drain() {
        let unit = unit_with(Arc::new(Recording::default()), 128);
        unit.drain_and_dispatch().await.unwrap();

        let result = unit.register(message("late"));

        assert!(matches!(result, Err(UnitOfWorkError::Closed(_))));
    }
}
