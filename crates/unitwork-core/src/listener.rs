//! Bridge from persistence lifecycle hooks to the unit of work.
//!
//! The persistence layer reports every entity it loads, inserts, updates,
//! or deletes. Entities that expose the [`LifecycleAware`] capability
//! through [`PersistentEntity`] are transitioned and registered with the
//! unit of work the caller supplies; all other entities are ignored.

use std::sync::Arc;

use crate::clock::Clock;
use crate::error::UnitOfWorkError;
use crate::lifecycle::{Lifecycle, LifecycleAware, transition};
use crate::unit_of_work::UnitOfWork;

/// Any entity the persistence layer manages.
pub trait PersistentEntity {
    /// Returns the entity as a lifecycle-aware aggregate, if it is one.
    fn as_lifecycle_aware(&mut self) -> Option<&mut dyn LifecycleAware> {
        None
    }
}

/// Persistence lifecycle callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceEvent {
    /// The entity was loaded or refreshed.
    PostLoad,
    /// The entity is about to be inserted.
    PrePersist,
    /// The entity was inserted.
    PostPersist,
    /// The entity is about to be updated.
    PreUpdate,
    /// The entity was updated.
    PostUpdate,
    /// The entity is about to be deleted.
    PreRemove,
    /// The entity was deleted.
    PostRemove,
}

impl PersistenceEvent {
    /// The lifecycle state this callback moves an aggregate into.
    #[must_use]
    pub fn target(self) -> Lifecycle {
        match self {
            Self::PostLoad => Lifecycle::Loaded,
            Self::PrePersist => Lifecycle::PrePersist,
            Self::PostPersist => Lifecycle::PostPersisted,
            Self::PreUpdate => Lifecycle::PreUpdate,
            Self::PostUpdate => Lifecycle::PostUpdated,
            Self::PreRemove => Lifecycle::PreRemove,
            Self::PostRemove => Lifecycle::PostRemoved,
        }
    }
}

/// Forwards persistence callbacks into the aggregate state machine and the
/// unit of work.
#[derive(Clone)]
pub struct AggregateListener {
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for AggregateListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateListener").finish_non_exhaustive()
    }
}

impl AggregateListener {
    /// Creates a listener stamping lifecycle messages with `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Handles one persistence callback for `entity` within `unit`.
    ///
    /// On `POST_*` callbacks the aggregate's raised domain messages follow
    /// its lifecycle message into the unit.
    ///
    /// # Errors
    ///
    /// Returns the transition error (the persistence operation must fail) or
    /// `UnitOfWorkError::Closed` if `unit` no longer accepts registrations.
    pub fn on_event(
        &self,
        event: PersistenceEvent,
        unit: &UnitOfWork,
        entity: &mut dyn PersistentEntity,
    ) -> Result<(), UnitOfWorkError> {
        let Some(aggregate) = entity.as_lifecycle_aware() else {
            return Ok(());
        };
        // A closed unit must not leave the aggregate half-transitioned.
        if !unit.accepts_registrations() {
            return Err(UnitOfWorkError::Closed(unit.transaction_id()));
        }

        let target = event.target();
        let outcome = transition(&mut *aggregate, target, self.clock.as_ref())?;
        tracing::trace!(
            transaction_id = %unit.transaction_id(),
            aggregate_id = %outcome.aggregate_id,
            from = %outcome.from,
            to = %outcome.to,
            "aggregate transitioned"
        );
        unit.register(outcome)?;

        if target.is_post() {
            for message in aggregate.lifecycle_mut().take_raised() {
                unit.register(message)?;
            }
        }
        Ok(())
    }
}
