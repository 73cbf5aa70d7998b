//! In-memory entity store standing in for an ORM session.
//!
//! Every write reports the pre/post persistence callbacks to an
//! [`AggregateListener`] against the unit of work the caller hands in, in
//! the order a real ORM fires them. Rows are plain clones of the entity
//! without its transient lifecycle, so every load starts from `NONE`.
//!
//! Writes are staged per transaction. The first write of a transaction
//! enlists the table with its unit of work; the staged rows replace the
//! committed ones on commit and are dropped on rollback. A transaction
//! reads its own staged writes; everyone else sees committed rows only.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use unitwork_core::error::{DomainError, UnitOfWorkError};
use unitwork_core::lifecycle::AggregateLifecycle;
use unitwork_core::listener::{AggregateListener, PersistenceEvent, PersistentEntity};
use unitwork_core::transaction::{Synchronization, TransactionId, TransactionOutcome};
use unitwork_core::unit_of_work::UnitOfWork;
use uuid::Uuid;

use crate::domain::aggregates::{
    ORDER_AGGREGATE_TYPE, Order, STOCK_ITEM_AGGREGATE_TYPE, StockItem,
};
use crate::error::OrderingError;

/// An entity the store can keep.
pub trait StoredEntity: PersistentEntity + Clone + Send + Sync + 'static {
    /// Entity kind used in error messages.
    const KIND: &'static str;

    /// Returns the row key.
    fn entity_id(&self) -> Uuid;
}

impl StoredEntity for Order {
    const KIND: &'static str = ORDER_AGGREGATE_TYPE;

    fn entity_id(&self) -> Uuid {
        self.id
    }
}

impl StoredEntity for StockItem {
    const KIND: &'static str = STOCK_ITEM_AGGREGATE_TYPE;

    fn entity_id(&self) -> Uuid {
        self.id
    }
}

/// Copies `entity` into a row, leaving its transient lifecycle behind.
fn detached<E: StoredEntity>(entity: &E) -> E {
    let mut row = entity.clone();
    if let Some(aggregate) = row.as_lifecycle_aware() {
        *aggregate.lifecycle_mut() = AggregateLifecycle::new();
    }
    row
}

/// Staged rows of one transaction; `None` marks a deletion.
type Staged<E> = HashMap<Uuid, Option<E>>;

struct Table<E> {
    committed: DashMap<Uuid, E>,
    staged: DashMap<TransactionId, Staged<E>>,
}

impl<E: StoredEntity> Table<E> {
    fn visible(&self, transaction_id: TransactionId, id: Uuid) -> Option<E> {
        let staged = self
            .staged
            .get(&transaction_id)
            .and_then(|staged| staged.get(&id).cloned());
        match staged {
            Some(row) => row,
            None => self.committed.get(&id).map(|row| row.value().clone()),
        }
    }
}

/// Applies or drops one transaction's staged rows.
struct StagedWrites<E> {
    table: Arc<Table<E>>,
    transaction_id: TransactionId,
}

#[async_trait]
impl<E: StoredEntity> Synchronization for StagedWrites<E> {
    async fn before_completion(&self) -> Result<(), UnitOfWorkError> {
        Ok(())
    }

    async fn after_completion(&self, outcome: TransactionOutcome) {
        let Some((_, staged)) = self.table.staged.remove(&self.transaction_id) else {
            return;
        };
        tracing::debug!(
            transaction_id = %self.transaction_id,
            entity = E::KIND,
            rows = staged.len(),
            ?outcome,
            "staged rows settled"
        );
        if outcome != TransactionOutcome::Committed {
            return;
        }
        for (id, row) in staged {
            match row {
                Some(row) => {
                    self.table.committed.insert(id, row);
                }
                None => {
                    self.table.committed.remove(&id);
                }
            }
        }
    }
}

/// One table of entities of type `E`.
pub struct InMemoryStore<E> {
    table: Arc<Table<E>>,
    listener: AggregateListener,
    _entity: PhantomData<fn() -> E>,
}

impl<E> std::fmt::Debug for InMemoryStore<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("rows", &self.table.committed.len())
            .field("open_transactions", &self.table.staged.len())
            .finish_non_exhaustive()
    }
}

impl<E: StoredEntity> InMemoryStore<E> {
    /// Creates an empty table reporting to `listener`.
    #[must_use]
    pub fn new(listener: AggregateListener) -> Self {
        Self {
            table: Arc::new(Table {
                committed: DashMap::new(),
                staged: DashMap::new(),
            }),
            listener,
            _entity: PhantomData,
        }
    }

    /// Inserts `entity`, firing `PrePersist` and `PostPersist`.
    ///
    /// # Errors
    ///
    /// Returns `OrderingError::AlreadyExists` if the key is taken, or the
    /// listener's error if the lifecycle refuses the insert.
    pub fn insert(&self, unit: &UnitOfWork, entity: &mut E) -> Result<(), OrderingError> {
        let id = entity.entity_id();
        if self.peek(unit, id).is_some() {
            return Err(OrderingError::AlreadyExists {
                entity: E::KIND,
                id,
            });
        }
        self.listener
            .on_event(PersistenceEvent::PrePersist, unit, entity)?;
        self.stage(unit, id, Some(detached(entity)))?;
        self.listener
            .on_event(PersistenceEvent::PostPersist, unit, entity)?;
        Ok(())
    }

    /// Writes back a loaded `entity`, firing `PreUpdate` and `PostUpdate`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AggregateNotFound` if there is no such row, or
    /// the listener's error if the lifecycle refuses the update.
    pub fn update(&self, unit: &UnitOfWork, entity: &mut E) -> Result<(), OrderingError> {
        let id = entity.entity_id();
        if self.peek(unit, id).is_none() {
            return Err(DomainError::AggregateNotFound(id).into());
        }
        self.listener
            .on_event(PersistenceEvent::PreUpdate, unit, entity)?;
        self.stage(unit, id, Some(detached(entity)))?;
        self.listener
            .on_event(PersistenceEvent::PostUpdate, unit, entity)?;
        Ok(())
    }

    /// Deletes a loaded `entity`, firing `PreRemove` and `PostRemove`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AggregateNotFound` if there is no such row, or
    /// the listener's error if the lifecycle refuses the removal.
    pub fn remove(&self, unit: &UnitOfWork, entity: &mut E) -> Result<(), OrderingError> {
        let id = entity.entity_id();
        if self.peek(unit, id).is_none() {
            return Err(DomainError::AggregateNotFound(id).into());
        }
        self.listener
            .on_event(PersistenceEvent::PreRemove, unit, entity)?;
        self.stage(unit, id, None)?;
        self.listener
            .on_event(PersistenceEvent::PostRemove, unit, entity)?;
        Ok(())
    }

    /// Loads the row `id` as `unit`'s transaction sees it, firing `PostLoad`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AggregateNotFound` if there is no such row, or
    /// the listener's error if `unit` is closed.
    pub fn load(&self, unit: &UnitOfWork, id: Uuid) -> Result<E, OrderingError> {
        let mut entity = self
            .peek(unit, id)
            .ok_or(DomainError::AggregateNotFound(id))?;
        self.listener
            .on_event(PersistenceEvent::PostLoad, unit, &mut entity)?;
        Ok(entity)
    }

    /// Reads the row `id` as `unit`'s transaction sees it, without firing
    /// any callback.
    #[must_use]
    pub fn peek(&self, unit: &UnitOfWork, id: Uuid) -> Option<E> {
        self.table.visible(unit.transaction_id(), id)
    }

    /// Reads the committed row without entering a unit of work.
    #[must_use]
    pub fn snapshot(&self, id: Uuid) -> Option<E> {
        self.table.committed.get(&id).map(|row| row.value().clone())
    }

    /// Returns the number of committed rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.committed.len()
    }

    /// Returns `true` if no row is committed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.committed.is_empty()
    }

    /// Records `row` under `id` for `unit`'s transaction, enlisting the
    /// table on the transaction's first write.
    fn stage(&self, unit: &UnitOfWork, id: Uuid, row: Option<E>) -> Result<(), OrderingError> {
        let transaction_id = unit.transaction_id();
        match self.table.staged.entry(transaction_id) {
            Entry::Occupied(mut staged) => {
                staged.get_mut().insert(id, row);
            }
            Entry::Vacant(slot) => {
                unit.enlist(Arc::new(StagedWrites {
                    table: Arc::clone(&self.table),
                    transaction_id,
                }))?;
                slot.insert(HashMap::from([(id, row)]));
            }
        }
        Ok(())
    }
}
