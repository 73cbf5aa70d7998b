//! Aggregate lifecycle state machine.
//!
//! An aggregate embeds an [`AggregateLifecycle`] and exposes it through the
//! [`LifecycleAware`] capability. [`transition`] is the only way to move an
//! aggregate between states; it validates the move, runs the aggregate's
//! pre-hooks, records the transition, and hands back an
//! [`AggregateTransition`] ready to register with a unit of work.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{DomainError, UnitOfWorkError};
use crate::message::{Message, MessagePayload};

/// The point an aggregate has reached in its persistence lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Lifecycle {
    /// Not yet loaded or persisted.
    #[default]
    None,
    /// Loaded (or reloaded) from storage.
    Loaded,
    /// About to be inserted.
    PrePersist,
    /// Insert is durable.
    PostPersisted,
    /// About to be updated.
    PreUpdate,
    /// Update is durable.
    PostUpdated,
    /// About to be deleted.
    PreRemove,
    /// Delete is durable.
    PostRemoved,
}

impl Lifecycle {
    /// Returns `true` if `target` is reachable from `self` in one step.
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::None, Self::Loaded | Self::PrePersist)
                | (
                    Self::Loaded,
                    Self::Loaded | Self::PrePersist | Self::PreUpdate | Self::PreRemove
                )
                | (Self::PrePersist, Self::PostPersisted)
                | (Self::PreUpdate, Self::PostUpdated)
                | (Self::PreRemove, Self::PostRemoved)
                | (Self::PostPersisted | Self::PostUpdated, Self::Loaded)
        )
    }

    /// Returns `true` for the `PRE_*` states.
    #[must_use]
    pub fn is_pre(self) -> bool {
        matches!(self, Self::PrePersist | Self::PreUpdate | Self::PreRemove)
    }

    /// Returns `true` for the `POST_*` states, whose entry is a durable fact.
    #[must_use]
    pub fn is_post(self) -> bool {
        matches!(
            self,
            Self::PostPersisted | Self::PostUpdated | Self::PostRemoved
        )
    }

    /// Routing type of the lifecycle message announcing this state.
    #[must_use]
    pub fn message_type(self) -> &'static str {
        match self {
            Self::None => "aggregate.none",
            Self::Loaded => "aggregate.loaded",
            Self::PrePersist => "aggregate.pre_persist",
            Self::PostPersisted => "aggregate.post_persisted",
            Self::PreUpdate => "aggregate.pre_update",
            Self::PostUpdated => "aggregate.post_updated",
            Self::PreRemove => "aggregate.pre_remove",
            Self::PostRemoved => "aggregate.post_removed",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "NONE",
            Self::Loaded => "LOADED",
            Self::PrePersist => "PRE_PERSIST",
            Self::PostPersisted => "POST_PERSISTED",
            Self::PreUpdate => "PRE_UPDATE",
            Self::PostUpdated => "POST_UPDATED",
            Self::PreRemove => "PRE_REMOVE",
            Self::PostRemoved => "POST_REMOVED",
        };
        f.write_str(name)
    }
}

/// Lifecycle state plus the transient message accumulator of one aggregate.
#[derive(Debug, Clone, Default)]
pub struct AggregateLifecycle {
    state: Lifecycle,
    messages: Vec<Message>,
}

impl AggregateLifecycle {
    /// Creates a lifecycle in the `NONE` state with no messages.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> Lifecycle {
        self.state
    }

    /// Returns the messages accumulated since the last clear.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Appends a business message raised by the aggregate.
    pub fn raise(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Removes and returns the raised domain messages, keeping lifecycle records.
    pub fn take_raised(&mut self) -> Vec<Message> {
        let (raised, kept): (Vec<Message>, Vec<Message>) = std::mem::take(&mut self.messages)
            .into_iter()
            .partition(|message| matches!(message.payload(), MessagePayload::Domain(_)));
        self.messages = kept;
        raised
    }

    /// Drops every accumulated message.
    pub fn clear_messages(&mut self) {
        self.messages.clear();
    }
}

/// Capability implemented by entity types whose lifecycle a unit of work tracks.
pub trait LifecycleAware: Send + Sync {
    /// Returns the aggregate identifier.
    fn aggregate_id(&self) -> Uuid;

    /// Returns the aggregate type name.
    fn aggregate_type(&self) -> &'static str;

    /// Returns the embedded lifecycle.
    fn lifecycle(&self) -> &AggregateLifecycle;

    /// Returns the embedded lifecycle mutably.
    fn lifecycle_mut(&mut self) -> &mut AggregateLifecycle;

    /// Runs before `PRE_PERSIST` and `PRE_UPDATE`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` to veto the transition.
    fn on_pre_preserve(&mut self) -> Result<(), DomainError> {
        Ok(())
    }

    /// Runs before `PRE_REMOVE`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` to veto the transition.
    fn on_pre_destroy(&mut self) -> Result<(), DomainError> {
        Ok(())
    }
}

/// The outcome of a successful [`transition`], ready to register with a unit of work.
#[derive(Debug, Clone)]
pub struct AggregateTransition {
    /// The aggregate that transitioned.
    pub aggregate_id: Uuid,
    /// The aggregate's type name.
    pub aggregate_type: &'static str,
    /// The state before the transition.
    pub from: Lifecycle,
    /// The state after the transition.
    pub to: Lifecycle,
    /// The message to dispatch, present only for `POST_*` targets.
    pub message: Option<Message>,
}

/// Moves `aggregate` to `target`.
///
/// `LOADED` clears the accumulator instead of recording itself, so messages
/// never survive a reload. Every other transition is recorded.
///
/// # Errors
///
/// Returns `UnitOfWorkError::LifecycleViolation` if `target` is not reachable,
/// or `UnitOfWorkError::PreHookRejected` if the aggregate's hook vetoes it.
/// The aggregate is left untouched in both cases.
pub fn transition<A>(
    aggregate: &mut A,
    target: Lifecycle,
    clock: &dyn Clock,
) -> Result<AggregateTransition, UnitOfWorkError>
where
    A: LifecycleAware + ?Sized,
{
    let aggregate_id = aggregate.aggregate_id();
    let from = aggregate.lifecycle().state();
    if !from.can_transition_to(target) {
        return Err(UnitOfWorkError::LifecycleViolation {
            aggregate_id,
            from,
            to: target,
        });
    }

    let hook = match target {
        Lifecycle::PrePersist | Lifecycle::PreUpdate => aggregate.on_pre_preserve(),
        Lifecycle::PreRemove => aggregate.on_pre_destroy(),
        _ => Ok(()),
    };
    hook.map_err(|source| UnitOfWorkError::PreHookRejected {
        aggregate_id,
        to: target,
        source,
    })?;

    let aggregate_type = aggregate.aggregate_type();
    let message = Message::lifecycle(aggregate_id, aggregate_type, target, clock);
    let lifecycle = aggregate.lifecycle_mut();
    if target == Lifecycle::Loaded {
        lifecycle.clear_messages();
    } else {
        lifecycle.messages.push(message.clone());
    }
    lifecycle.state = target;

    Ok(AggregateTransition {
        aggregate_id,
        aggregate_type,
        from,
        to: target,
        message: target.is_post().then_some(message),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::fixed_clock;

    #[derive(Debug, Default)]
    struct Ledger {
        id: Uuid,
        lifecycle: AggregateLifecycle,
        frozen: bool,
        preserve_calls: usize,
    }

    impl LifecycleAware for Ledger {
        fn aggregate_id(&self) -> Uuid {
            self.id
        }

        fn aggregate_type(&self) -> &'static str {
            "ledger"
        }

        fn lifecycle(&self) -> &AggregateLifecycle {
            &self.lifecycle
        }

        fn lifecycle_mut(&mut self) -> &mut AggregateLifecycle {
            &mut self.lifecycle
        }

        fn on_pre_preserve(&mut self) -> Result<(), DomainError> {
            self.preserve_calls += 1;
            if self.frozen {
                return Err(DomainError::Validation("ledger is frozen".into()));
            }
            Ok(())
        }

        fn on_pre_destroy(&mut self) -> Result<(), DomainError> {
            Err(DomainError::Validation("ledgers are never removed".into()))
        }
    }

    #[test]
    fn test_none_to_post_updated_is_a_violation() {
        // Arrange
        let mut ledger = Ledger::default();

        // Act
        let result = transition(&mut ledger, Lifecycle::PostUpdated, &fixed_clock());

        // Assert
        match result {
            Err(UnitOfWorkError::LifecycleViolation { from, to, .. }) => {
                assert_eq!(from, Lifecycle::None);
                assert_eq!(to, Lifecycle::PostUpdated);
            }
            other => panic!("expected LifecycleViolation, got {other:?}"),
        }
        assert_eq!(ledger.lifecycle.state(), Lifecycle::None);
        assert!(ledger.lifecycle.messages().is_empty());
    }

    #[test]
    fn test_load_then_update_records_two_messages_and_yields_one() {
        // Arrange
        let mut ledger = Ledger::default();
        let clock = fixed_clock();

        // Act
        let loaded = transition(&mut ledger, Lifecycle::Loaded, &clock).unwrap();
        let pre = transition(&mut ledger, Lifecycle::PreUpdate, &clock).unwrap();
        let post = transition(&mut ledger, Lifecycle::PostUpdated, &clock).unwrap();

        // Assert
        let recorded: Vec<_> = ledger
            .lifecycle
            .messages()
            .iter()
            .map(Message::lifecycle_state)
            .collect();
        assert_eq!(
            recorded,
            vec![Some(Lifecycle::PreUpdate), Some(Lifecycle::PostUpdated)]
        );
        assert!(loaded.message.is_none());
        assert!(pre.message.is_none());
        let message = post.message.expect("POST_UPDATED yields a message");
        assert_eq!(message.lifecycle_state(), Some(Lifecycle::PostUpdated));
        assert_eq!(post.from, Lifecycle::PreUpdate);
        assert_eq!(ledger.lifecycle.state(), Lifecycle::PostUpdated);
    }

    #[test]
    fn test_loaded_clears_stale_messages() {
        // Arrange
        let mut ledger = Ledger::default();
        let clock = fixed_clock();
        transition(&mut ledger, Lifecycle::PrePersist, &clock).unwrap();
        transition(&mut ledger, Lifecycle::PostPersisted, &clock).unwrap();
        ledger
            .lifecycle
            .raise(Message::domain("ledger.noted", None, serde_json::json!({}), &clock));
        assert_eq!(ledger.lifecycle.messages().len(), 3);

        // Act
        transition(&mut ledger, Lifecycle::Loaded, &clock).unwrap();

        // Assert
        assert!(ledger.lifecycle.messages().is_empty());
        assert_eq!(ledger.lifecycle.state(), Lifecycle::Loaded);
    }

    #[test]
    fn test_pre_remove_from_post_persisted_requires_reload() {
        let mut ledger = Ledger::default();
        let clock = fixed_clock();
        transition(&mut ledger, Lifecycle::PrePersist, &clock).unwrap();
        transition(&mut ledger, Lifecycle::PostPersisted, &clock).unwrap();

        let result = transition(&mut ledger, Lifecycle::PreRemove, &clock);

        assert!(matches!(
            result,
            Err(UnitOfWorkError::LifecycleViolation { .. })
        ));
        assert_eq!(ledger.lifecycle.state(), Lifecycle::PostPersisted);
    }

    #[test]
    fn test_pre_hook_veto_leaves_state_unchanged() {
        // Arrange
        let mut ledger = Ledger {
            frozen: true,
            ..Ledger::default()
        };

        // Act
        let result = transition(&mut ledger, Lifecycle::PrePersist, &fixed_clock());

        // Assert
        match result {
            Err(UnitOfWorkError::PreHookRejected { to, source, .. }) => {
                assert_eq!(to, Lifecycle::PrePersist);
                assert_eq!(source.to_string(), "validation error: ledger is frozen");
            }
            other => panic!("expected PreHookRejected, got {other:?}"),
        }
        assert_eq!(ledger.preserve_calls, 1);
        assert_eq!(ledger.lifecycle.state(), Lifecycle::None);
        assert!(ledger.lifecycle.messages().is_empty());
    }

    #[test]
    fn test_pre_destroy_hook_runs_before_pre_remove() {
        let mut ledger = Ledger::default();
        let clock = fixed_clock();
        transition(&mut ledger, Lifecycle::Loaded, &clock).unwrap();

        let result = transition(&mut ledger, Lifecycle::PreRemove, &clock);

        assert!(matches!(
            result,
            Err(UnitOfWorkError::PreHookRejected { .. })
        ));
        assert_eq!(ledger.lifecycle.state(), Lifecycle::Loaded);
    }

    #[test]
    fn test_post_removed_is_terminal() {
        for target in [
            Lifecycle::None,
            Lifecycle::Loaded,
            Lifecycle::PrePersist,
            Lifecycle::PreUpdate,
            Lifecycle::PreRemove,
        ] {
            assert!(!Lifecycle::PostRemoved.can_transition_to(target));
        }
    }

    #[test]
    fn test_take_raised_keeps_lifecycle_records() {
        // Arrange
        let mut ledger = Ledger::default();
        let clock = fixed_clock();
        transition(&mut ledger, Lifecycle::PrePersist, &clock).unwrap();
        ledger
            .lifecycle
            .raise(Message::domain("ledger.opened", None, serde_json::json!({}), &clock));
        ledger
            .lifecycle
            .raise(Message::domain("ledger.funded", None, serde_json::json!({}), &clock));

        // Act
        let raised = ledger.lifecycle.take_raised();

        // Assert
        let types: Vec<_> = raised.iter().map(Message::message_type).collect();
        assert_eq!(types, vec!["ledger.opened", "ledger.funded"]);
        assert_eq!(ledger.lifecycle.messages().len(), 1);
        assert_eq!(
            ledger.lifecycle.messages()[0].lifecycle_state(),
            Some(Lifecycle::PrePersist)
        );
    }
}
