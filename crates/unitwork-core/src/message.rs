//! Messages: immutable records of something that happened to an aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::lifecycle::Lifecycle;

/// Metadata carried by every message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Unique message identifier.
    pub message_id: Uuid,
    /// Type name used for routing.
    pub message_type: String,
    /// Aggregate the message originates from, if any.
    pub aggregate_id: Option<Uuid>,
    /// Correlation ID for tracing a command through its effects.
    pub correlation_id: Option<Uuid>,
    /// Timestamp of message creation.
    pub occurred_at: DateTime<Utc>,
}

/// Payload of a lifecycle message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateLifecycleChanged {
    /// The aggregate that transitioned.
    pub aggregate_id: Uuid,
    /// The aggregate's type name.
    pub aggregate_type: String,
    /// The state the aggregate entered.
    pub lifecycle: Lifecycle,
}

/// Message payload variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessagePayload {
    /// An aggregate reached a lifecycle state.
    Lifecycle(AggregateLifecycleChanged),
    /// An arbitrary domain fact.
    Domain(serde_json::Value),
}

/// Trait implemented by domain events that can travel as messages.
pub trait DomainEvent: Send + Sync + std::fmt::Debug {
    /// Returns the event type name (used for routing).
    fn event_type(&self) -> &'static str;

    /// Serializes the event payload to JSON.
    fn to_payload(&self) -> serde_json::Value;

    /// Returns the metadata for this event.
    fn metadata(&self) -> &MessageMetadata;
}

/// An immutable, independently dispatchable message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    metadata: MessageMetadata,
    payload: MessagePayload,
}

impl Message {
    /// Builds the message announcing that an aggregate entered `lifecycle`.
    #[must_use]
    pub fn lifecycle(
        aggregate_id: Uuid,
        aggregate_type: &str,
        lifecycle: Lifecycle,
        clock: &dyn Clock,
    ) -> Self {
        Self {
            metadata: MessageMetadata {
                message_id: Uuid::new_v4(),
                message_type: lifecycle.message_type().to_owned(),
                aggregate_id: Some(aggregate_id),
                correlation_id: None,
                occurred_at: clock.now(),
            },
            payload: MessagePayload::Lifecycle(AggregateLifecycleChanged {
                aggregate_id,
                aggregate_type: aggregate_type.to_owned(),
                lifecycle,
            }),
        }
    }

    /// Wraps a domain event. The event's own metadata is kept, with the
    /// message type forced to the event type.
    #[must_use]
    pub fn from_event(event: &dyn DomainEvent) -> Self {
        let mut metadata = event.metadata().clone();
        event.event_type().clone_into(&mut metadata.message_type);
        Self {
            metadata,
            payload: MessagePayload::Domain(event.to_payload()),
        }
    }

    /// Builds a domain message from raw parts.
    #[must_use]
    pub fn domain(
        message_type: &str,
        aggregate_id: Option<Uuid>,
        body: serde_json::Value,
        clock: &dyn Clock,
    ) -> Self {
        Self {
            metadata: MessageMetadata {
                message_id: Uuid::new_v4(),
                message_type: message_type.to_owned(),
                aggregate_id,
                correlation_id: None,
                occurred_at: clock.now(),
            },
            payload: MessagePayload::Domain(body),
        }
    }

    /// Returns a copy of this message carrying `correlation_id`.
    #[must_use]
    pub fn correlated(mut self, correlation_id: Uuid) -> Self {
        self.metadata.correlation_id = Some(correlation_id);
        self
    }

    /// Returns the message metadata.
    #[must_use]
    pub fn metadata(&self) -> &MessageMetadata {
        &self.metadata
    }

    /// Returns the message payload.
    #[must_use]
    pub fn payload(&self) -> &MessagePayload {
        &self.payload
    }

    /// Returns the routing type name.
    #[must_use]
    pub fn message_type(&self) -> &str {
        &self.metadata.message_type
    }

    /// Returns the lifecycle state this message announces, if it is a lifecycle message.
    #[must_use]
    pub fn lifecycle_state(&self) -> Option<Lifecycle> {
        match &self.payload {
            MessagePayload::Lifecycle(changed) => Some(changed.lifecycle),
            MessagePayload::Domain(_) => None,
        }
    }
}
