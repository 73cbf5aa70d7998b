//! Message dispatcher contract and the dispatchers shipped with the core.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::DispatchError;
use crate::message::Message;
use crate::unit_of_work::UnitOfWork;

/// Delivers drained messages downstream.
///
/// `unit` is the unit of work being drained. Handlers that mutate other
/// aggregates register the resulting messages with it; those land in the
/// next drain cycle. The unit of work never redelivers a batch once this
/// returns `Ok`, and never deduplicates.
#[async_trait]
pub trait MessageDispatcher: Send + Sync {
    /// Delivers `batch`, in order.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError` if any message could not be delivered. The
    /// owning transaction rolls back.
    async fn dispatch(&self, batch: &[Message], unit: &UnitOfWork) -> Result<(), DispatchError>;
}

#[async_trait]
impl<D> MessageDispatcher for Arc<D>
where
    D: MessageDispatcher + ?Sized,
{
    async fn dispatch(&self, batch: &[Message], unit: &UnitOfWork) -> Result<(), DispatchError> {
        (**self).dispatch(batch, unit).await
    }
}

/// In-process observer of one message type.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handles one message.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError` to abort the batch.
    async fn handle(&self, message: &Message, unit: &UnitOfWork) -> Result<(), DispatchError>;
}

/// Subscription key matching every message type.
pub const ANY_MESSAGE_TYPE: &str = "*";

/// Routes each message to the handlers subscribed to its type, in
/// subscription order. The first handler error aborts the batch.
#[derive(Default)]
pub struct InProcessDispatcher {
    handlers: Vec<(String, Arc<dyn MessageHandler>)>,
}

impl fmt::Debug for InProcessDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let types: Vec<&str> = self.handlers.iter().map(|(t, _)| t.as_str()).collect();
        f.debug_struct("InProcessDispatcher")
            .field("subscriptions", &types)
            .finish()
    }
}

impl InProcessDispatcher {
    /// Creates a dispatcher with no subscriptions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `handler` to `message_type` (or [`ANY_MESSAGE_TYPE`]).
    #[must_use]
    pub fn subscribe(
        mut self,
        message_type: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        self.handlers.push((message_type.into(), handler));
        self
    }
}

#[async_trait]
impl MessageDispatcher for InProcessDispatcher {
    async fn dispatch(&self, batch: &[Message], unit: &UnitOfWork) -> Result<(), DispatchError> {
        for message in batch {
            let matching = self.handlers.iter().filter(|(message_type, _)| {
                message_type == ANY_MESSAGE_TYPE || message_type == message.message_type()
            });
            for (_, handler) in matching {
                handler.handle(message, unit).await?;
            }
        }
        Ok(())
    }
}

/// Bounds every dispatch call of the wrapped dispatcher by a timeout.
#[derive(Debug)]
pub struct TimeoutDispatcher<D> {
    inner: D,
    timeout: Duration,
}

impl<D> TimeoutDispatcher<D> {
    /// Wraps `inner`, failing any dispatch slower than `timeout`.
    #[must_use]
    pub fn new(inner: D, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl<D> MessageDispatcher for TimeoutDispatcher<D>
where
    D: MessageDispatcher,
{
    async fn dispatch(&self, batch: &[Message], unit: &UnitOfWork) -> Result<(), DispatchError> {
        tokio::time::timeout(self.timeout, self.inner.dispatch(batch, unit))
            .await
            .map_err(|_| DispatchError::TimedOut(self.timeout.as_millis()))?
    }
}

/// Logs every message and accepts it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingDispatcher;

#[async_trait]
impl MessageDispatcher for LoggingDispatcher {
    async fn dispatch(&self, batch: &[Message], unit: &UnitOfWork) -> Result<(), DispatchError> {
        for message in batch {
            let metadata = message.metadata();
            tracing::info!(
                transaction_id = %unit.transaction_id(),
                message_id = %metadata.message_id,
                message_type = %metadata.message_type,
                aggregate_id = ?metadata.aggregate_id,
                "message dispatched"
            );
        }
        Ok(())
    }
}
