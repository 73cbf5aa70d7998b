//! Mock `MessageDispatcher` implementations for tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use unitwork_core::dispatcher::MessageDispatcher;
use unitwork_core::error::DispatchError;
use unitwork_core::message::Message;
use unitwork_core::transaction::TransactionId;
use unitwork_core::unit_of_work::UnitOfWork;

use crate::clock::fixed_clock;

/// A dispatcher that records every batch it receives, together with the
/// transaction of the unit that drained it, and always succeeds.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    batches: Mutex<Vec<(TransactionId, Vec<Message>)>>,
}

impl RecordingDispatcher {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of every batch, in dispatch order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn batches(&self) -> Vec<Vec<Message>> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .map(|(_, batch)| batch.clone())
            .collect()
    }

    /// Returns the batches drained by one transaction.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn batches_for(&self, transaction_id: TransactionId) -> Vec<Vec<Message>> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == transaction_id)
            .map(|(_, batch)| batch.clone())
            .collect()
    }

    /// Returns the message types of every dispatched message, flattened.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn message_types(&self) -> Vec<String> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(_, batch)| batch.iter().map(|m| m.message_type().to_owned()))
            .collect()
    }

    /// Returns the number of dispatch calls.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn calls(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

#[async_trait]
impl MessageDispatcher for RecordingDispatcher {
    async fn dispatch(&self, batch: &[Message], unit: &UnitOfWork) -> Result<(), DispatchError> {
        self.batches
            .lock()
            .unwrap()
            .push((unit.transaction_id(), batch.to_vec()));
        Ok(())
    }
}

/// A dispatcher that always fails, as if the broker were down.
#[derive(Debug, Default)]
pub struct FailingDispatcher {
    calls: Mutex<usize>,
}

impl FailingDispatcher {
    /// Returns the number of dispatch attempts.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl MessageDispatcher for FailingDispatcher {
    async fn dispatch(&self, _batch: &[Message], _unit: &UnitOfWork) -> Result<(), DispatchError> {
        *self.calls.lock().unwrap() += 1;
        Err(DispatchError::Delivery("broker unavailable".into()))
    }
}

/// A dispatcher that registers one `test.cascade` message with the unit
/// being drained on each of its first `cycles` calls (or on every call), and
/// records every batch it receives.
#[derive(Debug)]
pub struct CascadingDispatcher {
    cycles: Option<usize>,
    batches: Mutex<Vec<Vec<Message>>>,
}

impl CascadingDispatcher {
    /// Cascades on every call; never converges.
    #[must_use]
    pub fn forever() -> Self {
        Self {
            cycles: None,
            batches: Mutex::new(Vec::new()),
        }
    }

    /// Cascades on the first `cycles` calls, then stops.
    #[must_use]
    pub fn for_cycles(cycles: usize) -> Self {
        Self {
            cycles: Some(cycles),
            batches: Mutex::new(Vec::new()),
        }
    }

    /// Returns a snapshot of every batch, in dispatch order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn batches(&self) -> Vec<Vec<Message>> {
        self.batches.lock().unwrap().clone()
    }

    /// Returns the number of dispatch calls.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn calls(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

#[async_trait]
impl MessageDispatcher for CascadingDispatcher {
    async fn dispatch(&self, batch: &[Message], unit: &UnitOfWork) -> Result<(), DispatchError> {
        let call = {
            let mut batches = self.batches.lock().unwrap();
            batches.push(batch.to_vec());
            batches.len()
        };
        if self.cycles.is_none_or(|cycles| call <= cycles) {
            let message = Message::domain(
                "test.cascade",
                None,
                serde_json::json!({ "call": call }),
                &fixed_clock(),
            );
            unit.register(message)
                .map_err(|e| DispatchError::Delivery(e.to_string()))?;
        }
        Ok(())
    }
}

/// A dispatcher that takes `delay` to accept each batch.
#[derive(Debug)]
pub struct SlowDispatcher {
    delay: Duration,
    started: Mutex<usize>,
    finished: Mutex<usize>,
}

impl SlowDispatcher {
    /// Creates a dispatcher that sleeps for `delay` on every call.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            started: Mutex::new(0),
            finished: Mutex::new(0),
        }
    }

    /// Returns the number of dispatch calls that began.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn started(&self) -> usize {
        *self.started.lock().unwrap()
    }

    /// Returns the number of dispatch calls that ran to completion.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn finished(&self) -> usize {
        *self.finished.lock().unwrap()
    }
}

#[async_trait]
impl MessageDispatcher for SlowDispatcher {
    async fn dispatch(&self, _batch: &[Message], _unit: &UnitOfWork) -> Result<(), DispatchError> {
        *self.started.lock().unwrap() += 1;
        tokio::time::sleep(self.delay).await;
        *self.finished.lock().unwrap() += 1;
        Ok(())
    }
}
