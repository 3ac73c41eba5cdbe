//! # In-Memory Message Broker
//!
//! Thread-safe in-memory broker for tests, local development and embedding.
//! Every destination is a FIFO queue; nothing is consumed automatically, so
//! callers drain destinations explicitly with [`InMemoryMessageBroker::take`].
//!
//! Failure injection (`fail_next`, `set_failing`, `set_available`) lets tests
//! drive the resilience layer without a real transport.

use crate::messaging::{MessageBroker, MessagingError};
use crate::models::WorkflowMessage;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug)]
struct BrokerState {
    broker_type: String,
    /// Destination name -> queued envelopes (FIFO order)
    queues: RwLock<HashMap<String, VecDeque<WorkflowMessage>>>,
    /// Every delivery attempt, successful or not
    send_calls: AtomicU64,
    total_delivered: AtomicU64,
    /// Remaining deliveries to fail before recovering
    failures_remaining: AtomicU32,
    always_fail: AtomicBool,
    available: AtomicBool,
}

impl BrokerState {
    async fn deliver(&self, destination: &str, message: &WorkflowMessage) -> Result<(), MessagingError> {
        self.send_calls.fetch_add(1, Ordering::Relaxed);

        let injected = self.always_fail.load(Ordering::Acquire)
            || self
                .failures_remaining
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                .is_ok();
        if injected {
            return Err(MessagingError::send(destination, "injected delivery failure"));
        }

        let mut queues = self.queues.write().await;
        queues
            .entry(destination.to_string())
            .or_default()
            .push_back(message.clone());
        self.total_delivered.fetch_add(1, Ordering::Relaxed);

        debug!(
            destination = destination,
            execution_id = %message.execution_id,
            step = message.current_step,
            status = %message.status,
            "Message delivered to in-memory destination"
        );
        Ok(())
    }
}

/// In-memory broker; clones share the same queues
#[derive(Debug, Clone)]
pub struct InMemoryMessageBroker {
    state: Arc<BrokerState>,
}

impl Default for InMemoryMessageBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessageBroker {
    /// Create a new broker reporting `memory` as its type
    pub fn new() -> Self {
        Self::with_broker_type("memory")
    }

    /// Create a broker impersonating another transport type, e.g. `kafka`
    pub fn with_broker_type(broker_type: impl Into<String>) -> Self {
        Self {
            state: Arc::new(BrokerState {
                broker_type: broker_type.into(),
                queues: RwLock::new(HashMap::new()),
                send_calls: AtomicU64::new(0),
                total_delivered: AtomicU64::new(0),
                failures_remaining: AtomicU32::new(0),
                always_fail: AtomicBool::new(false),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Fail the next `count` deliveries
    pub fn fail_next(&self, count: u32) {
        self.state.failures_remaining.store(count, Ordering::Release);
    }

    /// Fail every delivery until switched off
    pub fn set_failing(&self, failing: bool) {
        self.state.always_fail.store(failing, Ordering::Release);
    }

    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::Release);
    }

    /// Number of delivery attempts received, including failed ones
    pub fn send_call_count(&self) -> u64 {
        self.state.send_calls.load(Ordering::Relaxed)
    }

    pub fn total_delivered(&self) -> u64 {
        self.state.total_delivered.load(Ordering::Relaxed)
    }

    /// Get the number of messages waiting at a destination
    pub async fn queue_length(&self, destination: &str) -> usize {
        let queues = self.state.queues.read().await;
        queues.get(destination).map(VecDeque::len).unwrap_or(0)
    }

    /// Copy of the messages waiting at a destination, oldest first
    pub async fn messages(&self, destination: &str) -> Vec<WorkflowMessage> {
        let queues = self.state.queues.read().await;
        queues
            .get(destination)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove and return every message waiting at a destination
    pub async fn take(&self, destination: &str) -> Vec<WorkflowMessage> {
        let mut queues = self.state.queues.write().await;
        queues
            .get_mut(destination)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default()
    }

    /// Remove and return the oldest message at a destination
    pub async fn pop(&self, destination: &str) -> Option<WorkflowMessage> {
        let mut queues = self.state.queues.write().await;
        queues.get_mut(destination).and_then(VecDeque::pop_front)
    }

    /// Put an unacknowledged message back at the head of its destination
    ///
    /// Models broker-side redelivery; it is not counted as a send.
    pub async fn redeliver(&self, destination: &str, message: WorkflowMessage) {
        let mut queues = self.state.queues.write().await;
        queues
            .entry(destination.to_string())
            .or_default()
            .push_front(message);
    }

    /// Destinations that currently hold messages, sorted
    pub async fn destinations(&self) -> Vec<String> {
        let queues = self.state.queues.read().await;
        let mut names: Vec<String> = queues
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Clear all queues (for testing)
    pub async fn clear_all(&self) {
        let mut queues = self.state.queues.write().await;
        queues.clear();
    }
}

#[async_trait]
impl MessageBroker for InMemoryMessageBroker {
    async fn send(&self, destination: &str, message: &WorkflowMessage) -> Result<(), MessagingError> {
        self.state.deliver(destination, message).await
    }

    async fn send_sync(
        &self,
        destination: &str,
        message: &WorkflowMessage,
    ) -> Result<(), MessagingError> {
        self.state.deliver(destination, message).await
    }

    fn send_async(
        &self,
        destination: String,
        message: WorkflowMessage,
    ) -> BoxFuture<'static, Result<(), MessagingError>> {
        let state = Arc::clone(&self.state);
        async move { state.deliver(&destination, &message).await }.boxed()
    }

    fn broker_type(&self) -> &str {
        &self.state.broker_type
    }

    async fn is_available(&self) -> bool {
        self.state.available.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message() -> WorkflowMessage {
        WorkflowMessage::new("exec-1", "corr-1", "orders", 2, json!({}))
    }

    #[tokio::test]
    async fn test_send_and_take() {
        let broker = InMemoryMessageBroker::new();
        broker.send("orders", &message()).await.unwrap();
        broker.send_sync("orders", &message()).await.unwrap();
        broker
            .send_async("orders.completed".to_string(), message())
            .await
            .unwrap();

        assert_eq!(broker.queue_length("orders").await, 2);
        assert_eq!(
            broker.destinations().await,
            vec!["orders".to_string(), "orders.completed".to_string()]
        );

        let taken = broker.take("orders").await;
        assert_eq!(taken.len(), 2);
        assert_eq!(broker.queue_length("orders").await, 0);
        assert!(broker.pop("orders.completed").await.is_some());
        assert_eq!(broker.total_delivered(), 3);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let broker = InMemoryMessageBroker::with_broker_type("kafka");
        assert_eq!(broker.broker_type(), "kafka");

        broker.fail_next(2);
        assert!(broker.send("orders", &message()).await.is_err());
        assert!(broker.send("orders", &message()).await.is_err());
        assert!(broker.send("orders", &message()).await.is_ok());

        broker.set_failing(true);
        assert!(broker
            .send_async("orders".to_string(), message())
            .await
            .is_err());

        assert_eq!(broker.send_call_count(), 4);
        assert_eq!(broker.total_delivered(), 1);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let broker = InMemoryMessageBroker::new();
        let handle = broker.clone();
        broker.send("orders", &message()).await.unwrap();
        assert_eq!(handle.queue_length("orders").await, 1);

        handle.set_available(false);
        assert!(!broker.is_available().await);
        handle.clear_all().await;
        assert!(broker.messages("orders").await.is_empty());
    }

    #[tokio::test]
    async fn test_redeliver_goes_to_front_uncounted() {
        let broker = InMemoryMessageBroker::new();
        broker.send("orders", &message()).await.unwrap();
        broker
            .redeliver("orders", message().with_current_step(2))
            .await;

        assert_eq!(broker.send_call_count(), 1);
        assert_eq!(broker.pop("orders").await.unwrap().current_step, 2);
        assert_eq!(broker.pop("orders").await.unwrap().current_step, 1);
    }
}
