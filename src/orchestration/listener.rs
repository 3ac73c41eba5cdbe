//! # Workflow Message Listener
//!
//! Consumer-side glue between a broker subscription and the step executor.
//! Acknowledgment is manual: a message is acked only after its transition has
//! been routed, and nacked when routing failed so the broker redelivers it.

use crate::config::ConsumerSettings;
use crate::events::WorkflowEventPublisher;
use crate::models::WorkflowMessage;
use crate::orchestration::step_executor::StepExecutor;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Acknowledgment decision handed back to the broker client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgment {
    /// Mark consumed
    Ack,
    /// Leave unacknowledged for redelivery
    Nack,
}

impl Acknowledgment {
    pub fn is_ack(&self) -> bool {
        matches!(self, Acknowledgment::Ack)
    }
}

#[derive(Debug)]
pub struct WorkflowMessageListener {
    executor: Arc<StepExecutor>,
    events: Option<WorkflowEventPublisher>,
    concurrency: usize,
}

impl WorkflowMessageListener {
    pub fn new(executor: Arc<StepExecutor>, consumer: &ConsumerSettings) -> Self {
        Self {
            executor,
            events: None,
            concurrency: consumer.concurrency.max(1),
        }
    }

    /// Broadcast every received envelope to `publisher`
    pub fn with_event_publisher(mut self, publisher: WorkflowEventPublisher) -> Self {
        self.events = Some(publisher);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Handle one delivered envelope
    pub async fn on_message(&self, message: &WorkflowMessage) -> Acknowledgment {
        if let Some(events) = &self.events {
            events.publish_received(message);
        }

        if !message.status.is_processable() {
            debug!(
                execution_id = %message.execution_id,
                status = %message.status,
                "Acknowledging informational envelope"
            );
            return Acknowledgment::Ack;
        }

        match self.executor.execute(message).await {
            Ok(transition) => {
                debug!(
                    execution_id = %message.execution_id,
                    step = message.current_step,
                    transition = %transition,
                    "Envelope processed"
                );
                Acknowledgment::Ack
            }
            Err(error) => {
                warn!(
                    execution_id = %message.execution_id,
                    step = message.current_step,
                    error = %error,
                    circuit_open = error.is_circuit_open(),
                    "Routing failed, leaving envelope for redelivery"
                );
                Acknowledgment::Nack
            }
        }
    }

    /// Process a batch with at most `concurrency` envelopes in flight
    ///
    /// Acknowledgments are returned in input order.
    pub async fn dispatch_all(&self, messages: &[WorkflowMessage]) -> Vec<Acknowledgment> {
        let permits = Semaphore::new(self.concurrency);
        join_all(messages.iter().map(|message| {
            let permits = &permits;
            async move {
                match permits.acquire().await {
                    Ok(_permit) => self.on_message(message).await,
                    Err(_) => Acknowledgment::Nack,
                }
            }
        }))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StepflowConfig;
    use crate::constants::WorkflowStatus;
    use crate::events::WorkflowEventKind;
    use crate::messaging::InMemoryMessageBroker;
    use crate::models::{StepDefinition, WorkflowDefinition};
    use crate::orchestration::registry::WorkflowRegistry;
    use crate::orchestration::step_handler::step_fn;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn listener(
        step: StepDefinition,
        concurrency: usize,
    ) -> (WorkflowMessageListener, InMemoryMessageBroker) {
        let registry = Arc::new(WorkflowRegistry::new());
        registry
            .register(WorkflowDefinition::builder("orders").step(step).build().unwrap())
            .unwrap();
        let broker = InMemoryMessageBroker::new();
        let executor = Arc::new(StepExecutor::new(
            registry,
            Arc::new(broker.clone()),
            &StepflowConfig::default(),
        ));
        (
            WorkflowMessageListener::new(executor, &ConsumerSettings { concurrency }),
            broker,
        )
    }

    fn message(id: &str) -> WorkflowMessage {
        WorkflowMessage::new(id, "corr", "orders", 1, json!({}))
    }

    #[tokio::test]
    async fn test_ack_after_routing() {
        let (listener, broker) = listener(
            StepDefinition::new(1, "only", step_fn(|_| async { Ok(()) })),
            1,
        );
        assert_eq!(listener.on_message(&message("e1")).await, Acknowledgment::Ack);
        assert_eq!(broker.queue_length("orders.completed").await, 1);
    }

    #[tokio::test]
    async fn test_nack_when_broker_fails() {
        let (listener, broker) = listener(
            StepDefinition::new(1, "only", step_fn(|_| async { Ok(()) })),
            1,
        );
        broker.set_failing(true);
        assert_eq!(listener.on_message(&message("e1")).await, Acknowledgment::Nack);
    }

    #[tokio::test]
    async fn test_informational_envelopes_are_acked_and_published() {
        let (listener, broker) = listener(
            StepDefinition::new(1, "only", step_fn(|_| async { Ok(()) })),
            1,
        );
        let publisher = WorkflowEventPublisher::new(4);
        let mut events = publisher.subscribe();
        let listener = listener.with_event_publisher(publisher);

        let done = message("e1").with_status(WorkflowStatus::Completed);
        assert!(listener.on_message(&done).await.is_ack());
        assert_eq!(broker.send_call_count(), 0);
        assert_eq!(events.recv().await.unwrap().kind, WorkflowEventKind::Received);
    }

    #[tokio::test]
    async fn test_dispatch_all_respects_concurrency() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (current, max_seen) = (Arc::clone(&in_flight), Arc::clone(&peak));
        let step = StepDefinition::new(
            1,
            "slow",
            step_fn(move |_| {
                let current = Arc::clone(&current);
                let max_seen = Arc::clone(&max_seen);
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );
        let (listener, broker) = listener(step, 2);

        let batch: Vec<_> = (0..6).map(|i| message(&format!("e{i}"))).collect();
        let acks = listener.dispatch_all(&batch).await;

        assert_eq!(acks.len(), 6);
        assert!(acks.iter().all(Acknowledgment::is_ack));
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(broker.queue_length("orders.completed").await, 6);
    }
}
