//! # Event Publisher
//!
//! Broadcast channel for workflow message events.
//!
//! ```rust
//! use stepflow_core::events::{WorkflowEventKind, WorkflowEventPublisher};
//! use stepflow_core::models::WorkflowMessage;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let publisher = WorkflowEventPublisher::new(16);
//! let mut events = publisher.subscribe();
//!
//! let message = WorkflowMessage::new("exec-1", "corr-1", "orders", 2, json!({}));
//! assert_eq!(publisher.publish_emitted(&message, "orders"), 1);
//!
//! let event = events.recv().await.unwrap();
//! assert_eq!(event.kind, WorkflowEventKind::Emitted);
//! assert_eq!(event.destination.as_deref(), Some("orders"));
//! # });
//! ```

use crate::models::WorkflowMessage;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

/// Default broadcast channel capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 1000;

/// How the envelope reached the publisher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEventKind {
    /// Consumed from a topic by a listener
    Received,
    /// Produced by the executor, starter or command service
    Emitted,
    /// State changed without any message being sent
    Transitioned,
}

/// Event carrying a snapshot of an envelope
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMessageEvent {
    pub kind: WorkflowEventKind,
    pub message: WorkflowMessage,
    /// Destination for emitted envelopes
    pub destination: Option<String>,
    pub published_at: DateTime<Utc>,
}

impl WorkflowMessageEvent {
    pub fn received(message: WorkflowMessage) -> Self {
        Self {
            kind: WorkflowEventKind::Received,
            message,
            destination: None,
            published_at: Utc::now(),
        }
    }

    pub fn emitted(message: WorkflowMessage, destination: impl Into<String>) -> Self {
        Self {
            kind: WorkflowEventKind::Emitted,
            message,
            destination: Some(destination.into()),
            published_at: Utc::now(),
        }
    }

    pub fn transitioned(message: WorkflowMessage) -> Self {
        Self {
            kind: WorkflowEventKind::Transitioned,
            message,
            destination: None,
            published_at: Utc::now(),
        }
    }
}

/// Broadcast publisher for workflow message events
#[derive(Debug, Clone)]
pub struct WorkflowEventPublisher {
    sender: broadcast::Sender<WorkflowMessageEvent>,
}

impl WorkflowEventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event, returning how many subscribers it reached
    ///
    /// Having no subscribers is not an error.
    pub fn publish(&self, event: WorkflowMessageEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                trace!(
                    execution_id = %event.message.execution_id,
                    "No subscribers for workflow event"
                );
                0
            }
        }
    }

    pub fn publish_received(&self, message: &WorkflowMessage) -> usize {
        self.publish(WorkflowMessageEvent::received(message.clone()))
    }

    pub fn publish_emitted(&self, message: &WorkflowMessage, destination: &str) -> usize {
        self.publish(WorkflowMessageEvent::emitted(message.clone(), destination))
    }

    pub fn publish_transitioned(&self, message: &WorkflowMessage) -> usize {
        self.publish(WorkflowMessageEvent::transitioned(message.clone()))
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowMessageEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for WorkflowEventPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
