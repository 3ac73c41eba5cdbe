//! # Message Broker Facade
//!
//! Uniform delivery contract over an arbitrary transport. Destinations are
//! plain strings: the workflow topic for step envelopes, plus the
//! `.completed`, `.retry` and dead-letter channels derived from it.

use crate::messaging::MessagingError;
use crate::models::WorkflowMessage;
use async_trait::async_trait;
use futures::future::BoxFuture;

/// Outbound side of a message transport
#[async_trait]
pub trait MessageBroker: Send + Sync + 'static {
    /// Hand the envelope to the transport without waiting for broker acknowledgement
    async fn send(&self, destination: &str, message: &WorkflowMessage) -> Result<(), MessagingError>;

    /// Send and wait until the broker has acknowledged the envelope
    async fn send_sync(
        &self,
        destination: &str,
        message: &WorkflowMessage,
    ) -> Result<(), MessagingError>;

    /// Start a send and return its completion; failures surface through the future
    fn send_async(
        &self,
        destination: String,
        message: WorkflowMessage,
    ) -> BoxFuture<'static, Result<(), MessagingError>>;

    /// Transport identifier, e.g. `kafka`; also names the circuit breaker
    fn broker_type(&self) -> &str;

    /// Transport health as reported by the broker itself
    async fn is_available(&self) -> bool;
}
