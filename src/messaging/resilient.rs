//! # Circuit Breaker Protected Broker
//!
//! Wraps any [`MessageBroker`] with the circuit breaker named
//! `broker-<broker_type>`. While the breaker does not permit calls, sends fail
//! with [`MessagingError::CircuitBreakerOpen`] and the wrapped broker is never
//! invoked. When circuit breakers are disabled, every call passes straight
//! through without gating or recording.

use crate::constants::circuit_breakers;
use crate::messaging::{MessageBroker, MessagingError};
use crate::models::WorkflowMessage;
use crate::resilience::{CircuitBreaker, CircuitBreakerManager, CircuitState};
use async_trait::async_trait;
use futures::future::{self, BoxFuture, FutureExt};
use std::sync::Arc;
use tracing::{info, warn};

/// Broker with circuit breaker protection
#[derive(Clone)]
pub struct ResilientMessageBroker {
    /// Underlying transport
    delegate: Arc<dyn MessageBroker>,

    /// `None` when protection is disabled
    circuit_breaker: Option<Arc<CircuitBreaker>>,
}

impl ResilientMessageBroker {
    /// Wrap `delegate` with the manager's breaker for its broker type
    pub async fn new(delegate: Arc<dyn MessageBroker>, manager: &CircuitBreakerManager) -> Self {
        if !manager.is_enabled() {
            info!(
                broker_type = delegate.broker_type(),
                "Circuit breaker protection disabled for broker"
            );
            return Self::unprotected(delegate);
        }

        let name = circuit_breakers::broker(delegate.broker_type());
        let circuit_breaker = manager.get_circuit_breaker(&name).await;
        Self::with_circuit_breaker(delegate, circuit_breaker)
    }

    /// Wrap `delegate` with an explicit breaker
    pub fn with_circuit_breaker(
        delegate: Arc<dyn MessageBroker>,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            delegate,
            circuit_breaker: Some(circuit_breaker),
        }
    }

    /// Pass-through wrapper without gating
    pub fn unprotected(delegate: Arc<dyn MessageBroker>) -> Self {
        Self {
            delegate,
            circuit_breaker: None,
        }
    }

    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.circuit_breaker.as_ref()
    }

    /// Breaker state, `None` when protection is disabled
    pub fn circuit_state(&self) -> Option<CircuitState> {
        self.circuit_breaker.as_ref().map(|breaker| breaker.state())
    }

    fn log_failure(&self, destination: &str, error: &MessagingError) {
        if error.is_circuit_open() {
            warn!(
                broker_type = self.delegate.broker_type(),
                destination = destination,
                error = %error,
                "Send rejected by circuit breaker"
            );
        } else {
            warn!(
                broker_type = self.delegate.broker_type(),
                destination = destination,
                error = %error,
                "Send failed"
            );
        }
    }
}

impl std::fmt::Debug for ResilientMessageBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientMessageBroker")
            .field("broker_type", &self.delegate.broker_type())
            .field("circuit_breaker", &self.circuit_breaker.as_ref().map(|b| b.name()))
            .finish()
    }
}

#[async_trait]
impl MessageBroker for ResilientMessageBroker {
    async fn send(&self, destination: &str, message: &WorkflowMessage) -> Result<(), MessagingError> {
        let Some(breaker) = &self.circuit_breaker else {
            return self.delegate.send(destination, message).await;
        };

        let result: Result<(), MessagingError> = breaker
            .call(|| self.delegate.send(destination, message))
            .await
            .map_err(Into::into);
        if let Err(error) = &result {
            self.log_failure(destination, error);
        }
        result
    }

    async fn send_sync(
        &self,
        destination: &str,
        message: &WorkflowMessage,
    ) -> Result<(), MessagingError> {
        let Some(breaker) = &self.circuit_breaker else {
            return self.delegate.send_sync(destination, message).await;
        };

        let result: Result<(), MessagingError> = breaker
            .call(|| self.delegate.send_sync(destination, message))
            .await
            .map_err(Into::into);
        if let Err(error) = &result {
            self.log_failure(destination, error);
        }
        result
    }

    fn send_async(
        &self,
        destination: String,
        message: WorkflowMessage,
    ) -> BoxFuture<'static, Result<(), MessagingError>> {
        let Some(breaker) = self.circuit_breaker.clone() else {
            return self.delegate.send_async(destination, message);
        };

        let Some(permit) = breaker.try_acquire_permission() else {
            let error = MessagingError::circuit_breaker_open(breaker.name(), breaker.state());
            self.log_failure(&destination, &error);
            return future::ready(Err(error)).boxed();
        };

        let delivery = self.delegate.send_async(destination, message);
        async move {
            let result = delivery.await;
            match &result {
                Ok(()) => breaker.on_success(permit),
                Err(_) => breaker.on_error(permit),
            }
            result
        }
        .boxed()
    }

    fn broker_type(&self) -> &str {
        self.delegate.broker_type()
    }

    async fn is_available(&self) -> bool {
        if self.circuit_state() == Some(CircuitState::Open) {
            return false;
        }
        self.delegate.is_available().await
    }
}
