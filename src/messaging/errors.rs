//! # Messaging Error Types
//!
//! Structured error types for broker operations using thiserror.

use crate::resilience::{CircuitBreakerError, CircuitState};
use thiserror::Error;

/// Broker operation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MessagingError {
    /// Synthetic rejection; the delegate broker was never called
    #[error("Circuit breaker '{name}' is {state} and does not permit further calls")]
    CircuitBreakerOpen { name: String, state: CircuitState },

    #[error("Send to {destination} failed: {message}")]
    Send {
        destination: String,
        message: String,
    },

    #[error("Broker unavailable: {broker_type}: {message}")]
    Unavailable {
        broker_type: String,
        message: String,
    },

    #[error("Message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("Message deserialization error: {message}")]
    MessageDeserialization { message: String },

    #[error("Network timeout: operation {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Configuration error: {component}: {message}")]
    Configuration { component: String, message: String },

    #[error("Internal messaging error: {message}")]
    Internal { message: String },
}

impl MessagingError {
    /// Create a circuit breaker open error
    pub fn circuit_breaker_open(name: impl Into<String>, state: CircuitState) -> Self {
        Self::CircuitBreakerOpen {
            name: name.into(),
            state,
        }
    }

    /// Create a send error
    pub fn send(destination: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Send {
            destination: destination.into(),
            message: message.into(),
        }
    }

    /// Create a broker unavailable error
    pub fn unavailable(broker_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            broker_type: broker_type.into(),
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::MessageSerialization {
            message: message.into(),
        }
    }

    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::MessageDeserialization {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error is a breaker rejection rather than a delegate failure
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitBreakerOpen { .. })
    }
}

/// Conversion from serde_json::Error to MessagingError
impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() || err.is_data() || err.is_eof() {
            MessagingError::deserialization(err.to_string())
        } else {
            MessagingError::serialization(err.to_string())
        }
    }
}

/// Conversion from circuit breaker errors
impl From<CircuitBreakerError<MessagingError>> for MessagingError {
    fn from(err: CircuitBreakerError<MessagingError>) -> Self {
        match err {
            CircuitBreakerError::CircuitOpen { component, state } => {
                MessagingError::circuit_breaker_open(component, state)
            }
            CircuitBreakerError::OperationFailed(inner) => inner,
        }
    }
}
