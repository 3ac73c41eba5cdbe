use crate::config::ConfigurationError;
use crate::messaging::MessagingError;
use crate::orchestration::errors::{CommandError, RegistryError};
use crate::persistence::PersistenceError;
use thiserror::Error;

/// Top-level error for embedding applications
#[derive(Error, Debug)]
pub enum StepflowError {
    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Command(#[from] CommandError),
}

impl StepflowError {
    /// Breaker rejected the call without reaching the broker
    pub fn is_circuit_open(&self) -> bool {
        match self {
            StepflowError::Messaging(error) => error.is_circuit_open(),
            StepflowError::Command(CommandError::Messaging(error)) => error.is_circuit_open(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, StepflowError>;
