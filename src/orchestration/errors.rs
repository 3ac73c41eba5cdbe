//! # Orchestration Errors
//!
//! Error types for workflow registration and the execution command service.

use crate::constants::WorkflowStatus;
use crate::messaging::MessagingError;
use crate::persistence::PersistenceError;
use thiserror::Error;

/// Workflow definition and lookup errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("No workflow registered for topic '{topic}'")]
    UnknownTopic { topic: String },

    #[error("Workflow '{topic}' has no step {step_id}")]
    UnknownStep { topic: String, step_id: u32 },

    #[error("Workflow already registered for topic '{topic}'")]
    DuplicateTopic { topic: String },

    #[error("Invalid workflow definition '{topic}': {reason}")]
    InvalidDefinition { topic: String, reason: String },
}

impl RegistryError {
    pub fn unknown_topic(topic: impl Into<String>) -> Self {
        Self::UnknownTopic {
            topic: topic.into(),
        }
    }

    pub fn unknown_step(topic: impl Into<String>, step_id: u32) -> Self {
        Self::UnknownStep {
            topic: topic.into(),
            step_id,
        }
    }

    pub fn duplicate_topic(topic: impl Into<String>) -> Self {
        Self::DuplicateTopic {
            topic: topic.into(),
        }
    }

    pub fn invalid_definition(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            topic: topic.into(),
            reason: reason.into(),
        }
    }
}

/// Errors returned by resume, cancel and payload edits
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Execution not found: {execution_id}")]
    NotFound { execution_id: String },

    /// The execution's status does not allow the requested operation
    #[error("Cannot {operation} execution {execution_id} in status {status}")]
    InvalidState {
        execution_id: String,
        status: WorkflowStatus,
        operation: String,
    },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Messaging(#[from] MessagingError),
}

impl CommandError {
    pub fn not_found(execution_id: impl Into<String>) -> Self {
        Self::NotFound {
            execution_id: execution_id.into(),
        }
    }

    pub fn invalid_state(
        execution_id: impl Into<String>,
        status: WorkflowStatus,
        operation: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            execution_id: execution_id.into(),
            status,
            operation: operation.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// State-conflict errors
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::InvalidState { .. })
    }
}
