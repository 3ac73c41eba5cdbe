//! # Data Models
//!
//! The envelope that travels between step consumers, the immutable workflow
//! definitions it refers to, and the persisted execution records.

pub mod definition;
pub mod envelope;
pub mod execution;

pub use definition::{
    StepDefinition, StepSummary, WorkflowDefinition, WorkflowDefinitionBuilder, WorkflowSummary,
};
pub use envelope::{ErrorInfo, RetryInfo, WorkflowMessage};
pub use execution::{ExecutionAttempt, PayloadChange, StepExecution, WorkflowExecution};
