//! # System Constants
//!
//! Core constants and enums that define the operational vocabulary of the
//! workflow engine: execution statuses, channel suffixes, error codes and the
//! circuit breaker names registered at startup.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of one workflow execution, carried on every envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    /// Envelope built by the starter, first step not yet picked up
    Pending,
    /// A step consumer owns the envelope
    InProgress,
    /// A step failed and a retry has been routed to the retry channel
    RetryPending,
    /// Last step succeeded
    Completed,
    /// Dead-lettered after exhaustion or a non-retryable failure
    Failed,
    /// Cancelled by an operator
    Cancelled,
    /// Halted by an operator, resumable
    Paused,
}

impl WorkflowStatus {
    /// Statuses the step executor acts on; everything else is informational
    pub fn is_processable(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }

    /// Statuses from which `resume` is permitted
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Failed | Self::Paused | Self::RetryPending)
    }

    /// Statuses that can no longer be cancelled
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::RetryPending => "RETRY_PENDING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Paused => "PAUSED",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "RETRY_PENDING" => Ok(Self::RetryPending),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            "PAUSED" => Ok(Self::Paused),
            _ => Err(format!("Invalid workflow status: {s}")),
        }
    }
}

/// Channel naming for the destinations derived from a workflow topic
pub mod destinations {
    pub const COMPLETED_SUFFIX: &str = ".completed";
    pub const RETRY_SUFFIX: &str = ".retry";
    pub const DEFAULT_DLQ_SUFFIX: &str = ".dlq";

    pub fn completed(topic: &str) -> String {
        format!("{topic}{COMPLETED_SUFFIX}")
    }

    pub fn retry(topic: &str) -> String {
        format!("{topic}{RETRY_SUFFIX}")
    }

    pub fn dead_letter(topic: &str, suffix: &str) -> String {
        format!("{topic}{suffix}")
    }
}

/// Error codes written into `ErrorInfo`
pub mod error_codes {
    pub const STEP_EXECUTION_FAILED: &str = "STEP_EXECUTION_FAILED";
}

/// Well-known failure classes produced by the engine itself
pub mod error_classes {
    /// Step exceeded its configured duration
    pub const STEP_TIMEOUT: &str = "StepTimeout";
    /// Payload could not be converted into the step's input type
    pub const PAYLOAD_DESERIALIZATION: &str = "PayloadDeserialization";
    /// Caller supplied an argument the step rejects outright
    pub const INVALID_ARGUMENT: &str = "InvalidArgument";
    /// Failure raised without a more specific class
    pub const STEP_EXECUTION: &str = "StepExecution";
}

/// Circuit breaker naming
pub mod circuit_breakers {
    pub const BROKER_PREFIX: &str = "broker-";

    /// Breakers created eagerly when the manager is built from configuration
    pub const DEFAULT_CIRCUIT_BREAKERS: [&str; 3] =
        ["broker-kafka", "broker-rabbitmq", "workflow-execution"];

    pub fn broker(broker_type: &str) -> String {
        format!("{BROKER_PREFIX}{broker_type}")
    }
}

/// Maximum length of the stack trace text stored on `ErrorInfo`
pub const MAX_STACK_TRACE_LENGTH: usize = 2000;
