//! # Workflow Envelope
//!
//! `WorkflowMessage` is the unit of transit between step consumers. It carries
//! the identity of one execution, its position in the workflow and the opaque
//! application payload. Every transition produces a new envelope; nothing in
//! here mutates an envelope in place once it has been handed to a broker.

use crate::constants::WorkflowStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Retry bookkeeping, present only once a step has failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryInfo {
    /// Current attempt number, starting at 1
    pub attempt: u32,
    pub max_attempts: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl RetryInfo {
    /// First-failure retry info
    pub fn initial(max_attempts: u32) -> Self {
        Self {
            attempt: 1,
            max_attempts,
            next_retry_at: None,
            last_error: None,
        }
    }

    /// Retry info for the following attempt
    pub fn next_attempt(&self, next_retry_at: DateTime<Utc>, last_error: impl Into<String>) -> Self {
        Self {
            attempt: self.attempt + 1,
            max_attempts: self.max_attempts,
            next_retry_at: Some(next_retry_at),
            last_error: Some(last_error.into()),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Whether the scheduled retry time has been reached
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_retry_at.is_some_and(|at| at <= now)
    }
}

/// Terminal failure description attached to dead-lettered envelopes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    pub error_class: String,
    /// Cause chain rendering, at most 2000 characters plus an ellipsis
    pub stack_trace: String,
    pub step_id: u32,
    pub step_label: String,
}

/// Message carrying one execution's state between steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMessage {
    pub execution_id: String,
    pub correlation_id: String,
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    /// 1-based index of the step to execute
    pub current_step: u32,
    pub total_steps: u32,
    pub status: WorkflowStatus,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_info: Option<RetryInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_info: Option<ErrorInfo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowMessage {
    /// Build the first envelope of a new execution
    pub fn new(
        execution_id: impl Into<String>,
        correlation_id: impl Into<String>,
        topic: impl Into<String>,
        total_steps: u32,
        payload: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            execution_id: execution_id.into(),
            correlation_id: correlation_id.into(),
            topic: topic.into(),
            service_name: None,
            current_step: 1,
            total_steps,
            status: WorkflowStatus::Pending,
            payload,
            payload_type: None,
            security_context: None,
            metadata: HashMap::new(),
            retry_info: None,
            error_info: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_payload_type(mut self, payload_type: impl Into<String>) -> Self {
        self.payload_type = Some(payload_type.into());
        self
    }

    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = Some(service_name.into());
        self
    }

    pub fn with_security_context(mut self, security_context: impl Into<String>) -> Self {
        self.security_context = Some(security_context.into());
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_status(mut self, status: WorkflowStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_current_step(mut self, current_step: u32) -> Self {
        self.current_step = current_step;
        self
    }

    pub fn with_retry_info(mut self, retry_info: RetryInfo) -> Self {
        self.retry_info = Some(retry_info);
        self
    }

    /// Envelope for the following step, same attempt
    ///
    /// The retry budget is per step, so retry info is dropped. Callers decide
    /// whether a following step exists; this always moves forward by one.
    pub fn next_step(&self) -> Self {
        let mut next = self.clone();
        next.current_step = self.current_step.saturating_add(1);
        next.status = WorkflowStatus::InProgress;
        next.retry_info = None;
        next.updated_at = Utc::now();
        next
    }

    /// RETRY_PENDING envelope put back on the workflow topic once its retry is due
    pub fn for_redelivery(&self) -> Self {
        let mut redelivered = self.clone();
        redelivered.status = WorkflowStatus::InProgress;
        redelivered.updated_at = Utc::now();
        redelivered
    }

    /// Envelope announcing successful completion
    pub fn complete(&self) -> Self {
        let mut completed = self.clone();
        completed.status = WorkflowStatus::Completed;
        completed.updated_at = Utc::now();
        completed
    }

    /// Envelope routed to the retry channel
    pub fn retry_pending(&self, retry_info: RetryInfo) -> Self {
        let mut retry = self.clone();
        retry.status = WorkflowStatus::RetryPending;
        retry.retry_info = Some(retry_info);
        retry.updated_at = Utc::now();
        retry
    }

    /// Envelope routed to the dead-letter channel
    pub fn dead_lettered(&self, error_info: ErrorInfo) -> Self {
        let mut failed = self.clone();
        failed.status = WorkflowStatus::Failed;
        failed.error_info = Some(error_info);
        failed.updated_at = Utc::now();
        failed
    }

    pub fn is_last_step(&self) -> bool {
        self.current_step >= self.total_steps
    }
}
