//! # Execution Records
//!
//! Durable view of one workflow run. The envelope is transient; this record
//! is what operators inspect and what resume/cancel act on. It keeps the
//! step history, the list of execution attempts and any payload edits made
//! while the run was halted.
//!
//! Invariant: at most one attempt is open (no `ended_at`) at any time, and
//! while the execution is not finished exactly one is.

use crate::constants::WorkflowStatus;
use crate::models::envelope::{ErrorInfo, RetryInfo, WorkflowMessage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Provenance of one manual payload edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadChange {
    pub field_path: String,
    pub old_value: Option<Value>,
    pub new_value: Value,
    pub changed_at: DateTime<Utc>,
    pub changed_by: String,
    pub reason: Option<String>,
}

/// One start-or-resume cycle of an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionAttempt {
    /// 1-based, increases by one per resume
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub result: Option<WorkflowStatus>,
    pub start_step: u32,
    pub end_step: Option<u32>,
    pub error_message: Option<String>,
    /// Operator who resumed; never set on the first attempt
    pub resumed_by: Option<String>,
    pub payload_changes: Vec<PayloadChange>,
}

impl ExecutionAttempt {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Outcome of one step invocation as observed from the envelopes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepExecution {
    pub step_id: u32,
    pub status: WorkflowStatus,
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Persisted state of a workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub execution_id: String,
    pub correlation_id: String,
    pub topic: String,
    pub service_name: Option<String>,
    pub status: WorkflowStatus,
    pub current_step: u32,
    pub total_steps: u32,
    pub payload: Value,
    pub payload_type: Option<String>,
    #[serde(default)]
    pub security_context: Option<String>,
    pub metadata: HashMap<String, Value>,
    pub retry_info: Option<RetryInfo>,
    pub error_info: Option<ErrorInfo>,
    pub step_history: Vec<StepExecution>,
    /// Payload edits not yet attached to an attempt
    pub payload_history: Vec<PayloadChange>,
    pub execution_attempts: Vec<ExecutionAttempt>,
    pub initiated_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    /// Optimistic concurrency version, managed by the store
    pub version: u64,
}

impl WorkflowExecution {
    /// New record for the envelope that started a run, with attempt 1 open
    pub fn from_message(message: &WorkflowMessage) -> Self {
        let mut execution = Self {
            execution_id: message.execution_id.clone(),
            correlation_id: message.correlation_id.clone(),
            topic: message.topic.clone(),
            service_name: message.service_name.clone(),
            status: message.status,
            current_step: message.current_step,
            total_steps: message.total_steps,
            payload: message.payload.clone(),
            payload_type: message.payload_type.clone(),
            security_context: message.security_context.clone(),
            metadata: message.metadata.clone(),
            retry_info: message.retry_info.clone(),
            error_info: message.error_info.clone(),
            step_history: Vec::new(),
            payload_history: Vec::new(),
            execution_attempts: Vec::new(),
            initiated_by: None,
            created_at: message.created_at,
            updated_at: message.updated_at,
            completed_at: None,
            duration_ms: None,
            version: 0,
        };
        execution.begin_attempt(message.current_step, None, message.created_at);
        execution
    }

    pub fn with_initiated_by(mut self, initiated_by: impl Into<String>) -> Self {
        self.initiated_by = Some(initiated_by.into());
        self
    }

    pub fn current_attempt(&self) -> Option<&ExecutionAttempt> {
        self.execution_attempts.iter().rev().find(|a| a.is_open())
    }

    pub fn current_attempt_number(&self) -> u32 {
        self.current_attempt()
            .or_else(|| self.execution_attempts.last())
            .map(|a| a.attempt_number)
            .unwrap_or(0)
    }

    fn failure_message(&self) -> Option<String> {
        self.error_info
            .as_ref()
            .map(|e| e.message.clone())
            .or_else(|| self.retry_info.as_ref().and_then(|r| r.last_error.clone()))
    }

    /// Close the open attempt, if any, with the given result
    ///
    /// Steps still running under that attempt are closed with the same result.
    pub fn close_open_attempt(&mut self, result: WorkflowStatus, now: DateTime<Utc>) {
        let end_step = self.current_step;
        let error_message = match result {
            WorkflowStatus::Completed | WorkflowStatus::Cancelled => None,
            _ => self.failure_message(),
        };
        for step in self
            .step_history
            .iter_mut()
            .filter(|s| s.completed_at.is_none())
        {
            step.completed_at = Some(now);
            step.status = result;
            step.error_message = error_message.clone();
        }
        if let Some(attempt) = self
            .execution_attempts
            .iter_mut()
            .rev()
            .find(|a| a.is_open())
        {
            attempt.ended_at = Some(now);
            attempt.result = Some(result);
            attempt.end_step = Some(end_step);
            attempt.error_message = error_message;
        }
    }

    /// Start a new attempt at `start_step`, moving pending payload edits into it
    ///
    /// Any open attempt is closed first with the current status as its result.
    pub fn begin_attempt(
        &mut self,
        start_step: u32,
        resumed_by: Option<String>,
        now: DateTime<Utc>,
    ) -> &ExecutionAttempt {
        let status = self.status;
        self.close_open_attempt(status, now);

        let attempt_number = self.execution_attempts.len() as u32 + 1;
        let attempt = ExecutionAttempt {
            attempt_number,
            started_at: now,
            ended_at: None,
            result: None,
            start_step,
            end_step: None,
            error_message: None,
            resumed_by: if attempt_number > 1 { resumed_by } else { None },
            payload_changes: std::mem::take(&mut self.payload_history),
        };
        self.execution_attempts.push(attempt);
        &self.execution_attempts[self.execution_attempts.len() - 1]
    }

    /// Mark the run finished with a terminal status
    pub fn finish(&mut self, status: WorkflowStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
        self.close_open_attempt(status, now);
        if matches!(status, WorkflowStatus::Completed | WorkflowStatus::Cancelled) {
            self.completed_at = Some(now);
            self.duration_ms = Some((now - self.created_at).num_milliseconds());
        }
    }

    /// Fold an observed envelope into the record
    pub fn apply_message(&mut self, message: &WorkflowMessage) {
        let now = message.updated_at;
        self.record_step_progress(message, now);

        self.status = message.status;
        self.current_step = message.current_step;
        self.total_steps = message.total_steps;
        self.payload = message.payload.clone();
        if message.security_context.is_some() {
            self.security_context = message.security_context.clone();
        }
        self.retry_info = message.retry_info.clone();
        self.error_info = message.error_info.clone();
        self.updated_at = now;

        match message.status {
            WorkflowStatus::Completed | WorkflowStatus::Failed => {
                self.finish(message.status, now);
            }
            _ => {}
        }
    }

    fn record_step_progress(&mut self, message: &WorkflowMessage, now: DateTime<Utc>) {
        let failure = message
            .error_info
            .as_ref()
            .map(|e| e.message.clone())
            .or_else(|| {
                message
                    .retry_info
                    .as_ref()
                    .and_then(|r| r.last_error.clone())
            });

        if let Some(open) = self
            .step_history
            .iter_mut()
            .rev()
            .find(|s| s.completed_at.is_none())
        {
            let finished = if message.status.is_processable() {
                open.step_id != message.current_step
            } else {
                true
            };
            if finished {
                open.completed_at = Some(now);
                open.status = match message.status {
                    WorkflowStatus::RetryPending
                    | WorkflowStatus::Failed
                    | WorkflowStatus::Cancelled
                    | WorkflowStatus::Paused => message.status,
                    _ => WorkflowStatus::Completed,
                };
                if open.status != WorkflowStatus::Completed {
                    open.error_message = failure;
                }
            }
        }

        let already_open = self
            .step_history
            .iter()
            .any(|s| s.completed_at.is_none() && s.step_id == message.current_step);
        if message.status.is_processable() && !already_open {
            let attempt_number = self.current_attempt_number();
            self.step_history.push(StepExecution {
                step_id: message.current_step,
                status: WorkflowStatus::InProgress,
                attempt_number,
                started_at: now,
                completed_at: None,
                error_message: None,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn started() -> WorkflowExecution {
        let message = WorkflowMessage::new("exec-1", "corr-1", "orders", 3, json!({"qty": 1}));
        WorkflowExecution::from_message(&message)
    }

    fn change(path: &str) -> PayloadChange {
        PayloadChange {
            field_path: path.to_string(),
            old_value: Some(json!(1)),
            new_value: json!(2),
            changed_at: Utc::now(),
            changed_by: "operator".to_string(),
            reason: None,
        }
    }

    #[test]
    fn test_from_message_opens_first_attempt() {
        let execution = started();
        assert_eq!(execution.execution_attempts.len(), 1);
        let attempt = execution.current_attempt().unwrap();
        assert_eq!(attempt.attempt_number, 1);
        assert_eq!(attempt.start_step, 1);
        assert!(attempt.resumed_by.is_none());
        assert_eq!(execution.version, 0);
    }

    #[test]
    fn test_begin_attempt_moves_pending_changes() {
        let mut execution = started();
        execution.status = WorkflowStatus::Failed;
        execution.payload_history.push(change("qty"));
        execution.payload_history.push(change("sku"));

        let attempt = execution.begin_attempt(2, Some("alice".to_string()), Utc::now());
        assert_eq!(attempt.attempt_number, 2);
        assert_eq!(attempt.start_step, 2);
        assert_eq!(attempt.resumed_by.as_deref(), Some("alice"));
        assert_eq!(attempt.payload_changes.len(), 2);

        assert!(execution.payload_history.is_empty());
        assert_eq!(
            execution.execution_attempts.iter().filter(|a| a.is_open()).count(),
            1
        );
        assert_eq!(
            execution.execution_attempts[0].result,
            Some(WorkflowStatus::Failed)
        );
    }

    #[test]
    fn test_apply_message_tracks_steps_and_completion() {
        let mut execution = started();
        let first = WorkflowMessage::new("exec-1", "corr-1", "orders", 2, json!({}))
            .with_status(WorkflowStatus::InProgress);
        execution.apply_message(&first);
        assert_eq!(execution.step_history.len(), 1);

        let second = first.next_step();
        execution.apply_message(&second);
        assert_eq!(execution.step_history.len(), 2);
        assert_eq!(execution.step_history[0].status, WorkflowStatus::Completed);

        execution.apply_message(&second.complete());
        assert_eq!(execution.status, WorkflowStatus::Completed);
        assert!(execution.completed_at.is_some());
        assert!(execution.duration_ms.is_some());
        assert!(execution.current_attempt().is_none());
        assert!(execution.step_history.iter().all(|s| s.completed_at.is_some()));
    }

    #[test]
    fn test_retry_closes_step_with_error() {
        let mut execution = started();
        let msg = WorkflowMessage::new("exec-1", "corr-1", "orders", 3, json!({}));
        execution.apply_message(&msg);

        let retry = msg.retry_pending(RetryInfo::initial(3).next_attempt(Utc::now(), "timeout"));
        execution.apply_message(&retry);

        let step = &execution.step_history[0];
        assert_eq!(step.status, WorkflowStatus::RetryPending);
        assert_eq!(step.error_message.as_deref(), Some("timeout"));
        assert_eq!(execution.status, WorkflowStatus::RetryPending);
        assert!(execution.current_attempt().is_some());
    }
}
