//! # Execution Command Service
//!
//! Operator commands against persisted executions:
//!
//! - `resume` re-enters a halted execution (FAILED, PAUSED, RETRY_PENDING)
//!   into the step pipeline as a new execution attempt.
//! - `cancel` marks a non-terminal execution CANCELLED. It is a state flag
//!   only; a step already running elsewhere finishes, and the recorder never
//!   overwrites the CANCELLED record with what it emits.
//! - `update_payload_field` edits a halted execution's payload, keeping the
//!   change as pending provenance that the next `resume` attaches to its
//!   attempt.

use crate::constants::WorkflowStatus;
use crate::events::WorkflowEventPublisher;
use crate::logging::log_workflow_operation;
use crate::messaging::{MessageBroker, MessagingError};
use crate::models::{PayloadChange, WorkflowExecution, WorkflowMessage};
use crate::orchestration::errors::CommandError;
use crate::orchestration::registry::WorkflowRegistry;
use crate::persistence::{ExecutionQuery, ExecutionStore};
use crate::utils::payload_path;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, warn};

pub type CommandResult<T> = Result<T, CommandError>;

pub struct ExecutionCommandService {
    store: Arc<dyn ExecutionStore>,
    registry: Arc<WorkflowRegistry>,
    broker: Arc<dyn MessageBroker>,
    events: Option<WorkflowEventPublisher>,
}

impl std::fmt::Debug for ExecutionCommandService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionCommandService")
            .field("broker_type", &self.broker.broker_type())
            .finish_non_exhaustive()
    }
}

impl ExecutionCommandService {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        registry: Arc<WorkflowRegistry>,
        broker: Arc<dyn MessageBroker>,
    ) -> Self {
        Self {
            store,
            registry,
            broker,
            events: None,
        }
    }

    pub fn with_event_publisher(mut self, publisher: WorkflowEventPublisher) -> Self {
        self.events = Some(publisher);
        self
    }

    pub async fn get_execution(&self, execution_id: &str) -> CommandResult<WorkflowExecution> {
        self.store
            .find_by_id(execution_id)
            .await?
            .ok_or_else(|| CommandError::not_found(execution_id))
    }

    pub async fn find_executions(&self, query: &ExecutionQuery) -> CommandResult<Vec<WorkflowExecution>> {
        Ok(self.store.find(query).await?)
    }

    /// Resume a halted execution from `from_step`, or from its current step
    ///
    /// Opens attempt N+1, persists it, then sends an IN_PROGRESS envelope with
    /// a fresh retry budget to the workflow topic. When the send fails the
    /// halted record is restored, so the resume can simply be repeated.
    pub async fn resume(
        &self,
        execution_id: &str,
        from_step: Option<u32>,
        resumed_by: &str,
    ) -> CommandResult<WorkflowExecution> {
        let mut execution = self.get_execution(execution_id).await?;
        if !execution.status.is_resumable() {
            return Err(CommandError::invalid_state(
                execution_id,
                execution.status,
                "resume",
            ));
        }

        let definition = self.registry.require(&execution.topic)?;
        let total_steps = definition.total_steps();
        let resume_step = from_step.unwrap_or(execution.current_step);
        if resume_step == 0 || resume_step > total_steps {
            return Err(CommandError::invalid_argument(format!(
                "step {resume_step} is outside 1..={total_steps} for workflow '{}'",
                execution.topic
            )));
        }

        let previous_status = execution.status;
        let halted = execution.clone();
        let now = Utc::now();
        execution.begin_attempt(resume_step, Some(resumed_by.to_string()), now);
        let attempt_number = execution.current_attempt_number();

        let message = WorkflowMessage {
            execution_id: execution.execution_id.clone(),
            correlation_id: execution.correlation_id.clone(),
            topic: execution.topic.clone(),
            service_name: execution.service_name.clone(),
            current_step: resume_step,
            total_steps,
            status: WorkflowStatus::InProgress,
            payload: execution.payload.clone(),
            payload_type: execution.payload_type.clone(),
            security_context: execution.security_context.clone(),
            metadata: execution.metadata.clone(),
            retry_info: None,
            error_info: None,
            created_at: execution.created_at,
            updated_at: now,
        };
        execution.apply_message(&message);
        execution.completed_at = None;
        execution.duration_ms = None;

        let saved = self.store.save(execution).await?;

        if let Err(send_error) = self.broker.send(&message.topic, &message).await {
            self.restore_halted(halted, saved.version, &send_error).await;
            return Err(send_error.into());
        }
        if let Some(events) = &self.events {
            events.publish_emitted(&message, &message.topic);
        }

        log_workflow_operation(
            "resume",
            execution_id,
            Some(&saved.topic),
            saved.status.as_str(),
            Some(&format!(
                "attempt {attempt_number} from step {resume_step} (was {previous_status}) by {resumed_by}"
            )),
        );
        Ok(saved)
    }

    /// Put back the record as it was before a resume whose envelope never left
    async fn restore_halted(
        &self,
        mut halted: WorkflowExecution,
        version: u64,
        send_error: &MessagingError,
    ) {
        let execution_id = halted.execution_id.clone();
        halted.version = version;
        match self.store.save(halted).await {
            Ok(restored) => warn!(
                execution_id = %execution_id,
                status = %restored.status,
                error = %send_error,
                "Resume envelope not sent; execution left halted"
            ),
            Err(restore_error) => error!(
                execution_id = %execution_id,
                error = %send_error,
                restore_error = %restore_error,
                "Resume envelope not sent and halted state could not be restored"
            ),
        }
    }

    /// Cancel a non-terminal execution; no message is sent
    pub async fn cancel(&self, execution_id: &str) -> CommandResult<WorkflowExecution> {
        let mut execution = self.get_execution(execution_id).await?;
        if execution.status.is_terminal() {
            return Err(CommandError::invalid_state(
                execution_id,
                execution.status,
                "cancel",
            ));
        }

        let previous_status = execution.status;
        execution.finish(WorkflowStatus::Cancelled, Utc::now());
        let saved = self.store.save(execution).await?;

        log_workflow_operation(
            "cancel",
            execution_id,
            Some(&saved.topic),
            saved.status.as_str(),
            Some(&format!("was {previous_status}")),
        );
        Ok(saved)
    }

    /// Set the payload value at `path` on a halted execution
    ///
    /// Returns the recorded change; it stays pending until the next resume.
    pub async fn update_payload_field(
        &self,
        execution_id: &str,
        path: &str,
        value: Value,
        changed_by: &str,
        reason: Option<String>,
    ) -> CommandResult<PayloadChange> {
        let mut execution = self.get_execution(execution_id).await?;
        if !execution.status.is_resumable() {
            return Err(CommandError::invalid_state(
                execution_id,
                execution.status,
                "update payload of",
            ));
        }

        let old_value = payload_path::set(&mut execution.payload, path, value.clone())
            .map_err(|e| CommandError::invalid_argument(e.to_string()))?;

        let now = Utc::now();
        let change = PayloadChange {
            field_path: path.to_string(),
            old_value,
            new_value: value,
            changed_at: now,
            changed_by: changed_by.to_string(),
            reason,
        };
        execution.payload_history.push(change.clone());
        execution.updated_at = now;

        let saved = self.store.save(execution).await?;
        log_workflow_operation(
            "update_payload",
            execution_id,
            Some(&saved.topic),
            saved.status.as_str(),
            Some(&format!("{path} by {changed_by}")),
        );
        Ok(change)
    }
}
