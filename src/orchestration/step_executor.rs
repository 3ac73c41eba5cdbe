//! # Step Executor
//!
//! The orchestration state machine. Given an inbound envelope it runs the
//! current step and decides the transition:
//!
//! ```text
//!                ┌── success, more steps ──────────▶ <topic>            (IN_PROGRESS, step+1)
//!                ├── success, last step ───────────▶ <topic>.completed  (COMPLETED)
//! PENDING /      ├── failure, continue_on_failure ─▶ same as success
//! IN_PROGRESS ───┼── failure, retryable, budget ───▶ <topic>.retry      (RETRY_PENDING)
//!                └── failure, otherwise ───────────▶ <topic><dlq>       (FAILED)
//! ```
//!
//! Any other status is informational and ignored. Unknown topics or step ids
//! are dropped: there is no definition to retry against.
//!
//! The executor holds no durable state. Broker failures are returned to the
//! caller so the inbound message stays unacknowledged and is redelivered.

use crate::config::{DlqSettings, StepflowConfig, TimeoutSettings};
use crate::constants::{destinations, error_codes, WorkflowStatus};
use crate::events::WorkflowEventPublisher;
use crate::logging::{log_error, log_step_operation};
use crate::messaging::{MessageBroker, MessagingError};
use crate::models::{ErrorInfo, RetryInfo, StepDefinition, WorkflowMessage};
use crate::orchestration::backoff::RetryPolicy;
use crate::orchestration::error_classifier::{ErrorClassifier, FailureClassification};
use crate::orchestration::registry::{ResolvedStep, WorkflowRegistry};
use crate::orchestration::step_handler::StepFailure;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Outcome of processing one envelope
#[derive(Debug, Clone, PartialEq)]
pub enum StepTransition {
    /// Step succeeded; the next step's envelope was sent to the topic
    Advanced { next_step: u32 },

    /// Step failed but is marked `continue_on_failure`; the workflow moved on
    ContinuedAfterFailure { next_step: u32 },

    /// Last step finished; the completion envelope was sent
    Completed,

    /// Retry envelope sent to the retry channel
    RetryScheduled {
        attempt: u32,
        next_retry_at: DateTime<Utc>,
    },

    /// Terminal failure; `dlq_emitted` is false when dead-lettering is disabled
    DeadLettered { dlq_emitted: bool },

    /// No definition for the topic or step
    Dropped { reason: String },

    /// Status is not processable
    Ignored { status: WorkflowStatus },
}

impl StepTransition {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepTransition::Advanced { .. } => "advanced",
            StepTransition::ContinuedAfterFailure { .. } => "continued_after_failure",
            StepTransition::Completed => "completed",
            StepTransition::RetryScheduled { .. } => "retry_scheduled",
            StepTransition::DeadLettered { .. } => "dead_lettered",
            StepTransition::Dropped { .. } => "dropped",
            StepTransition::Ignored { .. } => "ignored",
        }
    }
}

impl std::fmt::Display for StepTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Executes workflow steps and routes the resulting envelopes
pub struct StepExecutor {
    registry: Arc<WorkflowRegistry>,
    broker: Arc<dyn MessageBroker>,
    retry_policy: RetryPolicy,
    classifier: ErrorClassifier,
    dlq: DlqSettings,
    timeouts: TimeoutSettings,
    events: Option<WorkflowEventPublisher>,
}

impl std::fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepExecutor")
            .field("broker_type", &self.broker.broker_type())
            .field("retry_policy", &self.retry_policy)
            .field("dlq", &self.dlq)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl StepExecutor {
    pub fn new(
        registry: Arc<WorkflowRegistry>,
        broker: Arc<dyn MessageBroker>,
        config: &StepflowConfig,
    ) -> Self {
        Self {
            registry,
            broker,
            retry_policy: RetryPolicy::from_settings(&config.retry),
            classifier: ErrorClassifier::from_settings(&config.retry),
            dlq: config.dlq.clone(),
            timeouts: config.timeout.clone(),
            events: None,
        }
    }

    /// Publish every emitted envelope to `publisher`
    pub fn with_event_publisher(mut self, publisher: WorkflowEventPublisher) -> Self {
        self.events = Some(publisher);
        self
    }

    pub fn registry(&self) -> &Arc<WorkflowRegistry> {
        &self.registry
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Process one inbound envelope
    pub async fn execute(&self, message: &WorkflowMessage) -> Result<StepTransition, MessagingError> {
        if !message.status.is_processable() {
            debug!(
                execution_id = %message.execution_id,
                topic = %message.topic,
                status = %message.status,
                "Ignoring envelope with non-processable status"
            );
            return Ok(StepTransition::Ignored {
                status: message.status,
            });
        }

        let resolved = match self.registry.resolve_step(&message.topic, message.current_step) {
            Ok(resolved) => resolved,
            Err(error) => {
                log_error(
                    "step_executor",
                    "resolve_step",
                    &error.to_string(),
                    Some(&message.execution_id),
                );
                return Ok(StepTransition::Dropped {
                    reason: error.to_string(),
                });
            }
        };

        let step = resolved.step();
        log_step_operation(
            "execute",
            &message.execution_id,
            &message.topic,
            step.id,
            Some(&step.label),
            WorkflowStatus::InProgress.as_str(),
            Some(&format!("step {}/{}", step.id, message.total_steps)),
        );

        let started = Instant::now();
        match self.invoke(step, message).await {
            Ok(()) => {
                debug!(
                    execution_id = %message.execution_id,
                    step = step.id,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Step succeeded"
                );
                self.on_success(&resolved, message).await
            }
            Err(failure) => self.on_failure(&resolved, message, failure).await,
        }
    }

    fn step_timeout(&self, step: &StepDefinition) -> Option<Duration> {
        step.timeout.or_else(|| {
            self.timeouts
                .enabled
                .then(|| self.timeouts.default_step_timeout())
        })
    }

    /// Run the step handler under its timeout, turning panics into failures
    async fn invoke(&self, step: &StepDefinition, message: &WorkflowMessage) -> Result<(), StepFailure> {
        let invocation = AssertUnwindSafe(step.handler().execute(&message.payload)).catch_unwind();

        let outcome = match self.step_timeout(step) {
            Some(limit) => match tokio::time::timeout(limit, invocation).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(StepFailure::timeout(&step.label, step.id, limit)),
            },
            None => invocation.await,
        };

        outcome.unwrap_or_else(|panic| {
            Err(StepFailure::execution(format!(
                "Step '{}' panicked: {}",
                step.label,
                panic_message(panic.as_ref())
            )))
        })
    }

    async fn on_success(
        &self,
        resolved: &ResolvedStep,
        message: &WorkflowMessage,
    ) -> Result<StepTransition, MessagingError> {
        if resolved.is_last_step() {
            return self.complete(resolved, message).await;
        }

        let next = self.advance(resolved, message);
        self.emit(&message.topic, &next).await?;
        log_step_operation(
            "advance",
            &next.execution_id,
            &next.topic,
            next.current_step,
            None,
            next.status.as_str(),
            None,
        );
        Ok(StepTransition::Advanced {
            next_step: next.current_step,
        })
    }

    /// Envelope for the following step, with the registered step count
    fn advance(&self, resolved: &ResolvedStep, message: &WorkflowMessage) -> WorkflowMessage {
        let mut next = message.next_step();
        let registered = resolved.definition().total_steps();
        if next.total_steps != registered {
            warn!(
                execution_id = %message.execution_id,
                topic = %message.topic,
                envelope_total_steps = message.total_steps,
                registered_total_steps = registered,
                "Envelope step count differs from the registered workflow"
            );
            next.total_steps = registered;
        }
        next
    }

    async fn complete(
        &self,
        resolved: &ResolvedStep,
        message: &WorkflowMessage,
    ) -> Result<StepTransition, MessagingError> {
        let completed = message.complete();

        if let Some(callback) = resolved.definition().on_success() {
            callback.invoke_logged("on_success", &completed, None);
        }

        self.emit(&destinations::completed(&message.topic), &completed)
            .await?;
        log_step_operation(
            "complete",
            &completed.execution_id,
            &completed.topic,
            completed.current_step,
            Some(&resolved.step().label),
            completed.status.as_str(),
            None,
        );
        Ok(StepTransition::Completed)
    }

    async fn on_failure(
        &self,
        resolved: &ResolvedStep,
        message: &WorkflowMessage,
        failure: StepFailure,
    ) -> Result<StepTransition, MessagingError> {
        let step = resolved.step();
        let root = failure.root_cause();

        warn!(
            execution_id = %message.execution_id,
            topic = %message.topic,
            step = step.id,
            step_label = %step.label,
            error_class = %root.error_class,
            error = %root.message,
            "Step failed"
        );

        if step.continue_on_failure {
            warn!(
                execution_id = %message.execution_id,
                step = step.id,
                error = %root,
                "Continuing despite failure (continue_on_failure)"
            );
            // The last step completes normally despite the failure; see the
            // continue_on_failure decision in DESIGN.md
            if resolved.is_last_step() {
                return self.complete(resolved, message).await;
            }
            let next = self.advance(resolved, message);
            self.emit(&message.topic, &next).await?;
            return Ok(StepTransition::ContinuedAfterFailure {
                next_step: next.current_step,
            });
        }

        let retry_info = message
            .retry_info
            .clone()
            .unwrap_or_else(|| RetryInfo::initial(self.retry_policy.max_attempts));
        let classification = self.classifier.classify(&failure, &retry_info);

        if classification.should_retry() {
            return self.schedule_retry(message, &retry_info, root).await;
        }
        self.dead_letter(resolved, message, &failure, &classification)
            .await
    }

    async fn schedule_retry(
        &self,
        message: &WorkflowMessage,
        retry_info: &RetryInfo,
        root: &StepFailure,
    ) -> Result<StepTransition, MessagingError> {
        let next_retry_at = self.retry_policy.next_retry_at(retry_info.attempt, Utc::now());
        let next_info = retry_info.next_attempt(next_retry_at, root.message.clone());
        let attempt = next_info.attempt;
        let retry = message.retry_pending(next_info);

        self.emit(&destinations::retry(&message.topic), &retry).await?;
        log_step_operation(
            "schedule_retry",
            &retry.execution_id,
            &retry.topic,
            retry.current_step,
            None,
            retry.status.as_str(),
            Some(&format!(
                "attempt {attempt}/{} at {}",
                retry_info.max_attempts,
                next_retry_at.to_rfc3339()
            )),
        );
        Ok(StepTransition::RetryScheduled {
            attempt,
            next_retry_at,
        })
    }

    async fn dead_letter(
        &self,
        resolved: &ResolvedStep,
        message: &WorkflowMessage,
        failure: &StepFailure,
        classification: &FailureClassification,
    ) -> Result<StepTransition, MessagingError> {
        let step = resolved.step();
        let root = failure.root_cause();
        let error_info = ErrorInfo {
            code: failure
                .code
                .clone()
                .or_else(|| root.code.clone())
                .unwrap_or_else(|| error_codes::STEP_EXECUTION_FAILED.to_string()),
            message: root.message.clone(),
            error_class: root.error_class.clone(),
            stack_trace: failure.trace(),
            step_id: step.id,
            step_label: step.label.clone(),
        };
        let failed = message.dead_lettered(error_info);

        let dlq_emitted = if self.dlq.enabled {
            let destination = destinations::dead_letter(&message.topic, &self.dlq.suffix);
            self.emit(&destination, &failed).await?;
            true
        } else {
            if let Some(events) = &self.events {
                events.publish_transitioned(&failed);
            }
            false
        };

        log_step_operation(
            "dead_letter",
            &failed.execution_id,
            &failed.topic,
            step.id,
            Some(&step.label),
            failed.status.as_str(),
            Some(&format!(
                "{} ({}, exhausted: {})",
                root.message, classification.category, classification.is_exhausted
            )),
        );

        if let Some(callback) = resolved.definition().on_failure() {
            callback.invoke_logged("on_failure", &failed, Some(root));
        }

        Ok(StepTransition::DeadLettered { dlq_emitted })
    }

    async fn emit(&self, destination: &str, message: &WorkflowMessage) -> Result<(), MessagingError> {
        if let Err(error) = self.broker.send(destination, message).await {
            log_error(
                "step_executor",
                "send",
                &error.to_string(),
                Some(destination),
            );
            return Err(error);
        }
        if let Some(events) = &self.events {
            events.publish_emitted(message, destination);
        }
        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
