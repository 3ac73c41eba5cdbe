//! # Execution Recorder
//!
//! Observer that folds every published envelope into its persisted
//! [`WorkflowExecution`]. The step executor itself never touches storage;
//! this is the only writer during normal progression.
//!
//! Envelopes are applied at most once: a message whose `updated_at` is not
//! newer than the record's is a redelivery or arrived out of order and is
//! ignored. A CANCELLED record is never overwritten by in-flight envelopes.

use crate::constants::WorkflowStatus;
use crate::events::WorkflowMessageEvent;
use crate::models::{WorkflowExecution, WorkflowMessage};
use crate::persistence::{ExecutionStore, PersistenceError, PersistenceResult};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Attempts made when a concurrent writer bumps the version under us
const MAX_CONFLICT_RETRIES: u32 = 3;

#[derive(Clone)]
pub struct ExecutionRecorder {
    store: Arc<dyn ExecutionStore>,
}

impl std::fmt::Debug for ExecutionRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionRecorder").finish_non_exhaustive()
    }
}

impl ExecutionRecorder {
    pub fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self { store }
    }

    /// Upsert the execution record for an envelope
    pub async fn record(&self, message: &WorkflowMessage) -> PersistenceResult<WorkflowExecution> {
        let mut attempt = 1;
        loop {
            let updated = match self.store.find_by_id(&message.execution_id).await? {
                None => {
                    let mut execution = WorkflowExecution::from_message(message);
                    execution.apply_message(message);
                    execution
                }
                Some(existing) if existing.status == WorkflowStatus::Cancelled => {
                    debug!(
                        execution_id = %message.execution_id,
                        status = %message.status,
                        "Ignoring envelope for cancelled execution"
                    );
                    return Ok(existing);
                }
                Some(existing) if message.updated_at <= existing.updated_at => {
                    debug!(
                        execution_id = %message.execution_id,
                        step = message.current_step,
                        "Ignoring stale or duplicate envelope"
                    );
                    return Ok(existing);
                }
                Some(mut existing) => {
                    existing.apply_message(message);
                    existing
                }
            };

            match self.store.save(updated).await {
                Ok(saved) => return Ok(saved),
                Err(PersistenceError::VersionConflict { .. }) if attempt < MAX_CONFLICT_RETRIES => {
                    debug!(
                        execution_id = %message.execution_id,
                        attempt = attempt,
                        "Version conflict while recording envelope, reloading"
                    );
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    pub async fn handle_event(&self, event: &WorkflowMessageEvent) -> PersistenceResult<WorkflowExecution> {
        self.record(&event.message).await
    }

    /// Consume events until the publisher is dropped
    pub async fn run(self, mut receiver: broadcast::Receiver<WorkflowMessageEvent>) {
        info!("Execution recorder started");
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if let Err(error) = self.handle_event(&event).await {
                        warn!(
                            execution_id = %event.message.execution_id,
                            error = %error,
                            "Failed to record workflow event"
                        );
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Execution recorder lagged behind publisher");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        info!("Execution recorder stopped");
    }

    /// Spawn [`Self::run`] on the current runtime
    pub fn spawn(self, receiver: broadcast::Receiver<WorkflowMessageEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(receiver))
    }
}
