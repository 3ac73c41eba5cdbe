//! In-memory [`ExecutionStore`] backed by a concurrent map.

use crate::constants::WorkflowStatus;
use crate::models::WorkflowExecution;
use crate::persistence::{ExecutionQuery, ExecutionStore, PersistenceError, PersistenceResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct InMemoryExecutionStore {
    executions: Arc<DashMap<String, WorkflowExecution>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }

    /// Clear all records (for testing)
    pub fn clear(&self) {
        self.executions.clear();
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn find_by_id(&self, execution_id: &str) -> PersistenceResult<Option<WorkflowExecution>> {
        Ok(self
            .executions
            .get(execution_id)
            .map(|entry| entry.value().clone()))
    }

    async fn save(&self, mut execution: WorkflowExecution) -> PersistenceResult<WorkflowExecution> {
        let execution_id = execution.execution_id.clone();
        match self.executions.entry(execution_id.clone()) {
            Entry::Occupied(mut occupied) => {
                let stored = occupied.get().version;
                if stored != execution.version {
                    return Err(PersistenceError::version_conflict(
                        execution_id,
                        execution.version,
                        stored,
                    ));
                }
                execution.version = stored + 1;
                occupied.insert(execution.clone());
            }
            Entry::Vacant(vacant) => {
                if execution.version != 0 {
                    return Err(PersistenceError::version_conflict(
                        execution_id,
                        execution.version,
                        0,
                    ));
                }
                execution.version = 1;
                vacant.insert(execution.clone());
            }
        }

        debug!(
            execution_id = %execution.execution_id,
            status = %execution.status,
            version = execution.version,
            "Execution saved"
        );
        Ok(execution)
    }

    async fn find(&self, query: &ExecutionQuery) -> PersistenceResult<Vec<WorkflowExecution>> {
        let mut matches: Vec<WorkflowExecution> = self
            .executions
            .iter()
            .filter(|entry| query.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = query.limit {
            matches.truncate(limit);
        }
        Ok(matches)
    }

    async fn find_due_retries(&self, now: DateTime<Utc>) -> PersistenceResult<Vec<WorkflowExecution>> {
        let mut due: Vec<WorkflowExecution> = self
            .executions
            .iter()
            .filter(|entry| {
                let execution = entry.value();
                execution.status == WorkflowStatus::RetryPending
                    && execution
                        .retry_info
                        .as_ref()
                        .is_some_and(|retry| retry.is_due(now))
            })
            .map(|entry| entry.value().clone())
            .collect();
        due.sort_by_key(|execution| {
            execution
                .retry_info
                .as_ref()
                .and_then(|retry| retry.next_retry_at)
        });
        Ok(due)
    }
}
