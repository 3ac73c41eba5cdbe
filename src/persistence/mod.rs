//! # Execution Persistence
//!
//! Storage contract for [`WorkflowExecution`] records, an in-memory store and
//! the recorder that keeps records in sync with the envelopes flowing through
//! the event publisher.

pub mod in_memory;
pub mod recorder;

pub use in_memory::InMemoryExecutionStore;
pub use recorder::ExecutionRecorder;

use crate::constants::WorkflowStatus;
use crate::models::WorkflowExecution;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Persistence errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PersistenceError {
    /// The stored record changed since it was loaded
    #[error("Version conflict for execution {execution_id}: expected {expected}, found {actual}")]
    VersionConflict {
        execution_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Execution not found: {execution_id}")]
    NotFound { execution_id: String },

    #[error("Storage error: {message}")]
    Storage { message: String },
}

impl PersistenceError {
    pub fn version_conflict(execution_id: impl Into<String>, expected: u64, actual: u64) -> Self {
        Self::VersionConflict {
            execution_id: execution_id.into(),
            expected,
            actual,
        }
    }

    pub fn not_found(execution_id: impl Into<String>) -> Self {
        Self::NotFound {
            execution_id: execution_id.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Filter for [`ExecutionStore::find`]; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionQuery {
    pub topic: Option<String>,
    /// Empty matches every status
    pub statuses: Vec<WorkflowStatus>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl ExecutionQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn status(mut self, status: WorkflowStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn created_after(mut self, at: DateTime<Utc>) -> Self {
        self.created_after = Some(at);
        self
    }

    pub fn created_before(mut self, at: DateTime<Utc>) -> Self {
        self.created_before = Some(at);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a record satisfies every filter except `limit`
    pub fn matches(&self, execution: &WorkflowExecution) -> bool {
        if self
            .topic
            .as_deref()
            .is_some_and(|topic| topic != execution.topic)
        {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&execution.status) {
            return false;
        }
        if self
            .created_after
            .is_some_and(|after| execution.created_at < after)
        {
            return false;
        }
        if self
            .created_before
            .is_some_and(|before| execution.created_at >= before)
        {
            return false;
        }
        true
    }
}

/// Key-value store for execution records with optimistic concurrency
///
/// `save` accepts a record only if its `version` equals the stored version
/// (0 for a record that does not exist yet) and returns the stored copy with
/// the version incremented.
#[async_trait]
pub trait ExecutionStore: Send + Sync + 'static {
    async fn find_by_id(&self, execution_id: &str) -> PersistenceResult<Option<WorkflowExecution>>;

    async fn save(&self, execution: WorkflowExecution) -> PersistenceResult<WorkflowExecution>;

    /// Records matching the query, newest first
    async fn find(&self, query: &ExecutionQuery) -> PersistenceResult<Vec<WorkflowExecution>>;

    /// RETRY_PENDING records whose `next_retry_at` has been reached
    async fn find_due_retries(&self, now: DateTime<Utc>) -> PersistenceResult<Vec<WorkflowExecution>>;
}
