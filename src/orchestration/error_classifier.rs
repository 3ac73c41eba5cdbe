//! # Step Failure Classification
//!
//! Decides whether a failed step is retried or dead-lettered. A failure is
//! non-retryable when its root cause's error class, or the outer class, is on
//! the configured denylist. Everything else, timeouts included, is retryable
//! until the retry budget runs out.

use crate::config::RetrySettings;
use crate::constants::error_classes;
use crate::models::RetryInfo;
use crate::orchestration::step_handler::StepFailure;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Primary failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Will never succeed if retried
    Permanent,

    /// Step exceeded its time budget
    Timeout,

    /// May succeed on retry
    Transient,
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCategory::Permanent => write!(f, "Permanent"),
            FailureCategory::Timeout => write!(f, "Timeout"),
            FailureCategory::Transient => write!(f, "Transient"),
        }
    }
}

/// Result of classifying one failure against the retry budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureClassification {
    pub category: FailureCategory,

    /// Error class of the root cause
    pub error_class: String,

    /// Whether the error class allows a retry at all
    pub is_retryable: bool,

    /// No retry budget left
    pub is_exhausted: bool,
}

impl FailureClassification {
    /// Retryable and budget left
    pub fn should_retry(&self) -> bool {
        self.is_retryable && !self.is_exhausted
    }
}

/// Denylist based classifier
#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    non_retryable: HashSet<String>,
}

impl ErrorClassifier {
    pub fn new<I, S>(non_retryable: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            non_retryable: non_retryable.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(settings.non_retryable_errors.iter().cloned())
    }

    pub fn is_retryable(&self, failure: &StepFailure) -> bool {
        !(self.non_retryable.contains(&failure.root_cause().error_class)
            || self.non_retryable.contains(&failure.error_class))
    }

    pub fn classify(&self, failure: &StepFailure, retry_info: &RetryInfo) -> FailureClassification {
        let root = failure.root_cause();
        let is_retryable = self.is_retryable(failure);
        let category = if !is_retryable {
            FailureCategory::Permanent
        } else if root.error_class == error_classes::STEP_TIMEOUT {
            FailureCategory::Timeout
        } else {
            FailureCategory::Transient
        };

        FailureClassification {
            category,
            error_class: root.error_class.clone(),
            is_retryable,
            is_exhausted: retry_info.is_exhausted(),
        }
    }
}
