//! # Workflow Definitions
//!
//! Immutable description of a workflow: its topic, ordered steps and lifecycle
//! callbacks. Definitions are assembled with [`WorkflowDefinition::builder`]
//! at process start and never change once registered.
//!
//! ```rust
//! use stepflow_core::models::{StepDefinition, WorkflowDefinition};
//! use stepflow_core::orchestration::step_handler::step_fn;
//! use std::time::Duration;
//!
//! let definition = WorkflowDefinition::builder("orders")
//!     .description("Order fulfillment")
//!     .step(StepDefinition::new(1, "reserve", step_fn(|_| async { Ok(()) })))
//!     .step(
//!         StepDefinition::new(2, "notify", step_fn(|_| async { Ok(()) }))
//!             .continue_on_failure(true)
//!             .timeout(Duration::from_secs(5)),
//!     )
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(definition.total_steps(), 2);
//! assert!(definition.is_last_step(2));
//! ```

use crate::orchestration::callbacks::Callback;
use crate::orchestration::errors::RegistryError;
use crate::orchestration::step_handler::StepHandler;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// One step of a workflow
#[derive(Clone)]
pub struct StepDefinition {
    pub id: u32,
    pub label: String,
    pub description: Option<String>,
    pub skippable: bool,
    /// Failures advance the workflow instead of retrying or dead-lettering
    pub continue_on_failure: bool,
    pub timeout: Option<Duration>,
    handler: Arc<dyn StepHandler>,
}

impl StepDefinition {
    pub fn new(id: u32, label: impl Into<String>, handler: Arc<dyn StepHandler>) -> Self {
        Self {
            id,
            label: label.into(),
            description: None,
            skippable: false,
            continue_on_failure: false,
            timeout: None,
            handler,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn skippable(mut self, skippable: bool) -> Self {
        self.skippable = skippable;
        self
    }

    pub fn continue_on_failure(mut self, continue_on_failure: bool) -> Self {
        self.continue_on_failure = continue_on_failure;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn handler(&self) -> &Arc<dyn StepHandler> {
        &self.handler
    }

    pub fn summary(&self) -> StepSummary {
        StepSummary {
            id: self.id,
            label: self.label.clone(),
            description: self.description.clone(),
            skippable: self.skippable,
            continue_on_failure: self.continue_on_failure,
            timeout_ms: self.timeout.map(|t| t.as_millis() as u64),
        }
    }
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("skippable", &self.skippable)
            .field("continue_on_failure", &self.continue_on_failure)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// A registered workflow
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    topic: String,
    description: Option<String>,
    /// Sorted by id, ids are exactly 1..=n
    steps: Vec<StepDefinition>,
    on_success: Option<Callback>,
    on_failure: Option<Callback>,
    timeout: Option<Duration>,
    partitions: u32,
    replication: u16,
}

impl WorkflowDefinition {
    pub fn builder(topic: impl Into<String>) -> WorkflowDefinitionBuilder {
        WorkflowDefinitionBuilder::new(topic)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    pub fn get_step(&self, step_id: u32) -> Option<&StepDefinition> {
        let index = usize::try_from(step_id.checked_sub(1)?).ok()?;
        self.steps.get(index).filter(|step| step.id == step_id)
    }

    pub fn total_steps(&self) -> u32 {
        self.steps.len() as u32
    }

    /// Highest step id
    pub fn last_step_id(&self) -> u32 {
        self.steps.last().map(|step| step.id).unwrap_or(0)
    }

    pub fn is_last_step(&self, step_id: u32) -> bool {
        step_id == self.last_step_id()
    }

    pub fn on_success(&self) -> Option<&Callback> {
        self.on_success.as_ref()
    }

    pub fn on_failure(&self) -> Option<&Callback> {
        self.on_failure.as_ref()
    }

    /// Workflow-level timeout hint
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    pub fn replication(&self) -> u16 {
        self.replication
    }

    pub fn summary(&self) -> WorkflowSummary {
        WorkflowSummary {
            topic: self.topic.clone(),
            description: self.description.clone(),
            total_steps: self.total_steps(),
            partitions: self.partitions,
            replication: self.replication,
            timeout_ms: self.timeout.map(|t| t.as_millis() as u64),
            has_success_callback: self.on_success.is_some(),
            has_failure_callback: self.on_failure.is_some(),
            steps: self.steps.iter().map(StepDefinition::summary).collect(),
        }
    }
}

/// Builder validating step ids before producing a definition
#[derive(Debug)]
pub struct WorkflowDefinitionBuilder {
    topic: String,
    description: Option<String>,
    steps: Vec<StepDefinition>,
    on_success: Option<Callback>,
    on_failure: Option<Callback>,
    timeout: Option<Duration>,
    partitions: u32,
    replication: u16,
}

impl WorkflowDefinitionBuilder {
    fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            description: None,
            steps: Vec::new(),
            on_success: None,
            on_failure: None,
            timeout: None,
            partitions: 1,
            replication: 1,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    pub fn on_success(mut self, callback: Callback) -> Self {
        self.on_success = Some(callback);
        self
    }

    pub fn on_failure(mut self, callback: Callback) -> Self {
        self.on_failure = Some(callback);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn partitions(mut self, partitions: u32) -> Self {
        self.partitions = partitions;
        self
    }

    pub fn replication(mut self, replication: u16) -> Self {
        self.replication = replication;
        self
    }

    /// Validate and freeze the definition
    ///
    /// Steps may be added in any order but their ids must be unique and form
    /// the contiguous range `1..=n`.
    pub fn build(mut self) -> Result<WorkflowDefinition, RegistryError> {
        let topic = self.topic.trim().to_string();
        if topic.is_empty() {
            return Err(RegistryError::invalid_definition(
                self.topic,
                "topic must not be empty",
            ));
        }
        if self.steps.is_empty() {
            return Err(RegistryError::invalid_definition(
                topic,
                "at least one step is required",
            ));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.id == 0 {
                return Err(RegistryError::invalid_definition(
                    topic,
                    format!("step '{}' has id 0; ids start at 1", step.label),
                ));
            }
            if !seen.insert(step.id) {
                return Err(RegistryError::invalid_definition(
                    topic,
                    format!("duplicate step id {}", step.id),
                ));
            }
        }

        self.steps.sort_by_key(|step| step.id);
        for (index, step) in self.steps.iter().enumerate() {
            let expected = index as u32 + 1;
            if step.id != expected {
                return Err(RegistryError::invalid_definition(
                    topic,
                    format!("step ids must be contiguous; missing step {expected}"),
                ));
            }
        }

        if self.partitions == 0 || self.replication == 0 {
            return Err(RegistryError::invalid_definition(
                topic,
                "partitions and replication must be at least 1",
            ));
        }

        Ok(WorkflowDefinition {
            topic,
            description: self.description,
            steps: self.steps,
            on_success: self.on_success,
            on_failure: self.on_failure,
            timeout: self.timeout,
            partitions: self.partitions,
            replication: self.replication,
        })
    }
}

/// Serializable description of a registered workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSummary {
    pub topic: String,
    pub description: Option<String>,
    pub total_steps: u32,
    pub partitions: u32,
    pub replication: u16,
    pub timeout_ms: Option<u64>,
    pub has_success_callback: bool,
    pub has_failure_callback: bool,
    pub steps: Vec<StepSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSummary {
    pub id: u32,
    pub label: String,
    pub description: Option<String>,
    pub skippable: bool,
    pub continue_on_failure: bool,
    pub timeout_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::step_handler::step_fn;

    fn noop_step(id: u32, label: &str) -> StepDefinition {
        StepDefinition::new(id, label, step_fn(|_| async { Ok(()) }))
    }

    #[test]
    fn test_steps_are_sorted_and_resolvable() {
        let definition = WorkflowDefinition::builder("orders")
            .step(noop_step(3, "ship"))
            .step(noop_step(1, "reserve"))
            .step(noop_step(2, "charge"))
            .build()
            .unwrap();

        assert_eq!(definition.total_steps(), 3);
        assert_eq!(definition.get_step(2).map(|s| s.label.as_str()), Some("charge"));
        assert!(definition.get_step(0).is_none());
        assert!(definition.get_step(4).is_none());
        assert!(definition.is_last_step(3));
        assert!(!definition.is_last_step(2));
    }

    #[test]
    fn test_invalid_step_ids_are_rejected() {
        let zero = WorkflowDefinition::builder("orders")
            .step(noop_step(0, "bad"))
            .build();
        assert!(matches!(zero, Err(RegistryError::InvalidDefinition { .. })));

        let duplicate = WorkflowDefinition::builder("orders")
            .step(noop_step(1, "a"))
            .step(noop_step(1, "b"))
            .build();
        assert!(matches!(duplicate, Err(RegistryError::InvalidDefinition { .. })));

        let gap = WorkflowDefinition::builder("orders")
            .step(noop_step(1, "a"))
            .step(noop_step(3, "c"))
            .build();
        assert!(matches!(gap, Err(RegistryError::InvalidDefinition { .. })));

        let empty = WorkflowDefinition::builder("orders").build();
        assert!(matches!(empty, Err(RegistryError::InvalidDefinition { .. })));

        let blank_topic = WorkflowDefinition::builder("  ")
            .step(noop_step(1, "a"))
            .build();
        assert!(matches!(blank_topic, Err(RegistryError::InvalidDefinition { .. })));
    }

    #[test]
    fn test_summary() {
        let definition = WorkflowDefinition::builder("orders")
            .description("Order fulfillment")
            .partitions(6)
            .replication(3)
            .timeout(Duration::from_secs(600))
            .on_success(Callback::no_args(|| Ok(())))
            .step(noop_step(1, "reserve").timeout(Duration::from_millis(250)))
            .step(noop_step(2, "notify").continue_on_failure(true))
            .build()
            .unwrap();

        let summary = definition.summary();
        assert_eq!(summary.total_steps, 2);
        assert_eq!(summary.partitions, 6);
        assert_eq!(summary.timeout_ms, Some(600_000));
        assert!(summary.has_success_callback);
        assert!(!summary.has_failure_callback);
        assert_eq!(summary.steps[0].timeout_ms, Some(250));
        assert!(summary.steps[1].continue_on_failure);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["totalSteps"], 2);
    }
}
