//! # Workflow Registry
//!
//! Maps a topic to its immutable [`WorkflowDefinition`]. Definitions are
//! registered once at process start; lookups are shared reads.
//!
//! ```rust
//! use stepflow_core::models::{StepDefinition, WorkflowDefinition};
//! use stepflow_core::orchestration::registry::WorkflowRegistry;
//! use stepflow_core::orchestration::step_handler::step_fn;
//!
//! let registry = WorkflowRegistry::new();
//! registry
//!     .register(
//!         WorkflowDefinition::builder("orders")
//!             .step(StepDefinition::new(1, "reserve", step_fn(|_| async { Ok(()) })))
//!             .build()
//!             .unwrap(),
//!     )
//!     .unwrap();
//!
//! let step = registry.resolve_step("orders", 1).unwrap();
//! assert_eq!(step.step().label, "reserve");
//! assert!(step.is_last_step());
//! ```

use crate::models::{StepDefinition, WorkflowDefinition, WorkflowSummary};
use crate::orchestration::errors::RegistryError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// A step resolved against its workflow
#[derive(Debug, Clone)]
pub struct ResolvedStep {
    definition: Arc<WorkflowDefinition>,
    step_id: u32,
}

impl ResolvedStep {
    pub fn definition(&self) -> &Arc<WorkflowDefinition> {
        &self.definition
    }

    pub fn step(&self) -> &StepDefinition {
        // Ids are contiguous from 1, checked when the definition was built
        &self.definition.steps()[(self.step_id - 1) as usize]
    }

    pub fn is_last_step(&self) -> bool {
        self.definition.is_last_step(self.step_id)
    }
}

/// Thread-safe topic -> definition map
#[derive(Debug, Default)]
pub struct WorkflowRegistry {
    workflows: RwLock<HashMap<String, Arc<WorkflowDefinition>>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition; topics may only be registered once
    pub fn register(
        &self,
        definition: WorkflowDefinition,
    ) -> Result<Arc<WorkflowDefinition>, RegistryError> {
        let topic = definition.topic().to_string();
        let mut workflows = self.workflows.write();
        if workflows.contains_key(&topic) {
            return Err(RegistryError::duplicate_topic(topic));
        }

        let definition = Arc::new(definition);
        workflows.insert(topic.clone(), Arc::clone(&definition));

        info!(
            topic = %topic,
            steps = definition.total_steps(),
            "Registered workflow"
        );
        Ok(definition)
    }

    pub fn get(&self, topic: &str) -> Option<Arc<WorkflowDefinition>> {
        self.workflows.read().get(topic).cloned()
    }

    /// Like [`Self::get`] but reports unknown topics as an error
    pub fn require(&self, topic: &str) -> Result<Arc<WorkflowDefinition>, RegistryError> {
        self.get(topic)
            .ok_or_else(|| RegistryError::unknown_topic(topic))
    }

    pub fn resolve_step(&self, topic: &str, step_id: u32) -> Result<ResolvedStep, RegistryError> {
        let definition = self.require(topic)?;
        if definition.get_step(step_id).is_none() {
            return Err(RegistryError::unknown_step(topic, step_id));
        }
        Ok(ResolvedStep {
            definition,
            step_id,
        })
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.workflows.read().contains_key(topic)
    }

    /// Registered topics, sorted
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.workflows.read().keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn len(&self) -> usize {
        self.workflows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.read().is_empty()
    }

    /// Serializable description of every workflow, sorted by topic
    pub fn summaries(&self) -> Vec<WorkflowSummary> {
        let mut summaries: Vec<WorkflowSummary> = self
            .workflows
            .read()
            .values()
            .map(|definition| definition.summary())
            .collect();
        summaries.sort_by(|a, b| a.topic.cmp(&b.topic));
        summaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::step_handler::step_fn;

    fn definition(topic: &str, steps: u32) -> WorkflowDefinition {
        let mut builder = WorkflowDefinition::builder(topic);
        for id in 1..=steps {
            builder = builder.step(StepDefinition::new(
                id,
                format!("step-{id}"),
                step_fn(|_| async { Ok(()) }),
            ));
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = WorkflowRegistry::new();
        registry.register(definition("orders", 3)).unwrap();

        assert!(registry.contains("orders"));
        assert_eq!(registry.len(), 1);

        let resolved = registry.resolve_step("orders", 2).unwrap();
        assert_eq!(resolved.step().label, "step-2");
        assert!(!resolved.is_last_step());
        assert!(registry.resolve_step("orders", 3).unwrap().is_last_step());
    }

    #[test]
    fn test_duplicate_topic_rejected() {
        let registry = WorkflowRegistry::new();
        registry.register(definition("orders", 1)).unwrap();
        let err = registry.register(definition("orders", 2)).unwrap_err();
        assert_eq!(err, RegistryError::duplicate_topic("orders"));
        assert_eq!(registry.get("orders").unwrap().total_steps(), 1);
    }

    #[test]
    fn test_unknown_topic_and_step() {
        let registry = WorkflowRegistry::new();
        registry.register(definition("orders", 2)).unwrap();

        assert_eq!(
            registry.resolve_step("payments", 1).unwrap_err(),
            RegistryError::unknown_topic("payments")
        );
        assert_eq!(
            registry.resolve_step("orders", 3).unwrap_err(),
            RegistryError::unknown_step("orders", 3)
        );
        assert_eq!(
            registry.resolve_step("orders", 0).unwrap_err(),
            RegistryError::unknown_step("orders", 0)
        );
    }

    #[test]
    fn test_topics_and_summaries_sorted() {
        let registry = WorkflowRegistry::new();
        registry.register(definition("payments", 1)).unwrap();
        registry.register(definition("orders", 2)).unwrap();

        assert_eq!(registry.topics(), vec!["orders", "payments"]);
        let summaries = registry.summaries();
        assert_eq!(summaries[0].topic, "orders");
        assert_eq!(summaries[0].steps.len(), 2);
        assert_eq!(summaries[1].total_steps, 1);
    }
}
