//! # Workflow Starter
//!
//! Entry point for new executions. Builds the first envelope for a registered
//! topic and sends it to the topic's step channel.

use crate::config::StepflowConfig;
use crate::error::Result;
use crate::events::WorkflowEventPublisher;
use crate::logging::log_workflow_operation;
use crate::messaging::{MessageBroker, MessagingError};
use crate::models::WorkflowMessage;
use crate::orchestration::registry::WorkflowRegistry;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Starts workflow executions
pub struct WorkflowStarter {
    registry: Arc<WorkflowRegistry>,
    broker: Arc<dyn MessageBroker>,
    service_name: Option<String>,
    events: Option<WorkflowEventPublisher>,
}

impl std::fmt::Debug for WorkflowStarter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowStarter")
            .field("broker_type", &self.broker.broker_type())
            .field("service_name", &self.service_name)
            .finish_non_exhaustive()
    }
}

impl WorkflowStarter {
    pub fn new(
        registry: Arc<WorkflowRegistry>,
        broker: Arc<dyn MessageBroker>,
        config: &StepflowConfig,
    ) -> Self {
        Self {
            registry,
            broker,
            service_name: config.service_name.clone(),
            events: None,
        }
    }

    pub fn with_event_publisher(mut self, publisher: WorkflowEventPublisher) -> Self {
        self.events = Some(publisher);
        self
    }

    /// Start an execution and return its id
    pub async fn start(
        &self,
        topic: &str,
        payload: Value,
        payload_type: Option<String>,
        metadata: HashMap<String, Value>,
    ) -> Result<String> {
        let message = self
            .start_and_get_message(topic, payload, payload_type, metadata)
            .await?;
        Ok(message.execution_id)
    }

    /// Start an execution with a typed payload, recording its type name
    pub async fn start_typed<T: Serialize>(
        &self,
        topic: &str,
        payload: &T,
        metadata: HashMap<String, Value>,
    ) -> Result<String> {
        let value = serde_json::to_value(payload).map_err(|e| {
            MessagingError::serialization(format!(
                "Cannot serialize {} payload: {e}",
                std::any::type_name::<T>()
            ))
        })?;
        self.start(
            topic,
            value,
            Some(std::any::type_name::<T>().to_string()),
            metadata,
        )
        .await
    }

    /// Start an execution and return the envelope that was sent
    pub async fn start_and_get_message(
        &self,
        topic: &str,
        payload: Value,
        payload_type: Option<String>,
        metadata: HashMap<String, Value>,
    ) -> Result<WorkflowMessage> {
        let definition = self.registry.require(topic)?;

        let mut message = WorkflowMessage::new(
            Uuid::new_v4().to_string(),
            Uuid::new_v4().to_string(),
            definition.topic(),
            definition.total_steps(),
            payload,
        )
        .with_metadata(metadata);
        message.payload_type = payload_type;
        message.service_name = self.service_name.clone();

        self.broker.send(definition.topic(), &message).await?;
        if let Some(events) = &self.events {
            events.publish_emitted(&message, definition.topic());
        }

        log_workflow_operation(
            "start",
            &message.execution_id,
            Some(definition.topic()),
            message.status.as_str(),
            Some(&format!("{} steps", message.total_steps)),
        );
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::WorkflowStatus;
    use crate::error::StepflowError;
    use crate::messaging::InMemoryMessageBroker;
    use crate::models::{StepDefinition, WorkflowDefinition};
    use crate::orchestration::errors::RegistryError;
    use crate::orchestration::step_handler::step_fn;
    use serde_json::json;

    fn starter(config: &StepflowConfig) -> (WorkflowStarter, InMemoryMessageBroker) {
        let registry = Arc::new(WorkflowRegistry::new());
        registry
            .register(
                WorkflowDefinition::builder("orders")
                    .step(StepDefinition::new(1, "reserve", step_fn(|_| async { Ok(()) })))
                    .step(StepDefinition::new(2, "charge", step_fn(|_| async { Ok(()) })))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let broker = InMemoryMessageBroker::new();
        (
            WorkflowStarter::new(registry, Arc::new(broker.clone()), config),
            broker,
        )
    }

    #[tokio::test]
    async fn test_start_sends_first_envelope() {
        let config = StepflowConfig {
            service_name: Some("checkout".to_string()),
            ..Default::default()
        };
        let (starter, broker) = starter(&config);

        let mut metadata = HashMap::new();
        metadata.insert("tenant".to_string(), json!("acme"));
        let execution_id = starter
            .start("orders", json!({"sku": "A-1"}), None, metadata)
            .await
            .unwrap();

        let sent = broker.take("orders").await;
        assert_eq!(sent.len(), 1);
        let message = &sent[0];
        assert_eq!(message.execution_id, execution_id);
        assert_ne!(message.correlation_id, execution_id);
        assert_eq!(message.status, WorkflowStatus::Pending);
        assert_eq!(message.current_step, 1);
        assert_eq!(message.total_steps, 2);
        assert_eq!(message.service_name.as_deref(), Some("checkout"));
        assert_eq!(message.metadata["tenant"], "acme");
        assert_eq!(message.created_at, message.updated_at);
        assert!(Uuid::parse_str(&execution_id).is_ok());
    }

    #[tokio::test]
    async fn test_start_typed_records_payload_type() {
        #[derive(Serialize)]
        struct Order {
            sku: String,
        }

        let (starter, broker) = starter(&StepflowConfig::default());
        starter
            .start_typed(
                "orders",
                &Order {
                    sku: "B-2".to_string(),
                },
                HashMap::new(),
            )
            .await
            .unwrap();

        let message = broker.pop("orders").await.unwrap();
        assert_eq!(message.payload["sku"], "B-2");
        assert!(message.payload_type.unwrap().ends_with("Order"));
    }

    #[tokio::test]
    async fn test_unknown_topic_is_rejected() {
        let (starter, broker) = starter(&StepflowConfig::default());
        let err = starter
            .start("payments", json!({}), None, HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StepflowError::Registry(RegistryError::UnknownTopic { .. })
        ));
        assert_eq!(broker.send_call_count(), 0);
    }

    #[tokio::test]
    async fn test_broker_failure_is_surfaced() {
        let (starter, broker) = starter(&StepflowConfig::default());
        broker.set_failing(true);
        let err = starter
            .start("orders", json!({}), None, HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StepflowError::Messaging(_)));
    }
}
