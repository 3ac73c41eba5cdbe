//! Shared fixtures for integration tests: an in-process "deployment" wiring
//! registry, broker, executor, listener, starter, recorder and command service
//! together, plus scripted step handlers.

#![allow(dead_code)]

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use stepflow_core::config::StepflowConfig;
use stepflow_core::constants::destinations;
use stepflow_core::events::{WorkflowEventPublisher, WorkflowMessageEvent};
use stepflow_core::messaging::{InMemoryMessageBroker, MessageBroker};
use stepflow_core::models::{WorkflowDefinition, WorkflowExecution, WorkflowMessage};
use stepflow_core::orchestration::{
    step_fn, Acknowledgment, ExecutionCommandService, StepExecutor, StepFailure, StepHandler,
    WorkflowMessageListener, WorkflowRegistry, WorkflowStarter,
};
use stepflow_core::persistence::{ExecutionRecorder, ExecutionStore, InMemoryExecutionStore};
use tokio::sync::broadcast;

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("stepflow_core=debug")
        .with_test_writer()
        .try_init();
}

/// Step that always succeeds
pub fn ok_step() -> Arc<dyn StepHandler> {
    step_fn(|_| async { Ok(()) })
}

/// Step that fails with `failure` on every call, counting invocations
pub fn failing_step(failure: StepFailure, calls: Arc<AtomicU32>) -> Arc<dyn StepHandler> {
    step_fn(move |_| {
        let failure = failure.clone();
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(failure)
        }
    })
}

/// Step that fails the first `failures` calls and succeeds afterwards
pub fn flaky_step(failures: u32, calls: Arc<AtomicU32>) -> Arc<dyn StepHandler> {
    step_fn(move |_| {
        let calls = Arc::clone(&calls);
        async move {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= failures {
                Err(StepFailure::execution(format!("transient failure #{call}")))
            } else {
                Ok(())
            }
        }
    })
}

/// One in-process deployment sharing a broker, a store and an event stream
pub struct Harness {
    pub config: StepflowConfig,
    pub registry: Arc<WorkflowRegistry>,
    pub broker: InMemoryMessageBroker,
    pub store: InMemoryExecutionStore,
    pub publisher: WorkflowEventPublisher,
    pub starter: WorkflowStarter,
    pub listener: WorkflowMessageListener,
    pub commands: ExecutionCommandService,
    recorder: ExecutionRecorder,
    events: broadcast::Receiver<WorkflowMessageEvent>,
}

impl Harness {
    pub fn new(config: StepflowConfig, definitions: Vec<WorkflowDefinition>) -> Self {
        Self::with_broker(config, definitions, InMemoryMessageBroker::new(), None)
    }

    /// Route every send through `sender` while keeping `broker` for inspection
    pub fn with_broker(
        config: StepflowConfig,
        definitions: Vec<WorkflowDefinition>,
        broker: InMemoryMessageBroker,
        sender: Option<Arc<dyn MessageBroker>>,
    ) -> Self {
        init_test_logging();

        let registry = Arc::new(WorkflowRegistry::new());
        for definition in definitions {
            registry
                .register(definition)
                .expect("definition registers");
        }

        let sender = sender.unwrap_or_else(|| Arc::new(broker.clone()));
        let store = InMemoryExecutionStore::new();
        let publisher = WorkflowEventPublisher::new(1024);
        let events = publisher.subscribe();

        let executor = Arc::new(
            StepExecutor::new(Arc::clone(&registry), Arc::clone(&sender), &config)
                .with_event_publisher(publisher.clone()),
        );
        let listener = WorkflowMessageListener::new(executor, &config.consumer)
            .with_event_publisher(publisher.clone());
        let starter = WorkflowStarter::new(Arc::clone(&registry), Arc::clone(&sender), &config)
            .with_event_publisher(publisher.clone());
        let commands = ExecutionCommandService::new(
            Arc::new(store.clone()),
            Arc::clone(&registry),
            sender,
        )
        .with_event_publisher(publisher.clone());
        let recorder = ExecutionRecorder::new(Arc::new(store.clone()));

        Self {
            config,
            registry,
            broker,
            store,
            publisher,
            starter,
            listener,
            commands,
            recorder,
            events,
        }
    }

    pub async fn start(&mut self, topic: &str, payload: Value) -> String {
        let execution_id = self
            .starter
            .start(topic, payload, None, HashMap::new())
            .await
            .expect("workflow starts");
        self.sync_records().await;
        execution_id
    }

    /// Deliver queued step envelopes for `topic` until none are left
    ///
    /// Nacked envelopes are put back and delivery stops. Returns the
    /// acknowledgments in delivery order.
    pub async fn drain(&mut self, topic: &str) -> Vec<Acknowledgment> {
        let mut acks = Vec::new();
        while let Some(message) = self.broker.pop(topic).await {
            let ack = self.listener.on_message(&message).await;
            self.sync_records().await;
            acks.push(ack);
            if !ack.is_ack() {
                self.broker.redeliver(topic, message).await;
                break;
            }
        }
        acks
    }

    /// Act as the retry scheduler: move every envelope on `<topic>.retry` back to `<topic>`
    pub async fn redeliver_retries(&mut self, topic: &str) -> usize {
        let retries = self.broker.take(&destinations::retry(topic)).await;
        let count = retries.len();
        for retry in retries {
            self.broker
                .send(topic, &retry.for_redelivery())
                .await
                .expect("in-memory send");
        }
        count
    }

    /// Fold every published event into the store
    pub async fn sync_records(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.recorder
                .handle_event(&event)
                .await
                .expect("event recorded");
        }
    }

    pub async fn record(&self, execution_id: &str) -> WorkflowExecution {
        self.store
            .find_by_id(execution_id)
            .await
            .expect("store read")
            .expect("execution recorded")
    }

    pub async fn messages(&self, destination: &str) -> Vec<WorkflowMessage> {
        self.broker.messages(destination).await
    }
}
