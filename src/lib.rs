#![allow(clippy::doc_markdown)] // Allow technical terms like RETRY_PENDING in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Stepflow Core
//!
//! Message-driven workflow orchestration for sequential, multi-step business
//! processes.
//!
//! ## Overview
//!
//! A workflow is a topic plus an ordered list of steps. Each execution moves
//! through its steps as an envelope on a message broker: a consumer runs the
//! current step, then routes the envelope onward to the next step, to the
//! completion channel, to a retry channel with exponential backoff, or to a
//! dead-letter channel. Broker sends are guarded by a sliding-window circuit
//! breaker. Operators can resume halted executions, cancel running ones and
//! correct payloads in between.
//!
//! ## Module Organization
//!
//! - [`models`] - Envelope, workflow definitions and execution records
//! - [`orchestration`] - Registry, starter, listener, step executor and command service
//! - [`messaging`] - Broker abstraction, in-memory broker and the resilient wrapper
//! - [`resilience`] - Circuit breaker and its manager
//! - [`persistence`] - Execution store and the event-driven recorder
//! - [`events`] - Broadcast of received and emitted envelopes
//! - [`config`] - YAML configuration with environment overlays
//! - [`error`] - Crate-level error type
//!
//! ## Quick Start
//!
//! ```rust
//! use stepflow_core::config::StepflowConfig;
//! use stepflow_core::messaging::InMemoryMessageBroker;
//! use stepflow_core::models::{StepDefinition, WorkflowDefinition};
//! use stepflow_core::orchestration::{step_fn, StepExecutor, WorkflowRegistry, WorkflowStarter};
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! # async fn example() -> stepflow_core::Result<()> {
//! let config = StepflowConfig::default();
//! let registry = Arc::new(WorkflowRegistry::new());
//! registry.register(
//!     WorkflowDefinition::builder("orders")
//!         .step(StepDefinition::new(1, "reserve", step_fn(|_| async { Ok(()) })))
//!         .build()?,
//! )?;
//!
//! let broker = InMemoryMessageBroker::new();
//! let starter = WorkflowStarter::new(registry.clone(), Arc::new(broker.clone()), &config);
//! let executor = StepExecutor::new(registry, Arc::new(broker.clone()), &config);
//!
//! starter.start("orders", serde_json::json!({"sku": "A-1"}), None, HashMap::new()).await?;
//! while let Some(message) = broker.pop("orders").await {
//!     executor.execute(&message).await?;
//! }
//! assert_eq!(broker.queue_length("orders.completed").await, 1);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod persistence;
pub mod resilience;
pub mod utils;

pub use config::{ConfigManager, StepflowConfig};
pub use constants::WorkflowStatus;
pub use error::{Result, StepflowError};
pub use messaging::{MessageBroker, MessagingError};
pub use models::{WorkflowDefinition, WorkflowExecution, WorkflowMessage};
pub use orchestration::{
    ExecutionCommandService, StepExecutor, WorkflowMessageListener, WorkflowRegistry,
    WorkflowStarter,
};
pub use resilience::{CircuitBreaker, CircuitBreakerManager, CircuitState};
