//! # Orchestration Engine
//!
//! Message-driven step orchestration. Each execution travels as a
//! [`WorkflowMessage`](crate::models::WorkflowMessage) envelope from one step
//! consumer to the next; no component holds in-flight state.
//!
//! ## Core Components
//!
//! - **WorkflowRegistry**: topic to immutable workflow definition
//! - **WorkflowStarter**: builds and sends the first envelope of an execution
//! - **WorkflowMessageListener**: consumer glue with manual acknowledgment
//! - **StepExecutor**: runs one step and routes the envelope (next step, completion, retry, dead letter)
//! - **ErrorClassifier** / **RetryPolicy**: retryability and exponential backoff
//! - **ExecutionCommandService**: operator resume, cancel and payload edits
//!
//! ## Destinations
//!
//! | Destination | Carries |
//! |---|---|
//! | `<topic>` | PENDING / IN_PROGRESS envelopes for the next step |
//! | `<topic>.completed` | COMPLETED envelopes |
//! | `<topic>.retry` | RETRY_PENDING envelopes, redelivered by an external scheduler |
//! | `<topic><dlq suffix>` | FAILED envelopes with `error_info` |

pub mod backoff;
pub mod callbacks;
pub mod command_service;
pub mod error_classifier;
pub mod errors;
pub mod listener;
pub mod registry;
pub mod starter;
pub mod step_executor;
pub mod step_handler;

// Re-export core types and components for easy access
pub use backoff::{backoff, RetryPolicy};
pub use callbacks::{Callback, CallbackOutcome, CallbackResult, CallbackSignature};
pub use command_service::{CommandResult, ExecutionCommandService};
pub use error_classifier::{ErrorClassifier, FailureCategory, FailureClassification};
pub use errors::{CommandError, RegistryError};
pub use listener::{Acknowledgment, WorkflowMessageListener};
pub use registry::{ResolvedStep, WorkflowRegistry};
pub use starter::WorkflowStarter;
pub use step_executor::{StepExecutor, StepTransition};
pub use step_handler::{step_fn, typed_step, StepFailure, StepHandler};
