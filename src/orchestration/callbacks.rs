//! # Lifecycle Callbacks
//!
//! Success and failure hooks attached to a workflow definition. The parameter
//! shape of a callback is declared once, when it is constructed, through the
//! `Callback` variant; invocation only matches on that variant.
//!
//! Shapes supported:
//!
//! | Variant | Receives |
//! |---|---|
//! | `NoArgs` | nothing |
//! | `Payload` | the envelope payload |
//! | `Envelope` | the whole envelope |
//! | `Error` | the failure (skipped when there is none) |
//! | `PayloadAndError` | payload plus optional failure |
//! | `EnvelopeAndError` | envelope plus optional failure |
//!
//! Callback failures and panics are logged and never change the outcome of the
//! step transition that triggered them.

use crate::models::WorkflowMessage;
use crate::orchestration::step_handler::StepFailure;
use serde_json::Value;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

pub type CallbackResult = anyhow::Result<()>;

type NoArgsFn = dyn Fn() -> CallbackResult + Send + Sync;
type PayloadFn = dyn Fn(&Value) -> CallbackResult + Send + Sync;
type EnvelopeFn = dyn Fn(&WorkflowMessage) -> CallbackResult + Send + Sync;
type ErrorFn = dyn Fn(&StepFailure) -> CallbackResult + Send + Sync;
type PayloadAndErrorFn = dyn Fn(&Value, Option<&StepFailure>) -> CallbackResult + Send + Sync;
type EnvelopeAndErrorFn =
    dyn Fn(&WorkflowMessage, Option<&StepFailure>) -> CallbackResult + Send + Sync;

/// Declared parameter shape of a callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackSignature {
    NoArgs,
    Payload,
    Envelope,
    Error,
    PayloadAndError,
    EnvelopeAndError,
}

impl CallbackSignature {
    pub fn arity(&self) -> usize {
        match self {
            Self::NoArgs => 0,
            Self::Payload | Self::Envelope | Self::Error => 1,
            Self::PayloadAndError | Self::EnvelopeAndError => 2,
        }
    }
}

/// Result of invoking a callback
#[derive(Debug)]
pub enum CallbackOutcome {
    Invoked,
    /// The declared shape cannot be satisfied by the available arguments
    Skipped { reason: String },
    Failed(anyhow::Error),
}

impl CallbackOutcome {
    pub fn is_invoked(&self) -> bool {
        matches!(self, Self::Invoked)
    }
}

/// Workflow lifecycle hook
#[derive(Clone)]
pub enum Callback {
    NoArgs(Arc<NoArgsFn>),
    Payload(Arc<PayloadFn>),
    Envelope(Arc<EnvelopeFn>),
    Error(Arc<ErrorFn>),
    PayloadAndError(Arc<PayloadAndErrorFn>),
    EnvelopeAndError(Arc<EnvelopeAndErrorFn>),
}

impl Callback {
    pub fn no_args<F>(f: F) -> Self
    where
        F: Fn() -> CallbackResult + Send + Sync + 'static,
    {
        Self::NoArgs(Arc::new(f))
    }

    pub fn payload<F>(f: F) -> Self
    where
        F: Fn(&Value) -> CallbackResult + Send + Sync + 'static,
    {
        Self::Payload(Arc::new(f))
    }

    pub fn envelope<F>(f: F) -> Self
    where
        F: Fn(&WorkflowMessage) -> CallbackResult + Send + Sync + 'static,
    {
        Self::Envelope(Arc::new(f))
    }

    pub fn error<F>(f: F) -> Self
    where
        F: Fn(&StepFailure) -> CallbackResult + Send + Sync + 'static,
    {
        Self::Error(Arc::new(f))
    }

    pub fn payload_and_error<F>(f: F) -> Self
    where
        F: Fn(&Value, Option<&StepFailure>) -> CallbackResult + Send + Sync + 'static,
    {
        Self::PayloadAndError(Arc::new(f))
    }

    pub fn envelope_and_error<F>(f: F) -> Self
    where
        F: Fn(&WorkflowMessage, Option<&StepFailure>) -> CallbackResult + Send + Sync + 'static,
    {
        Self::EnvelopeAndError(Arc::new(f))
    }

    pub fn signature(&self) -> CallbackSignature {
        match self {
            Self::NoArgs(_) => CallbackSignature::NoArgs,
            Self::Payload(_) => CallbackSignature::Payload,
            Self::Envelope(_) => CallbackSignature::Envelope,
            Self::Error(_) => CallbackSignature::Error,
            Self::PayloadAndError(_) => CallbackSignature::PayloadAndError,
            Self::EnvelopeAndError(_) => CallbackSignature::EnvelopeAndError,
        }
    }

    /// Invoke with the envelope and, for failure hooks, the failure
    pub fn invoke(&self, message: &WorkflowMessage, error: Option<&StepFailure>) -> CallbackOutcome {
        let result = catch_unwind(AssertUnwindSafe(|| match self {
            Self::NoArgs(f) => Some(f()),
            Self::Payload(f) => Some(f(&message.payload)),
            Self::Envelope(f) => Some(f(message)),
            Self::Error(f) => error.map(|e| f(e)),
            Self::PayloadAndError(f) => Some(f(&message.payload, error)),
            Self::EnvelopeAndError(f) => Some(f(message, error)),
        }));

        match result {
            Ok(Some(Ok(()))) => CallbackOutcome::Invoked,
            Ok(Some(Err(e))) => CallbackOutcome::Failed(e),
            Ok(None) => CallbackOutcome::Skipped {
                reason: "error-only callback invoked without an error".to_string(),
            },
            Err(_) => CallbackOutcome::Failed(anyhow::anyhow!("callback panicked")),
        }
    }

    /// Invoke and log the outcome; used by the step executor
    pub(crate) fn invoke_logged(
        &self,
        kind: &str,
        message: &WorkflowMessage,
        error: Option<&StepFailure>,
    ) -> CallbackOutcome {
        let outcome = self.invoke(message, error);
        match &outcome {
            CallbackOutcome::Invoked => debug!(
                execution_id = %message.execution_id,
                topic = %message.topic,
                callback = kind,
                "Workflow callback invoked"
            ),
            CallbackOutcome::Skipped { reason } => warn!(
                execution_id = %message.execution_id,
                topic = %message.topic,
                callback = kind,
                signature = ?self.signature(),
                reason = %reason,
                "Workflow callback skipped"
            ),
            CallbackOutcome::Failed(e) => warn!(
                execution_id = %message.execution_id,
                topic = %message.topic,
                callback = kind,
                error = %e,
                "Workflow callback failed"
            ),
        }
        outcome
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("signature", &self.signature())
            .finish()
    }
}
