//! # Step Handlers
//!
//! The seam between the engine and application logic. A step handler receives
//! the envelope payload and either returns normally or reports a classified
//! `StepFailure`. The engine never looks inside the payload itself.
//!
//! Handlers are usually built from closures:
//!
//! ```rust
//! use stepflow_core::orchestration::step_handler::{step_fn, typed_step, StepFailure};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct Order { amount: u64 }
//!
//! let reserve = step_fn(|_payload| async move { Ok(()) });
//! let charge = typed_step(|order: Order| async move {
//!     if order.amount == 0 {
//!         return Err(StepFailure::invalid_argument("amount must be positive"));
//!     }
//!     Ok(())
//! });
//! # let _ = (reserve, charge);
//! ```

use crate::constants::{error_classes, MAX_STACK_TRACE_LENGTH};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// Failure reported by a step, optionally wrapping the failure that caused it
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    /// Classification key matched against the non-retryable denylist
    pub error_class: String,
    pub message: String,
    pub code: Option<String>,
    pub cause: Option<Box<StepFailure>>,
}

impl StepFailure {
    pub fn new(error_class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_class: error_class.into(),
            message: message.into(),
            code: None,
            cause: None,
        }
    }

    /// Generic failure without a specific class
    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(error_classes::STEP_EXECUTION, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(error_classes::INVALID_ARGUMENT, message)
    }

    pub fn payload_deserialization(message: impl Into<String>) -> Self {
        Self::new(error_classes::PAYLOAD_DESERIALIZATION, message)
    }

    /// Failure for a step that exceeded its configured duration
    pub fn timeout(step_label: &str, step_id: u32, timeout: Duration) -> Self {
        Self::new(
            error_classes::STEP_TIMEOUT,
            format!(
                "Step '{step_label}' (id={step_id}) timed out (timeout: {})",
                format_duration(timeout)
            ),
        )
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn caused_by(mut self, cause: StepFailure) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Build a failure from any error, preserving its `source()` chain
    pub fn from_error<E>(error_class: impl Into<String>, error: &E) -> Self
    where
        E: std::error::Error + ?Sized,
    {
        let mut failure = Self::new(error_class, error.to_string());
        if let Some(source) = error.source() {
            failure.cause = Some(Box::new(Self::from_error(
                error_classes::STEP_EXECUTION,
                source,
            )));
        }
        failure
    }

    /// Innermost failure of the chain
    pub fn root_cause(&self) -> &StepFailure {
        let mut current = self;
        while let Some(cause) = current.cause.as_deref() {
            current = cause;
        }
        current
    }

    /// Full cause chain as text, truncated to the stored trace limit
    pub fn trace(&self) -> String {
        let mut rendered = format!("{}: {}", self.error_class, self.message);
        let mut current = self.cause.as_deref();
        while let Some(cause) = current {
            rendered.push_str(&format!("\nCaused by: {}: {}", cause.error_class, cause.message));
            current = cause.cause.as_deref();
        }
        truncate_trace(rendered)
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_class, self.message)
    }
}

impl std::error::Error for StepFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl From<anyhow::Error> for StepFailure {
    fn from(error: anyhow::Error) -> Self {
        let mut chain: Vec<String> = error.chain().map(|e| e.to_string()).collect();
        let mut failure = StepFailure::execution(chain.pop().unwrap_or_default());
        while let Some(message) = chain.pop() {
            failure = StepFailure::execution(message).caused_by(failure);
        }
        failure
    }
}

fn truncate_trace(trace: String) -> String {
    if trace.chars().count() <= MAX_STACK_TRACE_LENGTH {
        return trace;
    }
    let mut truncated: String = trace.chars().take(MAX_STACK_TRACE_LENGTH).collect();
    truncated.push_str("...");
    truncated
}

/// Human-friendly duration: `45s`, `5m`, `2m 30s`, or milliseconds below a second
pub(crate) fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    if seconds == 0 {
        return format!("{}ms", duration.as_millis());
    }
    if seconds < 60 {
        return format!("{seconds}s");
    }
    let minutes = seconds / 60;
    let remaining = seconds % 60;
    if remaining == 0 {
        format!("{minutes}m")
    } else {
        format!("{minutes}m {remaining}s")
    }
}

/// Business logic of one workflow step
#[async_trait]
pub trait StepHandler: Send + Sync + 'static {
    async fn execute(&self, payload: &Value) -> Result<(), StepFailure>;
}

/// Step handler backed by a closure over the raw JSON payload
pub struct FnStepHandler<F> {
    handler: F,
}

#[async_trait]
impl<F, Fut> StepHandler for FnStepHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), StepFailure>> + Send + 'static,
{
    async fn execute(&self, payload: &Value) -> Result<(), StepFailure> {
        (self.handler)(payload.clone()).await
    }
}

/// Step handler that converts the payload into `T` before calling the closure
pub struct TypedStepHandler<T, F> {
    handler: F,
    _payload: PhantomData<fn() -> T>,
}

#[async_trait]
impl<T, F, Fut> StepHandler for TypedStepHandler<T, F>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), StepFailure>> + Send + 'static,
{
    async fn execute(&self, payload: &Value) -> Result<(), StepFailure> {
        let typed: T = serde_json::from_value(payload.clone()).map_err(|e| {
            StepFailure::payload_deserialization(format!(
                "Cannot convert payload into {}: {e}",
                std::any::type_name::<T>()
            ))
        })?;
        (self.handler)(typed).await
    }
}

/// Wrap a closure over the raw payload
pub fn step_fn<F, Fut>(handler: F) -> Arc<dyn StepHandler>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), StepFailure>> + Send + 'static,
{
    Arc::new(FnStepHandler { handler })
}

/// Wrap a closure over a deserialized payload
pub fn typed_step<T, F, Fut>(handler: F) -> Arc<dyn StepHandler>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), StepFailure>> + Send + 'static,
{
    Arc::new(TypedStepHandler {
        handler,
        _payload: PhantomData,
    })
}
